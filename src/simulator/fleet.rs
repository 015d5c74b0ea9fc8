use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::backend::wire::{AllStatusPayload, FramesPayload, StatusPayload, STATUS_SUCCESS};
use crate::common::{Camera, CameraIndex, CameraList, CameraSelector, Frame};
use crate::config::SimulatorConfig;



pub const FRAME_SOURCE: &str = "simulator";
const MAX_FRAMES_PER_CAMERA_IN_ALL_VIEW: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FleetError {
	#[error("Invalid camera index: {0}")]
	UnknownCamera(CameraIndex),

	#[error("Analyzers are globally stopped.")]
	GloballyStopped,

	#[error("Analyzer for camera {0} is already running")]
	AlreadyRunning(CameraIndex),
}

struct AnalyzerRun {
	started_at: Instant,
	detections_recorded: u64,
}

/// In-memory stand-in for the backend's analyzer threads.
///
/// An analyzer reports active once `startup_delay` has passed since it was started, and
/// processes one frame per `frame_interval` after that. Every `save_interval` processed
/// frames it records a detection frame with a few random object classes.
pub struct AnalyzerFleet {
	settings: SimulatorConfig,
	runs: BTreeMap<CameraIndex, AnalyzerRun>,
	/// Every camera that has had an analyzer, running or not.
	known: BTreeSet<CameraIndex>,
	globally_stopped: bool,
	detections: BTreeMap<CameraIndex, Vec<Frame>>,
	next_frame_id: u64,
	epoch: (Instant, SystemTime),
}

impl AnalyzerFleet {
	pub fn new(settings: SimulatorConfig) -> Self {
		AnalyzerFleet {
			settings,
			runs: BTreeMap::new(),
			known: BTreeSet::new(),
			globally_stopped: false,
			detections: BTreeMap::new(),
			next_frame_id: 1,
			epoch: (Instant::now(), SystemTime::now()),
		}
	}

	pub fn settings(&self) -> &SimulatorConfig {
		&self.settings
	}

	pub fn globally_stopped(&self) -> bool {
		self.globally_stopped
	}

	fn check_camera(&self, camera: CameraIndex) -> Result<(), FleetError> {
		if self.settings.cameras.contains(&camera) {
			Ok(())
		} else {
			Err(FleetError::UnknownCamera(camera))
		}
	}

	pub fn start_analyzer(&mut self, camera: CameraIndex, now: Instant) -> Result<(), FleetError> {
		self.check_camera(camera)?;
		if self.globally_stopped {
			info!("Global stop is active. Not starting analyzer for camera {}.", camera);
			return Err(FleetError::GloballyStopped);
		}
		if self.runs.contains_key(&camera) {
			warn!("Analyzer for camera {} is already running", camera);
			return Err(FleetError::AlreadyRunning(camera));
		}
		info!("Starting simulated analyzer for camera {}", camera);
		self.runs.insert(camera, AnalyzerRun {
			started_at: now,
			detections_recorded: 0,
		});
		self.known.insert(camera);
		Ok(())
	}

	pub fn stop_analyzer(&mut self, camera: CameraIndex, now: Instant) -> bool {
		self.record_detections(now);
		match self.runs.remove(&camera) {
			Some(_) => {
				info!("Stopped simulated analyzer for camera {}", camera);
				true
			},
			None => {
				info!("No running analyzer for camera {} to stop", camera);
				false
			},
		}
	}

	/// Stops and starts `camera`'s analyzer. It reports active again after the startup delay.
	pub fn restart(&mut self, camera: CameraIndex, now: Instant) -> Result<(), FleetError> {
		self.check_camera(camera)?;
		self.stop_analyzer(camera, now);
		self.start_analyzer(camera, now)
	}

	/// Lifts the global stop and starts up to `max_concurrent_cameras` analyzers.
	/// Returns how many were started and which cameras exist.
	pub fn start_all(&mut self, now: Instant) -> (u32, Vec<CameraIndex>) {
		self.globally_stopped = false;
		let cameras = self.settings.cameras.clone();
		if cameras.len() > self.settings.max_concurrent_cameras {
			info!("Limiting startup to {} cameras. Others will start on demand.", self.settings.max_concurrent_cameras);
		}
		let mut started = 0;
		for camera in cameras.iter().take(self.settings.max_concurrent_cameras) {
			if self.start_analyzer(*camera, now).is_ok() {
				started += 1;
			}
		}
		(started, cameras)
	}

	/// Stops every analyzer and blocks further starts until `start_all`.
	pub fn stop_all(&mut self, now: Instant) -> u32 {
		self.globally_stopped = true;
		let running: Vec<CameraIndex> = self.runs.keys().copied().collect();
		running.iter()
			.filter(|camera| self.stop_analyzer(**camera, now))
			.count() as u32
	}

	fn active_since(&self, camera: CameraIndex) -> Option<Instant> {
		self.runs.get(&camera).map(|run| run.started_at + self.settings.startup_delay)
	}

	pub fn is_active(&self, camera: CameraIndex, now: Instant) -> bool {
		self.active_since(camera).map_or(false, |since| now >= since)
	}

	pub fn frame_count(&self, camera: CameraIndex, now: Instant) -> u64 {
		match self.active_since(camera) {
			Some(since) if now >= since => {
				let interval = self.settings.frame_interval.as_millis().max(1);
				(now.duration_since(since).as_millis() / interval) as u64
			},
			_ => 0,
		}
	}

	pub fn status(&self, camera: CameraIndex, now: Instant) -> StatusPayload {
		let active = self.is_active(camera, now);
		StatusPayload {
			status: if active { "active" } else { "inactive" }.to_string(),
			camera_index: Some(camera),
			frame_count: Some(self.frame_count(camera, now)),
			message: None,
		}
	}

	pub fn all_status(&self, now: Instant) -> AllStatusPayload {
		AllStatusPayload {
			cameras: self.known.iter()
				.map(|camera| (camera.to_string(), self.status(*camera, now)))
				.collect(),
		}
	}

	/// Cameras whose analyzers are up, as `/api/cameras` lists them.
	pub fn running_cameras(&self, now: Instant) -> CameraList {
		self.runs.keys()
			.filter(|camera| self.is_active(**camera, now))
			.map(|camera| Camera::new(*camera))
			.collect()
	}

	fn timestamp(&self, at: Instant) -> String {
		let wall = self.epoch.1 + at.saturating_duration_since(self.epoch.0);
		let seconds = wall.duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default();
		seconds.to_string()
	}

	fn record_detections(&mut self, now: Instant) {
		let save_interval = self.settings.save_interval.max(1);
		let mut rng = rand::thread_rng();
		let cameras: Vec<CameraIndex> = self.runs.keys().copied().collect();
		for camera in cameras {
			let processed = self.frame_count(camera, now);
			let Some(since) = self.active_since(camera) else { continue };
			let Some(run) = self.runs.get_mut(&camera) else { continue };
			let mut new_frames = Vec::new();
			while (run.detections_recorded + 1) * save_interval <= processed {
				run.detections_recorded += 1;
				let frame_number = run.detections_recorded * save_interval;
				let captured_at = since + self.settings.frame_interval * (frame_number as u32);
				let object_count = rng.gen_range(1..=2);
				let objects: BTreeSet<String> = self.settings.include_classes
					.choose_multiple(&mut rng, object_count)
					.cloned()
					.collect();
				new_frames.push((frame_number, captured_at, objects));
			}
			for (frame_number, captured_at, objects) in new_frames {
				let frame = Frame {
					id: Some(self.next_frame_id),
					camera_index: camera,
					frame_number: Some(frame_number),
					timestamp: Some(self.timestamp(captured_at)),
					objects,
					image_path: Some(format!("/static/output/realtime_activity/camera_{}/frame_{:06}.jpg", camera, frame_number)),
					filename: None,
				};
				self.next_frame_id += 1;
				self.detections.entry(camera).or_default().push(frame);
			}
		}
	}

	/// Newest detection frames first. For every camera at once, each camera contributes at most
	/// `min(limit / cameras, 10)` frames.
	pub fn recent_frames(&mut self, selector: CameraSelector, limit: usize, now: Instant) -> FramesPayload {
		self.record_detections(now);
		let (cameras, per_camera): (Vec<CameraIndex>, usize) = match selector {
			CameraSelector::One(camera) => (vec![camera], limit),
			CameraSelector::All => {
				let cameras: Vec<CameraIndex> = self.detections.keys().copied().collect();
				let per_camera = (limit / cameras.len().max(1)).min(MAX_FRAMES_PER_CAMERA_IN_ALL_VIEW);
				(cameras, per_camera)
			},
		};
		let mut frames: Vec<Frame> = cameras.iter()
			.filter_map(|camera| self.detections.get(camera))
			.flat_map(|recorded| recorded.iter().rev().take(per_camera).cloned())
			.collect();
		frames.sort_by(|a, b| b.id.cmp(&a.id));

		FramesPayload {
			status: STATUS_SUCCESS.to_string(),
			count: Some(frames.len()),
			frames,
			source: Some(FRAME_SOURCE.to_string()),
			all_cameras: selector == CameraSelector::All,
			camera_index: Some(selector.frames_param()),
			message: None,
		}
	}
}

/// Time from start until `camera` would report active, if it is running.
pub fn remaining_startup(fleet: &AnalyzerFleet, camera: CameraIndex, now: Instant) -> Option<Duration> {
	fleet.active_since(camera).map(|since| since.saturating_duration_since(now))
}
