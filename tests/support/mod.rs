//! A scripted in-memory analyzer backend for driving the session components in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use analyzer_session::backend::{AnalyzerBackend, CommandReply, CommandStatus, FrameBatch};
use analyzer_session::common::{AnalyzerState, AnalyzerStatus, Camera, CameraIndex, CameraList, CameraSelector, Frame, StatusMap};
use analyzer_session::{SessionError, SessionResult};



/// How a camera's analyzer reacts after a restart.
#[derive(Clone, Copy)]
#[derive(Debug)]
pub enum Readiness {
	/// Reports active on the n-th single-camera status poll after the restart.
	AfterPolls(u32),
	Never,
	/// Single-camera status requests never complete.
	Hang,
}

#[derive(Default)]
pub struct Script {
	pub cameras: Vec<CameraIndex>,
	pub cameras_error: Option<SessionError>,
	pub readiness: BTreeMap<CameraIndex, Readiness>,
	pub active: BTreeSet<CameraIndex>,
	pub restart_error: Option<SessionError>,
	pub restart_rejection: Option<String>,
	pub status_error: Option<SessionError>,
	pub frames_error: Option<SessionError>,
	polls_since_restart: BTreeMap<CameraIndex, u32>,
	pub restarts: Vec<CameraIndex>,
	pub status_calls: Vec<CameraSelector>,
	pub frame_calls: Vec<CameraSelector>,
}

#[derive(Default)]
pub struct ScriptedBackend {
	script: Mutex<Script>,
}

impl ScriptedBackend {
	pub fn new(cameras: &[CameraIndex]) -> Arc<Self> {
		let backend = ScriptedBackend::default();
		backend.script().cameras = cameras.to_vec();
		Arc::new(backend)
	}

	pub fn script(&self) -> MutexGuard<'_, Script> {
		self.script.lock().unwrap()
	}

	pub fn set_readiness(&self, camera: CameraIndex, readiness: Readiness) {
		self.script().readiness.insert(camera, readiness);
	}

	pub fn set_active(&self, camera: CameraIndex) {
		self.script().active.insert(camera);
	}

	pub fn status_polls_for(&self, camera: CameraIndex) -> usize {
		self.script().status_calls.iter().filter(|selector| **selector == CameraSelector::One(camera)).count()
	}

	pub fn status_calls_for_all(&self) -> usize {
		self.script().status_calls.iter().filter(|selector| **selector == CameraSelector::All).count()
	}

	fn status(camera_index: CameraIndex, active: bool) -> AnalyzerStatus {
		AnalyzerStatus {
			camera_index,
			state: if active { AnalyzerState::Active } else { AnalyzerState::Inactive },
			frame_count: if active { 42 } else { 0 },
		}
	}

	fn command(status: CommandStatus) -> CommandReply {
		CommandReply {
			status,
			message: None,
			started_count: None,
			stopped_count: None,
		}
	}
}

#[rocket::async_trait]
impl AnalyzerBackend for ScriptedBackend {
	async fn list_cameras(&self) -> SessionResult<CameraList> {
		let script = self.script();
		if let Some(err) = &script.cameras_error {
			return Err(err.clone());
		}
		Ok(script.cameras.iter().map(|index| Camera::new(*index)).collect())
	}

	async fn analyzer_status(&self, selector: CameraSelector) -> SessionResult<StatusMap> {
		let hang = {
			let mut script = self.script();
			script.status_calls.push(selector);
			if let Some(err) = &script.status_error {
				return Err(err.clone());
			}
			match selector {
				CameraSelector::All => {
					let mut statuses = StatusMap::new();
					for camera in script.cameras.clone() {
						statuses.insert(camera, Self::status(camera, script.active.contains(&camera)));
					}
					return Ok(statuses);
				},
				CameraSelector::One(camera) => {
					let readiness = script.readiness.get(&camera).copied().unwrap_or(Readiness::Never);
					if matches!(readiness, Readiness::Hang) {
						true
					} else {
						if let Some(polls) = script.polls_since_restart.get_mut(&camera) {
							*polls += 1;
							if matches!(readiness, Readiness::AfterPolls(needed) if *polls >= needed) {
								script.active.insert(camera);
							}
						}
						let active = script.active.contains(&camera);
						return Ok(StatusMap::from([(camera, Self::status(camera, active))]));
					}
				},
			}
		};
		if hang {
			std::future::pending::<()>().await;
		}
		Err(SessionError::Network("unreachable".to_string()))
	}

	async fn restart_analyzer(&self, camera: CameraIndex) -> SessionResult<CommandReply> {
		let mut script = self.script();
		script.restarts.push(camera);
		if let Some(err) = &script.restart_error {
			return Err(err.clone());
		}
		if let Some(message) = &script.restart_rejection {
			let mut reply = Self::command(CommandStatus::Rejected("error".to_string()));
			reply.message = Some(message.clone());
			return Ok(reply);
		}
		script.active.remove(&camera);
		script.polls_since_restart.insert(camera, 0);
		Ok(Self::command(CommandStatus::Pending))
	}

	async fn start_all(&self) -> SessionResult<CommandReply> {
		let mut script = self.script();
		let cameras = script.cameras.clone();
		script.active.extend(cameras.iter().copied());
		let mut reply = Self::command(CommandStatus::Success);
		reply.started_count = Some(cameras.len() as u32);
		Ok(reply)
	}

	async fn stop_all(&self) -> SessionResult<CommandReply> {
		let mut script = self.script();
		let stopped = script.active.len() as u32;
		script.active.clear();
		let mut reply = Self::command(CommandStatus::Success);
		reply.stopped_count = Some(stopped);
		Ok(reply)
	}

	async fn recent_frames(&self, selector: CameraSelector, limit: u32) -> SessionResult<FrameBatch> {
		let mut script = self.script();
		script.frame_calls.push(selector);
		if let Some(err) = &script.frames_error {
			return Err(err.clone());
		}
		let cameras: Vec<CameraIndex> = match selector {
			CameraSelector::One(camera) => vec![camera],
			CameraSelector::All => script.cameras.clone(),
		};
		let frames = cameras.into_iter()
			.filter(|camera| script.active.contains(camera))
			.take(limit as usize)
			.map(|camera_index| Frame {
				id: None,
				camera_index,
				frame_number: Some(20),
				timestamp: Some("2026-10-19 12:00:00".to_string()),
				objects: BTreeSet::from(["person".to_string()]),
				image_path: Some(format!("detections/camera_{}_frame_20.jpg", camera_index)),
				filename: None,
			})
			.collect();
		Ok(FrameBatch {
			frames,
			source: Some("scripted".to_string()),
			all_cameras: selector == CameraSelector::All,
		})
	}
}
