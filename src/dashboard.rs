//! Wires the session components together the way the realtime page uses them: an initial
//! load sequence, periodic all-camera status and thumbnail refreshes, and the fleet commands.
//!
//! The periodic tickers and the switch poll loop are independent schedulers. The tickers only
//! publish the all-camera report and the tiles; they never touch the single-stream view.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::{self, AnalyzerBackend, CommandReply};
use crate::common::{AnalyzerState, Camera, CameraIndex, CameraSelector};
use crate::config::{Config, DashboardConfig};
use crate::error::SessionResult;
use crate::feed::{FrameFeed, FrameListing};
use crate::registry::{self, CameraRegistry, RegistrySnapshot};
use crate::selection::SelectionStore;
use crate::status::{AnalyzerStatusPoller, StatusReport};
use crate::switch::{CameraSwitchController, SessionView, SwitchSettings};



#[derive(Clone, Copy)]
#[derive(Debug)]
pub struct DashboardSettings {
	pub all_status_interval: Duration,
	pub thumbnail_interval: Duration,
	pub feed_reload_delay: Duration,
	pub frame_limit: u32,
}

impl From<&DashboardConfig> for DashboardSettings {
	fn from(config: &DashboardConfig) -> Self {
		DashboardSettings {
			all_status_interval: config.all_status_interval,
			thumbnail_interval: config.thumbnail_interval,
			feed_reload_delay: config.feed_reload_delay,
			frame_limit: config.frame_limit,
		}
	}
}

impl Default for DashboardSettings {
	fn default() -> Self {
		DashboardSettings::from(&DashboardConfig::default())
	}
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum TileState {
	Live,
	Starting,
	StartFailed(String),
	/// Status could not be fetched, so nothing was started.
	Unknown,
}

/// One camera in the multi-camera grid.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct FeedTile {
	pub camera: Camera,
	pub state: TileState,
	pub thumbnail_url: String,
}

impl fmt::Display for FeedTile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = match &self.state {
			TileState::Live => "Live".to_string(),
			TileState::Starting => "Starting...".to_string(),
			TileState::StartFailed(reason) => format!("Start Failed: {}", reason),
			TileState::Unknown => "Unknown".to_string(),
		};
		write!(f, "{} [{}] {}", self.camera.name, state, self.thumbnail_url)
	}
}

#[derive(Clone)]
#[derive(Debug)]
pub struct InitialLoad {
	pub registry: RegistrySnapshot,
	pub restored: Option<CameraIndex>,
	pub camera: Option<CameraIndex>,
	pub view: SessionView,
	pub status: StatusReport,
	pub frames: FrameListing,
	pub tiles: Vec<FeedTile>,
}



#[derive(Clone)]
pub struct Dashboard {
	backend: Arc<dyn AnalyzerBackend>,
	registry: Arc<CameraRegistry>,
	poller: Arc<AnalyzerStatusPoller>,
	feed: Arc<FrameFeed>,
	controller: CameraSwitchController,
	selection: SelectionStore,
	settings: DashboardSettings,
	show_all_frames: Arc<AtomicBool>,
	status_tx: Arc<watch::Sender<StatusReport>>,
	tiles_tx: Arc<watch::Sender<Vec<FeedTile>>>,
	/// Cancelled when the refresh loop stops; pending delayed reloads are dropped.
	reloads: CancellationToken,
}

impl Dashboard {
	pub fn new(backend: Arc<dyn AnalyzerBackend>, settings: DashboardSettings, switch: SwitchSettings, selection: SelectionStore) -> Self {
		let registry = Arc::new(CameraRegistry::new(backend.clone()));
		let poller = Arc::new(AnalyzerStatusPoller::new(backend.clone()));
		let feed = Arc::new(FrameFeed::new(backend.clone(), settings.frame_limit));
		let controller = CameraSwitchController::new(backend.clone(), poller.clone(), feed.clone(), Some(selection.clone()), switch);
		let (status_tx, _) = watch::channel(StatusReport::empty(CameraSelector::All));
		let (tiles_tx, _) = watch::channel(Vec::new());
		Dashboard {
			backend,
			registry,
			poller,
			feed,
			controller,
			selection,
			settings,
			show_all_frames: Arc::new(AtomicBool::new(false)),
			status_tx: Arc::new(status_tx),
			tiles_tx: Arc::new(tiles_tx),
			reloads: CancellationToken::new(),
		}
	}

	pub fn from_config(backend: Arc<dyn AnalyzerBackend>, config: &Config) -> Self {
		Dashboard::new(
			backend,
			DashboardSettings::from(&config.dashboard),
			SwitchSettings::from(&config.switch),
			SelectionStore::new(config.storage.selection_file.clone()),
		)
	}

	pub fn controller(&self) -> &CameraSwitchController {
		&self.controller
	}

	pub fn registry(&self) -> &CameraRegistry {
		&self.registry
	}

	pub fn poller(&self) -> &AnalyzerStatusPoller {
		&self.poller
	}

	pub fn feed(&self) -> &FrameFeed {
		&self.feed
	}

	pub fn subscribe_status(&self) -> watch::Receiver<StatusReport> {
		self.status_tx.subscribe()
	}

	pub fn subscribe_tiles(&self) -> watch::Receiver<Vec<FeedTile>> {
		self.tiles_tx.subscribe()
	}

	/// Restores the saved selection, loads cameras, reconciles the chosen camera's status,
	/// then loads the all-camera report, frames and tiles.
	pub async fn initial_load(&self) -> InitialLoad {
		let restored = self.selection.load().await;
		let registry = self.registry.refresh().await;
		let camera = registry::choose_camera(&registry.cameras, restored, self.controller.current_camera());

		match camera {
			Some(camera) => {
				info!("Showing camera {} (restored selection: {:?})", camera, restored);
				self.controller.select(camera).await;
				self.controller.reconcile().await;
			},
			None => warn!("No cameras detected by the server"),
		}

		let status = self.refresh_all_status().await;
		let frames = self.load_frames().await;
		let tiles = self.load_camera_tiles().await;
		InitialLoad {
			registry,
			restored,
			camera,
			view: self.controller.view(),
			status,
			frames,
			tiles,
		}
	}

	pub async fn refresh_all_status(&self) -> StatusReport {
		let report = self.poller.get_status(CameraSelector::All).await;
		self.status_tx.send_replace(report.clone());
		report
	}

	/// Frames for the current camera, or for every camera when the all-cameras toggle is on.
	pub async fn load_frames(&self) -> FrameListing {
		let selector = if self.show_all_frames.load(Ordering::Relaxed) {
			CameraSelector::All
		} else {
			match self.controller.current_camera() {
				Some(camera) => CameraSelector::One(camera),
				None => return FrameListing::empty(),
			}
		};
		self.feed.refresh(selector).await
	}

	pub async fn set_show_all_frames(&self, show_all: bool) -> FrameListing {
		self.show_all_frames.store(show_all, Ordering::Relaxed);
		self.load_frames().await
	}

	pub fn show_all_frames(&self) -> bool {
		self.show_all_frames.load(Ordering::Relaxed)
	}

	/// Remembers `camera` and shows its frames without restarting anything.
	pub async fn select_for_frames(&self, camera: CameraIndex) -> FrameListing {
		self.selection.save(camera).await;
		self.feed.refresh(CameraSelector::One(camera)).await
	}

	/// Builds the multi-camera grid. Cameras without a running analyzer get a restart request.
	pub async fn load_camera_tiles(&self) -> Vec<FeedTile> {
		let snapshot = self.registry.refresh().await;
		let mut tiles = Vec::with_capacity(snapshot.cameras.len());
		if !snapshot.cameras.is_empty() {
			let report = self.poller.get_status(CameraSelector::All).await;
			for camera in snapshot.cameras {
				let state = if report.error.is_some() {
					TileState::Unknown
				} else if report.status_of(camera.index).state == AnalyzerState::Active {
					TileState::Live
				} else {
					self.start_camera(camera.index).await
				};
				tiles.push(FeedTile {
					thumbnail_url: self.backend.thumbnail_url(camera.index, backend::cache_buster()),
					camera,
					state,
				});
			}
		}
		self.tiles_tx.send_replace(tiles.clone());
		tiles
	}

	async fn start_camera(&self, camera: CameraIndex) -> TileState {
		match self.backend.restart_analyzer(camera).await {
			Ok(reply) if reply.accepted() => TileState::Starting,
			Ok(reply) => TileState::StartFailed(reply.rejection_message()),
			Err(err) => {
				warn!("Failed to start analyzer for camera {}: {}", camera, err);
				TileState::StartFailed(err.to_string())
			},
		}
	}

	/// Re-issues every tile's thumbnail URL with a fresh cache buster.
	pub fn refresh_thumbnails(&self) -> Vec<FeedTile> {
		self.tiles_tx.send_modify(|tiles| {
			for tile in tiles.iter_mut() {
				tile.thumbnail_url = self.backend.thumbnail_url(tile.camera.index, backend::cache_buster());
			}
		});
		self.tiles_tx.borrow().clone()
	}

	/// Starts analyzers on every camera, then reloads the grid once they had time to come up.
	pub async fn start_all(&self) -> SessionResult<CommandReply> {
		let reply = self.backend.start_all().await?;
		if reply.accepted() {
			info!("Started {} analyzer(s)", reply.started_count.unwrap_or(0));
			let dashboard = self.clone();
			tokio::spawn(async move {
				tokio::select! {
					_ = dashboard.reloads.cancelled() => {
						debug!("Dashboard stopped; skipping delayed tile reload");
					},
					_ = time::sleep(dashboard.settings.feed_reload_delay) => {
						dashboard.load_camera_tiles().await;
					},
				}
			});
		} else {
			warn!("Start-all rejected: {}", reply.rejection_message());
		}
		Ok(reply)
	}

	pub async fn stop_all(&self) -> SessionResult<CommandReply> {
		let reply = self.backend.stop_all().await?;
		if reply.accepted() {
			info!("Stopped {} analyzer(s)", reply.stopped_count.unwrap_or(0));
		} else {
			warn!("Stop-all rejected: {}", reply.rejection_message());
		}
		self.refresh_all_status().await;
		Ok(reply)
	}

	/// Runs the periodic refreshes until `shutdown` fires. The initial load already did
	/// the first round, so each ticker first fires one period from now. Stopping also drops
	/// any tile reload still waiting after `start_all`.
	pub async fn run(&self, shutdown: CancellationToken) {
		let start = Instant::now();
		let mut status_ticker = time::interval_at(start + self.settings.all_status_interval, self.settings.all_status_interval);
		status_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		let mut thumbnail_ticker = time::interval_at(start + self.settings.thumbnail_interval, self.settings.thumbnail_interval);
		thumbnail_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = shutdown.cancelled() => {
					info!("Dashboard refresh loop stopping");
					self.reloads.cancel();
					break;
				},
				_ = status_ticker.tick() => {
					let report = self.refresh_all_status().await;
					info!("All-camera status: {}", report.summary());
				},
				_ = thumbnail_ticker.tick() => {
					self.refresh_thumbnails();
				},
			}
		}
	}
}
