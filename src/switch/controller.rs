use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::backend::{self, AnalyzerBackend};
use crate::common::{AnalyzerStatus, CameraIndex, CameraSelector, StreamSource};
use crate::config::SwitchConfig;
use crate::error::SessionError;
use crate::feed::FrameFeed;
use crate::selection::SelectionStore;
use crate::status::{AnalyzerStatusPoller, StatusReport};
use crate::switch::machine::{Effect, SessionView, SwitchEvent, SwitchMachine, SwitchPhase};



#[derive(Clone, Copy)]
#[derive(Debug)]
pub struct SwitchSettings {
	pub poll_interval: Duration,
	pub timeout: Duration,
}

impl From<&SwitchConfig> for SwitchSettings {
	fn from(config: &SwitchConfig) -> Self {
		SwitchSettings {
			poll_interval: config.poll_interval,
			timeout: config.timeout,
		}
	}
}

impl Default for SwitchSettings {
	fn default() -> Self {
		SwitchSettings::from(&SwitchConfig::default())
	}
}

/// The running switch task. Cancelling it means both tripping the token (checked on every
/// tick) and aborting the task, so a loop parked in a network call stops as well.
struct PollHandle {
	token: CancellationToken,
	task: JoinHandle<()>,
}

impl PollHandle {
	fn cancel(self) {
		self.token.cancel();
		self.task.abort();
	}
}

struct ControllerState {
	machine: SwitchMachine,
	/// Bumped by every request; events carrying an older generation are dropped.
	generation: u64,
	poll: Option<PollHandle>,
}

struct Shared {
	backend: Arc<dyn AnalyzerBackend>,
	poller: Arc<AnalyzerStatusPoller>,
	feed: Arc<FrameFeed>,
	selection: Option<SelectionStore>,
	settings: SwitchSettings,
	state: Mutex<ControllerState>,
	view_tx: watch::Sender<SessionView>,
	camera_tx: watch::Sender<Option<CameraIndex>>,
	/// Generation of the last switch task that ran to completion.
	finished_tx: watch::Sender<u64>,
}

impl Shared {
	fn publish(&self, machine: &SwitchMachine) {
		self.view_tx.send_replace(machine.view().clone());
		let camera = machine.current_camera();
		self.camera_tx.send_if_modified(|current| {
			if *current == camera {
				false
			} else {
				*current = camera;
				true
			}
		});
	}

	fn apply_view_effects(&self, machine: &mut SwitchMachine, effects: &[Effect]) {
		for effect in effects {
			match effect {
				Effect::ClearStream => machine.set_stream(None),
				Effect::ClearFrames => self.feed.clear(),
				Effect::AttachStream(camera) => machine.set_stream(Some(StreamSource {
					camera: *camera,
					url: self.backend.stream_url(*camera, backend::cache_buster()),
				})),
				_ => {},
			}
		}
	}

	/// Feeds one event to the machine unless it comes from a superseded request.
	/// Returns the phase after the transition, or `None` if the event was dropped.
	async fn apply(&self, generation: u64, event: SwitchEvent) -> Option<(SwitchPhase, Vec<Effect>)> {
		let (phase, effects) = {
			let mut state = self.state.lock().await;
			if state.generation != generation {
				debug!("Dropping {:?} from superseded request {}", event, generation);
				return None;
			}
			// CancelPolling needs nothing here: the loop stops once it sees a terminal phase,
			// and its handle is released when the task ends.
			let effects = state.machine.handle(event, Instant::now());
			self.apply_view_effects(&mut state.machine, &effects);
			self.publish(&state.machine);
			(state.machine.phase(), effects)
		};

		for effect in &effects {
			if !self.is_current(generation).await {
				break;
			}
			match effect {
				Effect::RefreshFrames(camera) => {
					self.feed.refresh(CameraSelector::One(*camera)).await;
				},
				Effect::PersistSelection(camera) => {
					if let Some(selection) = &self.selection {
						selection.save(*camera).await;
					}
				},
				_ => {},
			}
		}
		Some((phase, effects))
	}

	async fn is_current(&self, generation: u64) -> bool {
		self.state.lock().await.generation == generation
	}

	async fn release(&self, generation: u64) {
		let mut state = self.state.lock().await;
		if state.generation == generation {
			state.poll.take();
		}
		self.finished_tx.send_replace(generation);
	}
}

fn poll_event(camera: CameraIndex, report: StatusReport) -> SwitchEvent {
	if let Some(err) = report.error {
		return SwitchEvent::PollFailed(err.to_string());
	}
	match report.reported() {
		Some(status) => SwitchEvent::Polled(status.clone()),
		None => SwitchEvent::Polled(AnalyzerStatus::unknown(camera)),
	}
}

async fn run_switch(shared: Arc<Shared>, generation: u64, camera: CameraIndex, token: CancellationToken, deadline: Instant) {
	drive_switch(&shared, generation, camera, &token, deadline).await;
	shared.release(generation).await;
}

async fn drive_switch(shared: &Shared, generation: u64, camera: CameraIndex, token: &CancellationToken, deadline: Instant) {
	info!("Requesting analyzer restart for camera {}", camera);
	let restart = tokio::select! {
		_ = token.cancelled() => return,
		result = time::timeout_at(deadline, shared.backend.restart_analyzer(camera)) => result,
	};
	let event = match restart {
		Err(_) => SwitchEvent::DeadlineElapsed,
		Ok(Ok(reply)) if reply.accepted() => SwitchEvent::RestartAccepted,
		Ok(Ok(reply)) => {
			warn!("Restart of camera {} rejected: {}", camera, reply.rejection_message());
			SwitchEvent::RestartRejected(reply.rejection_message())
		},
		Ok(Err(err)) => {
			warn!("Restart of camera {} failed: {}", camera, err);
			SwitchEvent::RestartFailed(err.to_string())
		},
	};
	let Some((_, effects)) = shared.apply(generation, event).await else { return };
	if !effects.contains(&Effect::BeginPolling(camera)) {
		return;
	}

	let mut polls = 0u32;
	loop {
		let wake = cmp::min(Instant::now() + shared.settings.poll_interval, deadline);
		tokio::select! {
			_ = token.cancelled() => return,
			_ = time::sleep_until(wake) => {},
		}
		if Instant::now() >= deadline {
			warn!("{}", SessionError::Timeout { camera, waited: shared.settings.timeout });
			shared.apply(generation, SwitchEvent::DeadlineElapsed).await;
			return;
		}
		polls += 1;
		let event = tokio::select! {
			_ = token.cancelled() => return,
			result = time::timeout_at(deadline, shared.poller.get_status(CameraSelector::One(camera))) => match result {
				Ok(report) => poll_event(camera, report),
				Err(_) => SwitchEvent::DeadlineElapsed,
			},
		};
		debug!("Switch poll {} for camera {}: {:?}", polls, camera, event);
		let Some((phase, _)) = shared.apply(generation, event).await else { return };
		match phase {
			SwitchPhase::Switching => {},
			SwitchPhase::Active => {
				info!("Camera {} active after {} poll(s)", camera, polls);
				return;
			},
			other => {
				warn!("Switch to camera {} ended as {:?}", camera, other);
				return;
			},
		}
	}
}



/// Sole owner of the current camera and of the in-flight switch request.
///
/// Everything else observes the session through `subscribe` / `subscribe_camera`.
#[derive(Clone)]
pub struct CameraSwitchController {
	shared: Arc<Shared>,
}

impl CameraSwitchController {
	pub fn new(
		backend: Arc<dyn AnalyzerBackend>,
		poller: Arc<AnalyzerStatusPoller>,
		feed: Arc<FrameFeed>,
		selection: Option<SelectionStore>,
		settings: SwitchSettings,
	) -> Self {
		let machine = SwitchMachine::new();
		let (view_tx, _) = watch::channel(machine.view().clone());
		let (camera_tx, _) = watch::channel(None);
		let (finished_tx, _) = watch::channel(0);
		CameraSwitchController {
			shared: Arc::new(Shared {
				backend,
				poller,
				feed,
				selection,
				settings,
				state: Mutex::new(ControllerState {
					machine,
					generation: 0,
					poll: None,
				}),
				view_tx,
				camera_tx,
				finished_tx,
			}),
		}
	}

	pub fn settings(&self) -> SwitchSettings {
		self.shared.settings
	}

	pub fn view(&self) -> SessionView {
		self.shared.view_tx.borrow().clone()
	}

	pub fn current_camera(&self) -> Option<CameraIndex> {
		*self.shared.camera_tx.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<SessionView> {
		self.shared.view_tx.subscribe()
	}

	pub fn subscribe_camera(&self) -> watch::Receiver<Option<CameraIndex>> {
		self.shared.camera_tx.subscribe()
	}

	/// Starts switching to `camera`, superseding any switch in flight.
	/// Returns false when `camera` is already live or already being switched to.
	pub async fn request_switch(&self, camera: CameraIndex) -> bool {
		let mut state = self.shared.state.lock().await;
		if !state.machine.accepts_request(camera) {
			debug!("Camera {} already current; ignoring switch request", camera);
			return false;
		}
		self.start_locked(&mut state, camera);
		true
	}

	/// Restarts the current camera's analyzer even if it is already active.
	pub async fn restart_current(&self) -> bool {
		let mut state = self.shared.state.lock().await;
		match state.machine.current_camera() {
			Some(camera) => {
				self.start_locked(&mut state, camera);
				true
			},
			None => {
				warn!("No camera is currently selected or active to restart");
				false
			},
		}
	}

	fn start_locked(&self, state: &mut ControllerState, camera: CameraIndex) {
		if let Some(previous) = state.poll.take() {
			info!("Cancelling in-flight switch before switching to camera {}", camera);
			previous.cancel();
		}
		state.generation += 1;
		let generation = state.generation;
		let now = Instant::now();

		let effects = state.machine.handle(SwitchEvent::Requested(camera), now);
		self.shared.apply_view_effects(&mut state.machine, &effects);
		self.shared.publish(&state.machine);

		let token = CancellationToken::new();
		let deadline = now + self.shared.settings.timeout;
		let task = tokio::spawn(run_switch(self.shared.clone(), generation, camera, token.clone(), deadline));
		state.poll = Some(PollHandle {
			token,
			task,
		});
	}

	/// Makes `camera` current without touching its analyzer. Ignored mid-switch.
	pub async fn select(&self, camera: CameraIndex) {
		let mut state = self.shared.state.lock().await;
		let effects = state.machine.handle(SwitchEvent::Selected(camera), Instant::now());
		self.shared.apply_view_effects(&mut state.machine, &effects);
		self.shared.publish(&state.machine);
	}

	/// Checks the current camera's analyzer outside a switch and reconciles the view with it.
	/// Dropped if a switch starts while the status request is out.
	pub async fn reconcile(&self) -> Option<SessionView> {
		let (generation, camera) = {
			let state = self.shared.state.lock().await;
			(state.generation, state.machine.current_camera()?)
		};
		let report = self.shared.poller.get_status(CameraSelector::One(camera)).await;
		let event = match (&report.error, report.reported()) {
			(Some(err), _) => SwitchEvent::ObserveFailed(err.to_string()),
			(None, Some(status)) => SwitchEvent::Observed(status.clone()),
			(None, None) => SwitchEvent::Observed(AnalyzerStatus::unknown(camera)),
		};
		self.shared.apply(generation, event).await?;
		Some(self.view())
	}

	/// Acknowledges a terminal state, returning the controller to idle.
	pub async fn dismiss(&self) {
		let mut state = self.shared.state.lock().await;
		state.machine.handle(SwitchEvent::Dismissed, Instant::now());
		self.shared.publish(&state.machine);
	}

	/// True while a switch task is still running.
	pub async fn poll_loop_running(&self) -> bool {
		let state = self.shared.state.lock().await;
		state.poll.as_ref().map_or(false, |handle| !handle.task.is_finished())
	}

	/// Waits until the latest switch task has finished, including its frame refresh and
	/// selection write. Returns at once if no switch was ever requested.
	pub async fn wait_finished(&self) {
		let latest = self.shared.state.lock().await.generation;
		let mut receiver = self.shared.finished_tx.subscribe();
		// A superseded task never reports; the newer one will.
		let _ = receiver.wait_for(|finished| *finished >= latest).await;
	}

	/// Waits until the view leaves the switching phase.
	pub async fn settled(&self) -> SessionView {
		let mut receiver = self.subscribe();
		let settled = receiver.wait_for(|view| view.phase != SwitchPhase::Switching).await
			.map(|view| view.clone());
		match settled {
			Ok(view) => view,
			Err(_) => self.view(),
		}
	}
}
