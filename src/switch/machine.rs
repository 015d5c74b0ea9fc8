//! The camera-switch state machine, free of I/O and timers.
//!
//! `SwitchMachine::handle` maps one event to a transition plus the effects the driver must
//! carry out. View state (badge, message, controls) is updated in place.

use std::fmt;

use tokio::time::Instant;

use crate::common::{AnalyzerState, AnalyzerStatus, CameraIndex, StreamSource};



#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum SwitchPhase {
	Idle,
	Switching,
	Active,
	TimedOut,
	Failed,
}

impl SwitchPhase {
	pub fn is_terminal(&self) -> bool {
		matches!(self, SwitchPhase::Active | SwitchPhase::TimedOut | SwitchPhase::Failed)
	}
}

#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum RequestState {
	Pending,
	Active,
	TimedOut,
	Failed,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct SwitchRequest {
	pub requested_camera_index: CameraIndex,
	pub issued_at: Instant,
	pub state: RequestState,
}

#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum Badge {
	Idle,
	Switching,
	Active,
	Inactive,
	Timeout,
	Error,
}

impl fmt::Display for Badge {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			Badge::Idle => "Idle",
			Badge::Switching => "Switching",
			Badge::Active => "Active",
			Badge::Inactive => "Inactive",
			Badge::Timeout => "Timeout",
			Badge::Error => "Error",
		};
		write!(f, "{}", label)
	}
}

/// Everything the single-stream view shows.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct SessionView {
	pub phase: SwitchPhase,
	pub badge: Badge,
	pub message: String,
	pub camera: Option<CameraIndex>,
	pub stream: Option<StreamSource>,
	pub controls_enabled: bool,
	pub frame_count: Option<u64>,
	pub request: Option<SwitchRequest>,
}

impl SessionView {
	pub fn initial() -> Self {
		SessionView {
			phase: SwitchPhase::Idle,
			badge: Badge::Idle,
			message: "No camera selected".to_string(),
			camera: None,
			stream: None,
			controls_enabled: true,
			frame_count: None,
			request: None,
		}
	}
}

impl fmt::Display for SessionView {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[{}] {}", self.badge, self.message)?;
		if let Some(frame_count) = self.frame_count {
			write!(f, " | Frames Processed: {}", frame_count)?;
		}
		match &self.stream {
			Some(stream) => write!(f, " | stream {}", stream.url)?,
			None => write!(f, " | no stream")?,
		}
		if !self.controls_enabled {
			write!(f, " | controls locked")?;
		}
		Ok(())
	}
}



#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum SwitchEvent {
	/// User asked for `camera`. Always starts a new request.
	Requested(CameraIndex),
	/// Restart command answered success or pending.
	RestartAccepted,
	/// Restart command answered with an error status.
	RestartRejected(String),
	/// Restart command never got an answer.
	RestartFailed(String),
	Polled(AnalyzerStatus),
	PollFailed(String),
	DeadlineElapsed,
	/// Status check outside a switch (initial load, reload, periodic reconciliation).
	Observed(AnalyzerStatus),
	ObserveFailed(String),
	/// Camera picked for viewing without restarting its analyzer (initial load).
	Selected(CameraIndex),
	/// User acknowledged a terminal state.
	Dismissed,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum Effect {
	CancelPolling,
	ClearStream,
	/// Drop the previous camera's frames from the listing.
	ClearFrames,
	SendRestart(CameraIndex),
	BeginPolling(CameraIndex),
	AttachStream(CameraIndex),
	RefreshFrames(CameraIndex),
	PersistSelection(CameraIndex),
}



#[derive(Debug)]
pub struct SwitchMachine {
	view: SessionView,
	target: Option<CameraIndex>,
}

impl SwitchMachine {
	pub fn new() -> Self {
		SwitchMachine {
			view: SessionView::initial(),
			target: None,
		}
	}

	pub fn view(&self) -> &SessionView {
		&self.view
	}

	pub fn phase(&self) -> SwitchPhase {
		self.view.phase
	}

	pub fn current_camera(&self) -> Option<CameraIndex> {
		self.view.camera
	}

	/// Whether a request for `camera` would do anything. Re-requesting the camera that is
	/// already live or already being switched to is a no-op.
	pub fn accepts_request(&self, camera: CameraIndex) -> bool {
		!(self.view.camera == Some(camera) && matches!(self.view.phase, SwitchPhase::Switching | SwitchPhase::Active))
	}

	/// Stream attachment is done by the driver, which knows how to build URLs.
	pub fn set_stream(&mut self, stream: Option<StreamSource>) {
		self.view.stream = stream;
	}

	fn set_badge(&mut self, badge: Badge, message: String) {
		self.view.badge = badge;
		self.view.message = message;
	}

	fn finish(&mut self, phase: SwitchPhase, request_state: RequestState) {
		self.view.phase = phase;
		self.view.controls_enabled = true;
		self.target = None;
		if let Some(request) = self.view.request.as_mut() {
			request.state = request_state;
		}
	}

	pub fn handle(&mut self, event: SwitchEvent, now: Instant) -> Vec<Effect> {
		match (self.view.phase, event) {
			(phase, SwitchEvent::Requested(camera)) => {
				let mut effects = Vec::new();
				if phase == SwitchPhase::Switching {
					effects.push(Effect::CancelPolling);
				}
				self.target = Some(camera);
				self.view.phase = SwitchPhase::Switching;
				self.view.camera = Some(camera);
				self.view.controls_enabled = false;
				self.view.stream = None;
				self.view.frame_count = None;
				self.view.request = Some(SwitchRequest {
					requested_camera_index: camera,
					issued_at: now,
					state: RequestState::Pending,
				});
				self.set_badge(Badge::Switching, format!("Attempting to switch to camera {}...", camera));
				effects.push(Effect::ClearStream);
				effects.push(Effect::ClearFrames);
				effects.push(Effect::SendRestart(camera));
				effects
			},

			(SwitchPhase::Switching, SwitchEvent::RestartAccepted) => {
				let Some(camera) = self.target else { return Vec::new() };
				self.set_badge(Badge::Switching, format!("Switching to camera {}...", camera));
				vec![Effect::BeginPolling(camera)]
			},
			(SwitchPhase::Switching, SwitchEvent::RestartRejected(message)) => {
				self.finish(SwitchPhase::Failed, RequestState::Failed);
				self.set_badge(Badge::Error, message);
				Vec::new()
			},
			(SwitchPhase::Switching, SwitchEvent::RestartFailed(message)) => {
				self.finish(SwitchPhase::Failed, RequestState::Failed);
				self.set_badge(Badge::Error, format!("Failed to switch camera: {}", message));
				Vec::new()
			},

			(SwitchPhase::Switching, SwitchEvent::Polled(status)) => {
				let Some(camera) = self.target else { return Vec::new() };
				if status.is_active_on(camera) {
					self.finish(SwitchPhase::Active, RequestState::Active);
					self.view.frame_count = Some(status.frame_count);
					self.set_badge(Badge::Active, format!("Analyzer active on camera {}", camera));
					vec![
						Effect::CancelPolling,
						Effect::AttachStream(camera),
						Effect::RefreshFrames(camera),
						Effect::PersistSelection(camera),
					]
				} else if status.camera_index == camera && status.state == AnalyzerState::Inactive {
					self.set_badge(Badge::Inactive, "Analyzer inactive".to_string());
					Vec::new()
				} else {
					self.set_badge(Badge::Switching, format!("Waiting for camera {} to become active...", camera));
					Vec::new()
				}
			},
			(SwitchPhase::Switching, SwitchEvent::PollFailed(_)) => {
				self.set_badge(Badge::Error, "Error polling analyzer status".to_string());
				Vec::new()
			},
			(SwitchPhase::Switching, SwitchEvent::DeadlineElapsed) => {
				self.finish(SwitchPhase::TimedOut, RequestState::TimedOut);
				self.set_badge(Badge::Timeout, "Analyzer did not become active in time.".to_string());
				vec![Effect::CancelPolling]
			},

			// Mid-switch the view belongs to the switch; outside observations must not leak in.
			(SwitchPhase::Switching, SwitchEvent::Observed(_) | SwitchEvent::ObserveFailed(_) | SwitchEvent::Selected(_)) => Vec::new(),

			(_, SwitchEvent::Selected(camera)) => {
				if self.view.camera == Some(camera) {
					return Vec::new();
				}
				self.view.phase = SwitchPhase::Idle;
				self.view.camera = Some(camera);
				self.view.frame_count = None;
				self.view.request = None;
				self.view.stream = None;
				self.set_badge(Badge::Idle, format!("Camera {} selected", camera));
				vec![Effect::ClearStream]
			},

			(_, SwitchEvent::Observed(status)) => self.observe(status),
			(_, SwitchEvent::ObserveFailed(_)) => {
				self.view.phase = SwitchPhase::Idle;
				self.view.stream = None;
				self.set_badge(Badge::Error, "Error fetching status from server".to_string());
				vec![Effect::ClearStream]
			},

			(phase, SwitchEvent::Dismissed) if phase.is_terminal() => {
				self.view.phase = SwitchPhase::Idle;
				self.view.request = None;
				Vec::new()
			},

			// Late answers for a phase we already left.
			_ => Vec::new(),
		}
	}

	fn observe(&mut self, status: AnalyzerStatus) -> Vec<Effect> {
		match status.state {
			AnalyzerState::Active => {
				let camera = status.camera_index;
				let reattach = self.view.stream.as_ref().map_or(true, |stream| stream.camera != camera);
				self.view.phase = SwitchPhase::Active;
				self.view.camera = Some(camera);
				self.view.frame_count = Some(status.frame_count);
				self.view.controls_enabled = true;
				self.set_badge(Badge::Active, "Analyzer active".to_string());
				if reattach {
					vec![Effect::AttachStream(camera)]
				} else {
					Vec::new()
				}
			},
			_ => {
				self.view.phase = SwitchPhase::Idle;
				self.view.frame_count = None;
				self.view.controls_enabled = true;
				if self.view.camera.is_none() {
					self.view.camera = Some(status.camera_index);
				}
				self.set_badge(Badge::Inactive, "Inactive".to_string());
				self.view.stream = None;
				vec![Effect::ClearStream]
			},
		}
	}
}

impl Default for SwitchMachine {
	fn default() -> Self {
		Self::new()
	}
}
