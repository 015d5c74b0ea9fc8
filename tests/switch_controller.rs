mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant};

use analyzer_session::backend::AnalyzerBackend;
use analyzer_session::common::CameraSelector;
use analyzer_session::feed::FrameFeed;
use analyzer_session::selection::SelectionStore;
use analyzer_session::status::{AnalyzerStatusPoller, NO_ANALYZERS_RUNNING};
use analyzer_session::switch::{Badge, CameraSwitchController, RequestState, SwitchPhase, SwitchSettings};
use analyzer_session::SessionError;

use support::{Readiness, ScriptedBackend};



fn controller_with(backend: &Arc<ScriptedBackend>, selection: Option<SelectionStore>, settings: SwitchSettings) -> (CameraSwitchController, Arc<FrameFeed>) {
	let backend: Arc<dyn AnalyzerBackend> = backend.clone();
	let poller = Arc::new(AnalyzerStatusPoller::new(backend.clone()));
	let feed = Arc::new(FrameFeed::new(backend.clone(), 30));
	(CameraSwitchController::new(backend, poller, feed.clone(), selection, settings), feed)
}

fn controller(backend: &Arc<ScriptedBackend>, selection: Option<SelectionStore>) -> CameraSwitchController {
	controller_with(backend, selection, SwitchSettings::default()).0
}

#[tokio::test(start_paused = true)]
async fn camera_ready_on_first_poll_is_active_within_one_interval() {
	let backend = ScriptedBackend::new(&[0, 1]);
	backend.set_readiness(1, Readiness::AfterPolls(1));
	let controller = controller(&backend, None);

	let start = Instant::now();
	assert!(controller.request_switch(1).await);
	let view = controller.settled().await;

	assert_eq!(view.phase, SwitchPhase::Active);
	assert_eq!(view.badge, Badge::Active);
	assert_eq!(view.message, "Analyzer active on camera 1");
	assert!(view.controls_enabled);
	assert!(start.elapsed() < SwitchSettings::default().poll_interval + Duration::from_millis(10));
	assert_eq!(backend.status_polls_for(1), 1);
}

#[tokio::test(start_paused = true)]
async fn camera_that_never_starts_times_out() {
	let backend = ScriptedBackend::new(&[0]);
	let controller = controller(&backend, None);

	let start = Instant::now();
	controller.request_switch(0).await;
	let view = controller.settled().await;

	assert_eq!(view.phase, SwitchPhase::TimedOut);
	assert_eq!(view.message, "Analyzer did not become active in time.");
	assert!(view.controls_enabled);
	assert!(view.stream.is_none());
	assert_eq!(view.request.map(|request| request.state), Some(RequestState::TimedOut));
	let waited = start.elapsed();
	assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(32), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn poll_interval_longer_than_timeout_does_not_overshoot() {
	let backend = ScriptedBackend::new(&[0]);
	backend.set_readiness(0, Readiness::AfterPolls(1));
	let settings = SwitchSettings {
		poll_interval: Duration::from_secs(45),
		timeout: Duration::from_secs(30),
	};
	let (controller, _) = controller_with(&backend, None, settings);

	let start = Instant::now();
	controller.request_switch(0).await;
	let view = controller.settled().await;

	assert_eq!(view.phase, SwitchPhase::TimedOut);
	let waited = start.elapsed();
	assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31), "waited {:?}", waited);
	assert_eq!(backend.status_polls_for(0), 0);
}

#[tokio::test(start_paused = true)]
async fn hanging_status_call_still_times_out() {
	let backend = ScriptedBackend::new(&[0]);
	backend.set_readiness(0, Readiness::Hang);
	let controller = controller(&backend, None);

	let start = Instant::now();
	controller.request_switch(0).await;
	let view = controller.settled().await;

	assert_eq!(view.phase, SwitchPhase::TimedOut);
	assert!(view.controls_enabled);
	assert!(start.elapsed() < Duration::from_secs(31));
	controller.wait_finished().await;
	assert!(!controller.poll_loop_running().await);
}

#[tokio::test(start_paused = true)]
async fn newer_request_supersedes_the_running_switch() {
	let backend = ScriptedBackend::new(&[0, 1]);
	backend.set_readiness(1, Readiness::AfterPolls(1));
	let controller = controller(&backend, None);

	controller.request_switch(0).await;
	time::sleep(Duration::from_millis(2500)).await;
	let polls_of_first = backend.status_polls_for(0);
	assert_eq!(polls_of_first, 2);

	controller.request_switch(1).await;
	let view = controller.settled().await;
	assert_eq!(view.phase, SwitchPhase::Active);
	assert_eq!(view.camera, Some(1));
	controller.wait_finished().await;

	time::sleep(Duration::from_secs(60)).await;
	assert_eq!(backend.status_polls_for(0), polls_of_first);
	assert_eq!(controller.view().phase, SwitchPhase::Active);
	assert_eq!(controller.view().camera, Some(1));
	assert!(!controller.poll_loop_running().await);
}

#[tokio::test(start_paused = true)]
async fn repeated_request_for_the_same_camera_is_ignored() {
	let backend = ScriptedBackend::new(&[0]);
	backend.set_readiness(0, Readiness::AfterPolls(3));
	let controller = controller(&backend, None);

	assert!(controller.request_switch(0).await);
	assert!(!controller.request_switch(0).await);
	controller.settled().await;
	assert!(!controller.request_switch(0).await);
	assert_eq!(backend.script().restarts, vec![0]);

	assert!(controller.restart_current().await);
	assert_eq!(controller.settled().await.phase, SwitchPhase::Active);
	assert_eq!(backend.script().restarts, vec![0, 0]);
}

#[tokio::test(start_paused = true)]
async fn restart_transport_failure_fails_without_polling() {
	let backend = ScriptedBackend::new(&[0]);
	backend.script().restart_error = Some(SessionError::Network("connection refused".to_string()));
	let controller = controller(&backend, None);

	controller.request_switch(0).await;
	let view = controller.settled().await;

	assert_eq!(view.phase, SwitchPhase::Failed);
	assert_eq!(view.badge, Badge::Error);
	assert!(view.message.starts_with("Failed to switch camera:"), "{}", view.message);
	assert!(view.controls_enabled);
	controller.wait_finished().await;
	assert_eq!(backend.status_polls_for(0), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_restart_shows_backend_message() {
	let backend = ScriptedBackend::new(&[0]);
	backend.script().restart_rejection = Some("Failed to start analyzer thread".to_string());
	let controller = controller(&backend, None);

	controller.request_switch(0).await;
	let view = controller.settled().await;

	assert_eq!(view.phase, SwitchPhase::Failed);
	assert_eq!(view.message, "Failed to start analyzer thread");

	controller.dismiss().await;
	assert_eq!(controller.view().phase, SwitchPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn status_errors_during_a_switch_keep_polling() {
	let backend = ScriptedBackend::new(&[0]);
	backend.set_readiness(0, Readiness::AfterPolls(1));
	backend.script().status_error = Some(SessionError::Network("timed out".to_string()));
	let controller = controller(&backend, None);

	controller.request_switch(0).await;
	time::sleep(Duration::from_millis(1500)).await;
	assert_eq!(controller.view().phase, SwitchPhase::Switching);
	assert_eq!(controller.view().message, "Error polling analyzer status");

	backend.script().status_error = None;
	assert_eq!(controller.settled().await.phase, SwitchPhase::Active);
}

#[tokio::test(start_paused = true)]
async fn switch_replaces_the_live_camera_and_persists() {
	let dir = tempfile::tempdir().unwrap();
	let store = SelectionStore::new(dir.path().join("session.json"));
	let backend = ScriptedBackend::new(&[0, 1]);
	backend.set_active(0);
	backend.set_readiness(1, Readiness::AfterPolls(2));
	let (controller, feed) = controller_with(&backend, Some(store.clone()), SwitchSettings::default());

	controller.select(0).await;
	let live = controller.reconcile().await.expect("camera 0 selected");
	assert_eq!(live.phase, SwitchPhase::Active);
	assert_eq!(live.stream.map(|stream| stream.camera), Some(0));
	assert_eq!(feed.refresh(CameraSelector::One(0)).await.frames.len(), 1);

	let mut views = controller.subscribe();
	views.borrow_and_update();
	let mut frames = feed.subscribe();
	frames.borrow_and_update();

	controller.request_switch(1).await;
	let pending = views.borrow_and_update().clone();
	assert_eq!(pending.phase, SwitchPhase::Switching);
	assert_eq!(pending.message, "Attempting to switch to camera 1...");
	assert!(pending.stream.is_none());
	assert!(!pending.controls_enabled);
	assert!(frames.borrow_and_update().frames.is_empty());

	let view = controller.settled().await;
	controller.wait_finished().await;

	assert_eq!(view.phase, SwitchPhase::Active);
	assert_eq!(view.message, "Analyzer active on camera 1");
	assert_eq!(backend.status_polls_for(1), 2);
	let stream = view.stream.expect("stream attached");
	assert_eq!(stream.camera, 1);
	assert!(stream.url.contains("camera_index=1"));
	assert_eq!(backend.script().frame_calls, vec![CameraSelector::One(0), CameraSelector::One(1)]);
	assert_eq!(frames.borrow_and_update().selector, Some(CameraSelector::One(1)));
	assert_eq!(store.load().await, Some(1));
}

#[tokio::test]
async fn all_status_with_nothing_running() {
	let backend = ScriptedBackend::new(&[0, 1]);
	let poller = AnalyzerStatusPoller::new(backend.clone());

	let report = poller.get_status(CameraSelector::All).await;
	assert!(report.error.is_none());
	assert_eq!(report.summary(), NO_ANALYZERS_RUNNING);

	backend.set_active(1);
	let report = poller.get_status(CameraSelector::All).await;
	assert_eq!(report.active_cameras(), vec![1]);
}

#[tokio::test]
async fn failed_single_status_is_unknown() {
	let backend = ScriptedBackend::new(&[0]);
	backend.script().status_error = Some(SessionError::Backend("boom".to_string()));
	let poller = AnalyzerStatusPoller::new(backend.clone());

	let report = poller.get_status(CameraSelector::One(0)).await;
	assert_eq!(report.summary(), "Error retrieving camera status.");
	assert_eq!(report.status_of(0).state, analyzer_session::common::AnalyzerState::Unknown);
}
