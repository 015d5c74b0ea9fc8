use std::time::Instant;

use rocket::http::Status;
use rocket::serde::json::{json, Json, Value};
use rocket::State;
use tokio::sync::RwLock;

use log::{debug, info, warn};

use crate::backend::wire::{CamerasPayload, STATUS_SUCCESS};
use crate::common::{CameraIndex, CameraSelector};
use crate::config::SimulatorConfig;
use crate::simulator::fleet::{self, AnalyzerFleet, FleetError};



const DEFAULT_FRAME_LIMIT: u32 = 30;

#[get("/cameras")]
async fn list_cameras(fleet: &State<RwLock<AnalyzerFleet>>) -> Json<CamerasPayload> {
	let fleet = fleet.read().await;
	let cameras = fleet.running_cameras(Instant::now());
	info!("Available cameras (from running analyzers): {:?}", cameras.iter().map(|camera| camera.index).collect::<Vec<_>>());
	Json(CamerasPayload {
		status: STATUS_SUCCESS.to_string(),
		cameras,
		message: None,
	})
}

#[get("/analyzer/status?<camera_index>&<all>")]
async fn analyzer_status(camera_index: Option<CameraIndex>, all: Option<bool>, fleet: &State<RwLock<AnalyzerFleet>>) -> Value {
	let fleet = fleet.read().await;
	let now = Instant::now();
	if all.unwrap_or(false) {
		json!(fleet.all_status(now))
	} else {
		let status = fleet.status(camera_index.unwrap_or(0), now);
		debug!("Analyzer status for camera {:?}: {:?}", camera_index, status);
		json!(status)
	}
}

/// Accepts the index as a number or a numeric string, like the dashboard sends it.
fn parse_camera_index(body: &Value) -> Result<CameraIndex, String> {
	let value = match body.get("camera_index") {
		Some(Value::Null) | None => return Err("No camera_index provided".to_string()),
		Some(value) => value,
	};
	let parsed = match value {
		Value::Number(number) => number.as_u64().and_then(|index| CameraIndex::try_from(index).ok()),
		Value::String(text) => text.trim().parse().ok(),
		_ => None,
	};
	parsed.ok_or_else(|| format!("Invalid camera index: {}", value))
}

#[post("/analyzer/restart", data = "<body>")]
async fn restart_analyzer(body: Json<Value>, fleet: &State<RwLock<AnalyzerFleet>>) -> (Status, Value) {
	let camera = match parse_camera_index(&body) {
		Ok(camera) => camera,
		Err(message) => return (Status::BadRequest, json!({"status": "error", "message": message})),
	};
	info!("Restart requested for camera {}", camera);

	let mut fleet = fleet.write().await;
	let now = Instant::now();
	match fleet.restart(camera, now) {
		Ok(()) => {
			debug!("Camera {} reports active in {:?}", camera, fleet::remaining_startup(&fleet, camera, now));
			(Status::Accepted, json!({
				"status": "pending",
				"message": format!("Analyzer for camera {} is starting. Please poll status.", camera),
			}))
		},
		Err(err @ FleetError::UnknownCamera(_)) => {
			(Status::BadRequest, json!({"status": "error", "message": err.to_string()}))
		},
		Err(err) => {
			warn!("Failed to restart analyzer for camera {}: {}", camera, err);
			(Status::InternalServerError, json!({"status": "error", "message": "Failed to start analyzer thread"}))
		},
	}
}

#[post("/analyzer/start-all")]
async fn start_all(fleet: &State<RwLock<AnalyzerFleet>>) -> Value {
	let mut fleet = fleet.write().await;
	let (started, cameras) = fleet.start_all(Instant::now());
	info!("start-all started {} analyzer(s) across cameras {:?}", started, cameras);
	json!({
		"status": "success",
		"started_count": started,
		"cameras": cameras,
	})
}

#[post("/analyzer/stop-all")]
async fn stop_all(fleet: &State<RwLock<AnalyzerFleet>>) -> Value {
	let mut fleet = fleet.write().await;
	let stopped = fleet.stop_all(Instant::now());
	info!("stop-all stopped {} analyzer(s)", stopped);
	json!({
		"status": "success",
		"stopped_count": stopped,
	})
}

#[get("/analyzer/frames?<limit>&<camera_index>")]
async fn recent_frames(limit: Option<u32>, camera_index: Option<i64>, fleet: &State<RwLock<AnalyzerFleet>>) -> (Status, Value) {
	let selector = match camera_index.unwrap_or(0) {
		-1 => CameraSelector::All,
		index => match CameraIndex::try_from(index) {
			Ok(index) => CameraSelector::One(index),
			Err(_) => return (Status::BadRequest, json!({
				"status": "error",
				"message": format!("Invalid camera index: {}", index),
			})),
		},
	};
	let limit = limit.unwrap_or(DEFAULT_FRAME_LIMIT) as usize;
	let mut fleet = fleet.write().await;
	(Status::Ok, json!(fleet.recent_frames(selector, limit, Instant::now())))
}

#[catch(404)]
fn not_found() -> Value {
	json!({
		"status": "error",
		"reason": "Resource was not found."
	})
}



pub fn stage(settings: SimulatorConfig, start_on_launch: bool) -> rocket::fairing::AdHoc {
	let mut fleet = AnalyzerFleet::new(settings);
	if start_on_launch {
		fleet.start_all(Instant::now());
	}

	// tokio's RwLock so status polls from several dashboards do not block each other, and a
	// waiting restart is not starved by a stream of polls.
	let fleet_lock = RwLock::new(fleet);

	rocket::fairing::AdHoc::on_ignite("Analyzer simulator", move |rocket| async move {
		rocket
			.manage(fleet_lock)
			.register("/", catchers![not_found])
			.mount("/api", routes![
				list_cameras,
				analyzer_status,
				restart_analyzer,
				start_all,
				stop_all,
				recent_frames,
			])
	})
}
