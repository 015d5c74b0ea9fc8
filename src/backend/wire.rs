//! JSON payloads exchanged with the analyzer backend, and their decoding into the client's model.
//!
//! The same structs are serialized by the simulated backend, so both sides agree on field names.

use std::collections::BTreeMap;

use crate::common::{AnalyzerState, AnalyzerStatus, CameraIndex, CameraList, CameraSelector, Frame, StatusMap};
use crate::error::{SessionError, SessionResult};



pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ERROR: &str = "error";

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct CamerasPayload {
	pub status: String,
	#[serde(default)]
	pub cameras: CameraList,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct StatusPayload {
	pub status: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub camera_index: Option<CameraIndex>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frame_count: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct AllStatusPayload {
	/// Keyed by the camera index rendered as a string.
	pub cameras: BTreeMap<String, StatusPayload>,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct RestartBody {
	pub camera_index: CameraIndex,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct CommandPayload {
	pub status: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub started_count: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stopped_count: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cameras: Option<Vec<CameraIndex>>,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
pub struct FramesPayload {
	pub status: String,
	#[serde(default)]
	pub frames: Vec<Frame>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub count: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source: Option<String>,
	#[serde(default)]
	pub all_cameras: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub camera_index: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}



/// Outcome of a fleet command (restart, start-all, stop-all) as reported in the payload.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum CommandStatus {
	Success,
	Pending,
	Rejected(String),
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct CommandReply {
	pub status: CommandStatus,
	pub message: Option<String>,
	pub started_count: Option<u32>,
	pub stopped_count: Option<u32>,
}

impl CommandReply {
	pub fn accepted(&self) -> bool {
		matches!(self.status, CommandStatus::Success | CommandStatus::Pending)
	}

	/// Message to show the operator when the command was not accepted.
	pub fn rejection_message(&self) -> String {
		match (&self.status, &self.message) {
			(_, Some(message)) => message.clone(),
			(CommandStatus::Rejected(status), None) => format!("Backend replied \"{}\"", status),
			_ => "Unknown error".to_string(),
		}
	}
}

impl From<CommandPayload> for CommandReply {
	fn from(payload: CommandPayload) -> Self {
		let status = match payload.status.as_str() {
			STATUS_SUCCESS => CommandStatus::Success,
			STATUS_PENDING => CommandStatus::Pending,
			other => CommandStatus::Rejected(other.to_string()),
		};
		CommandReply {
			status,
			message: payload.message,
			started_count: payload.started_count,
			stopped_count: payload.stopped_count,
		}
	}
}

/// Recent frames plus the backend's notes about where they came from.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct FrameBatch {
	pub frames: Vec<Frame>,
	pub source: Option<String>,
	pub all_cameras: bool,
}



fn backend_message(message: Option<String>, fallback: &str) -> String {
	message.unwrap_or_else(|| fallback.to_string())
}

pub fn decode_cameras(http_ok: bool, body: &str) -> SessionResult<CameraList> {
	let payload: CamerasPayload = match serde_json::from_str(body) {
		Ok(payload) => payload,
		Err(_) if !http_ok => return Err(SessionError::Backend("Camera list request failed".to_string())),
		Err(err) => return Err(err.into()),
	};
	if !http_ok || payload.status != STATUS_SUCCESS {
		return Err(SessionError::Backend(backend_message(payload.message, "Camera list request failed")));
	}
	Ok(payload.cameras)
}

fn status_from_payload(fallback_index: CameraIndex, payload: StatusPayload) -> AnalyzerStatus {
	AnalyzerStatus {
		camera_index: payload.camera_index.unwrap_or(fallback_index),
		state: AnalyzerState::from_wire(&payload.status),
		frame_count: payload.frame_count.unwrap_or(0),
	}
}

pub fn decode_status(selector: CameraSelector, http_ok: bool, body: &str) -> SessionResult<StatusMap> {
	if !http_ok {
		let message = serde_json::from_str::<StatusPayload>(body).ok().and_then(|payload| payload.message);
		return Err(SessionError::Backend(backend_message(message, "Status request failed")));
	}
	let mut statuses = StatusMap::new();
	match selector {
		CameraSelector::One(index) => {
			let payload: StatusPayload = serde_json::from_str(body)?;
			if payload.status == STATUS_ERROR {
				return Err(SessionError::Backend(backend_message(payload.message, "Status request failed")));
			}
			let status = status_from_payload(index, payload);
			statuses.insert(status.camera_index, status);
		},
		CameraSelector::All => {
			let payload: AllStatusPayload = serde_json::from_str(body)?;
			for (key, camera_payload) in payload.cameras {
				let index: CameraIndex = key.parse()
					.map_err(|_| SessionError::MalformedResponse(format!("camera key \"{}\" is not an index", key)))?;
				statuses.insert(index, status_from_payload(index, camera_payload));
			}
		},
	}
	Ok(statuses)
}

/// Fleet commands report failures in the JSON body, so the body is decoded whatever the HTTP status.
pub fn decode_command(http_ok: bool, body: &str) -> SessionResult<CommandReply> {
	match serde_json::from_str::<CommandPayload>(body) {
		Ok(payload) => Ok(payload.into()),
		Err(_) if !http_ok => Err(SessionError::Backend("Command request failed".to_string())),
		Err(err) => Err(err.into()),
	}
}

pub fn decode_frames(http_ok: bool, body: &str) -> SessionResult<FrameBatch> {
	let payload: FramesPayload = match serde_json::from_str(body) {
		Ok(payload) => payload,
		Err(_) if !http_ok => return Err(SessionError::Backend("Frame request failed".to_string())),
		Err(err) => return Err(err.into()),
	};
	if !http_ok || payload.status != STATUS_SUCCESS {
		return Err(SessionError::Backend(backend_message(payload.message, "Error loading frames")));
	}
	Ok(FrameBatch {
		frames: payload.frames,
		source: payload.source,
		all_cameras: payload.all_cameras,
	})
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn camera_list_decodes() {
		let cameras = decode_cameras(true, r#"{"status":"success","cameras":[{"index":0,"name":"Camera 0"},{"index":2,"name":"Dock"}]}"#).unwrap();
		assert_eq!(cameras.len(), 2);
		assert_eq!(cameras[1].name, "Dock");
	}

	#[test]
	fn camera_list_error_status_is_backend_error() {
		let result = decode_cameras(false, r#"{"status":"error","message":"boom"}"#);
		assert_eq!(result, Err(SessionError::Backend("boom".to_string())));
	}

	#[test]
	fn single_status_keeps_reported_camera_index() {
		let statuses = decode_status(CameraSelector::One(1), true, r#"{"status":"active","frame_count":40,"camera_index":0}"#).unwrap();
		let status = &statuses[&0];
		assert_eq!(status.state, AnalyzerState::Active);
		assert!(!status.is_active_on(1));
	}

	#[test]
	fn all_status_decodes_string_keys() {
		let statuses = decode_status(CameraSelector::All, true, r#"{"cameras":{
			"0":{"status":"active","frame_count":5,"camera_index":0},
			"3":{"status":"inactive","frame_count":0,"camera_index":3}
		}}"#).unwrap();
		assert_eq!(statuses.len(), 2);
		assert_eq!(statuses[&3].state, AnalyzerState::Inactive);
	}

	#[test]
	fn all_status_with_bad_key_is_malformed() {
		let result = decode_status(CameraSelector::All, true, r#"{"cameras":{"front":{"status":"active"}}}"#);
		assert!(matches!(result, Err(SessionError::MalformedResponse(_))));
	}

	#[test]
	fn status_http_failure_is_backend_error() {
		let result = decode_status(CameraSelector::One(0), false, "<html>Internal Server Error</html>");
		assert!(matches!(result, Err(SessionError::Backend(_))));
	}

	#[test]
	fn restart_replies() {
		let pending = decode_command(true, r#"{"status":"pending","message":"Analyzer for camera 1 is starting. Please poll status."}"#).unwrap();
		assert!(pending.accepted());

		let rejected = decode_command(false, r#"{"status":"error","message":"Invalid camera index: x"}"#).unwrap();
		assert!(!rejected.accepted());
		assert_eq!(rejected.rejection_message(), "Invalid camera index: x");

		assert!(matches!(decode_command(true, "not json"), Err(SessionError::MalformedResponse(_))));
	}

	#[test]
	fn frames_payload_decodes() {
		let batch = decode_frames(true, r#"{"status":"success","frames":[
			{"id":2,"frame_number":40,"path":"/a.jpg","timestamp":"t","objects":["car"],"object_count":1,"camera_index":1}
		],"count":1,"source":"database","all_cameras":false}"#).unwrap();
		assert_eq!(batch.frames.len(), 1);
		assert_eq!(batch.source.as_deref(), Some("database"));
	}
}
