//! Error taxonomy shared by every component.
//!
//! Errors are `Clone` because components keep the last one around as display state
//! (registry snapshots, status reports, frame listings) instead of propagating it.

use std::time::Duration;

use thiserror::Error;

use crate::common::CameraIndex;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
	/// The request never produced an HTTP response.
	#[error("network error: {0}")]
	Network(String),

	/// The backend answered, but with a non-success status.
	#[error("backend error: {0}")]
	Backend(String),

	#[error("camera {camera} did not become active within {waited:?}")]
	Timeout { camera: CameraIndex, waited: Duration },

	#[error("malformed response: {0}")]
	MalformedResponse(String),

	#[error("configuration error: {0}")]
	Config(String),

	#[error("storage error: {0}")]
	Storage(String),
}

impl From<reqwest::Error> for SessionError {
	fn from(err: reqwest::Error) -> Self {
		if err.is_decode() {
			SessionError::MalformedResponse(err.to_string())
		} else {
			SessionError::Network(err.to_string())
		}
	}
}

impl From<serde_json::Error> for SessionError {
	fn from(err: serde_json::Error) -> Self {
		SessionError::MalformedResponse(err.to_string())
	}
}

impl From<url::ParseError> for SessionError {
	fn from(err: url::ParseError) -> Self {
		SessionError::Config(format!("invalid backend URL: {}", err))
	}
}
