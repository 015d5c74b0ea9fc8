use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::{CameraIndex, CameraList, CameraSelector, StatusMap};
use crate::error::SessionResult;

pub mod http;
pub mod wire;

pub use self::http::HttpBackend;
pub use self::wire::{CommandReply, CommandStatus, FrameBatch};



/// Everything the session components need from the analyzer backend.
///
/// `HttpBackend` is the real implementation; tests drive the components with scripted ones.
#[rocket::async_trait]
pub trait AnalyzerBackend: Send + Sync {
	async fn list_cameras(&self) -> SessionResult<CameraList>;

	async fn analyzer_status(&self, selector: CameraSelector) -> SessionResult<StatusMap>;

	async fn restart_analyzer(&self, camera: CameraIndex) -> SessionResult<CommandReply>;

	async fn start_all(&self) -> SessionResult<CommandReply>;

	async fn stop_all(&self) -> SessionResult<CommandReply>;

	async fn recent_frames(&self, selector: CameraSelector, limit: u32) -> SessionResult<FrameBatch>;

	/// MJPEG stream location. `cache_buster` keeps image elements from reusing an old connection.
	fn stream_url(&self, camera: CameraIndex, cache_buster: u128) -> String {
		format!("/api/stream?camera_index={}&t={}", camera, cache_buster)
	}

	fn thumbnail_url(&self, camera: CameraIndex, cache_buster: u128) -> String {
		format!("/api/camera-thumbnail/{}?t={}", camera, cache_buster)
	}
}

/// Milliseconds since the epoch, used as the `t` cache-busting parameter.
pub fn cache_buster() -> u128 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_millis())
		.unwrap_or_default()
}
