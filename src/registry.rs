use std::sync::Arc;

use log::{info, warn};
use tokio::sync::RwLock;

use crate::backend::AnalyzerBackend;
use crate::common::{CameraIndex, CameraList};
use crate::error::{SessionError, SessionResult};



/// Result of a refresh: the cameras to offer, and whether they came from the cache.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct RegistrySnapshot {
	pub cameras: CameraList,
	pub stale: bool,
	pub error: Option<SessionError>,
}

#[derive(Default)]
struct RegistryCache {
	cameras: Option<CameraList>,
	last_error: Option<SessionError>,
}

/// Caches the backend's camera list. The backend is the source of truth; the cache is only
/// a fallback for when it cannot be reached.
pub struct CameraRegistry {
	backend: Arc<dyn AnalyzerBackend>,
	cache: RwLock<RegistryCache>,
}

impl CameraRegistry {
	pub fn new(backend: Arc<dyn AnalyzerBackend>) -> Self {
		CameraRegistry {
			backend,
			cache: RwLock::new(RegistryCache::default()),
		}
	}

	/// Fetches the camera list, replacing the cache on success.
	pub async fn list_cameras(&self) -> SessionResult<CameraList> {
		match self.backend.list_cameras().await {
			Ok(cameras) => {
				info!("Registry holds {} camera(s)", cameras.len());
				let mut cache = self.cache.write().await;
				cache.cameras = Some(cameras.clone());
				cache.last_error = None;
				Ok(cameras)
			},
			Err(err) => {
				self.cache.write().await.last_error = Some(err.clone());
				Err(err)
			},
		}
	}

	/// Like `list_cameras`, but never fails: falls back to the last good list, or an empty one.
	pub async fn refresh(&self) -> RegistrySnapshot {
		match self.list_cameras().await {
			Ok(cameras) => RegistrySnapshot {
				cameras,
				stale: false,
				error: None,
			},
			Err(err) => {
				let cached = self.cached().await;
				warn!("Failed to load camera list: {} (cached list {})", err, if cached.is_some() { "used" } else { "unavailable" });
				RegistrySnapshot {
					stale: cached.is_some(),
					cameras: cached.unwrap_or_default(),
					error: Some(err),
				}
			},
		}
	}

	pub async fn cached(&self) -> Option<CameraList> {
		self.cache.read().await.cameras.clone()
	}

	pub async fn last_error(&self) -> Option<SessionError> {
		self.cache.read().await.last_error.clone()
	}

	pub async fn contains(&self, index: CameraIndex) -> bool {
		self.cache.read().await.cameras
			.as_ref()
			.map_or(false, |cameras| cameras.iter().any(|camera| camera.index == index))
	}
}

/// Picks the camera to show first: the restored selection if it is still registered, then
/// the current camera, then the first camera in the list.
pub fn choose_camera(cameras: &CameraList, restore: Option<CameraIndex>, current: Option<CameraIndex>) -> Option<CameraIndex> {
	let registered = |index: &CameraIndex| cameras.iter().any(|camera| camera.index == *index);
	restore.filter(registered)
		.or(current.filter(registered))
		.or_else(|| cameras.first().map(|camera| camera.index))
}
