use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::backend::AnalyzerBackend;
use crate::common::{CameraSelector, Frame};
use crate::error::SessionError;



/// Frames for one selector, ready for display. An empty listing with `error` set means the fetch failed.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct FrameListing {
	pub selector: Option<CameraSelector>,
	pub frames: Vec<Frame>,
	pub source: Option<String>,
	pub error: Option<SessionError>,
}

impl FrameListing {
	pub fn empty() -> Self {
		FrameListing {
			selector: None,
			frames: Vec::new(),
			source: None,
			error: None,
		}
	}
}

impl fmt::Display for FrameListing {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if let Some(err) = &self.error {
			return writeln!(f, "Error loading frames: {}", err);
		}
		let Some(selector) = self.selector else {
			return writeln!(f, "No frames loaded.");
		};
		if self.frames.is_empty() {
			let scope = match selector {
				CameraSelector::All => "for any cameras".to_string(),
				CameraSelector::One(index) => format!("for camera {}", index),
			};
			return writeln!(f, "No recent frames found {}. ({})", scope, self.source.as_deref().unwrap_or("unknown source"));
		}
		for frame in &self.frames {
			writeln!(f, "{}", frame)?;
		}
		Ok(())
	}
}



/// Read-only access to recent detection frames.
pub struct FrameFeed {
	backend: Arc<dyn AnalyzerBackend>,
	default_limit: u32,
	latest: watch::Sender<FrameListing>,
}

impl FrameFeed {
	pub fn new(backend: Arc<dyn AnalyzerBackend>, default_limit: u32) -> Self {
		let (latest, _) = watch::channel(FrameListing::empty());
		FrameFeed {
			backend,
			default_limit,
			latest,
		}
	}

	pub fn default_limit(&self) -> u32 {
		self.default_limit
	}

	/// Receives every listing this feed produces, whoever asked for it.
	pub fn subscribe(&self) -> watch::Receiver<FrameListing> {
		self.latest.subscribe()
	}

	/// Publishes an empty listing, e.g. while the camera is being switched.
	pub fn clear(&self) {
		self.latest.send_replace(FrameListing::empty());
	}

	pub async fn list_frames(&self, selector: CameraSelector, limit: u32) -> FrameListing {
		let listing = match self.backend.recent_frames(selector, limit).await {
			Ok(batch) => {
				debug!("Loaded {} frame(s) for {} from {:?}", batch.frames.len(), selector, batch.source);
				FrameListing {
					selector: Some(selector),
					frames: batch.frames,
					source: batch.source,
					error: None,
				}
			},
			Err(err) => {
				warn!("Error loading frames for {}: {}", selector, err);
				FrameListing {
					selector: Some(selector),
					frames: Vec::new(),
					source: None,
					error: Some(err),
				}
			},
		};
		self.latest.send_replace(listing.clone());
		listing
	}

	pub async fn refresh(&self, selector: CameraSelector) -> FrameListing {
		self.list_frames(selector, self.default_limit).await
	}
}
