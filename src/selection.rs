use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

use crate::common::CameraIndex;
use crate::error::{SessionError, SessionResult};



pub const SELECTED_CAMERA_KEY: &str = "selectedCameraIndex";

/// Small string key/value file that remembers the last selected camera between runs.
///
/// Values are stored as strings, and unknown keys are preserved on write.
#[derive(Clone)]
#[derive(Debug)]
pub struct SelectionStore {
	path: PathBuf,
}

impl SelectionStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		SelectionStore {
			path: path.into(),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn read_entries(&self) -> Map<String, Value> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
				Ok(entries) => entries,
				Err(err) => {
					error!("Failed to parse selection file {}; error was {}", self.path.display(), err);
					Map::new()
				},
			},
			Err(err) => {
				// Expected on first run, before anything has been selected
				warn!("Failed to open selection file {} for reading; error was {}", self.path.display(), err);
				Map::new()
			},
		}
	}

	pub async fn load(&self) -> Option<CameraIndex> {
		let entries = self.read_entries().await;
		let value = entries.get(SELECTED_CAMERA_KEY)?;
		let parsed = match value {
			Value::String(text) => text.trim().parse().ok(),
			Value::Number(number) => number.as_u64().and_then(|index| CameraIndex::try_from(index).ok()),
			_ => None,
		};
		if parsed.is_none() {
			warn!("Ignoring unusable saved camera selection {}", value);
		}
		parsed
	}

	async fn save_inner(&self, camera: CameraIndex) -> SessionResult<()> {
		let mut entries = self.read_entries().await;
		entries.insert(SELECTED_CAMERA_KEY.to_string(), Value::String(camera.to_string()));
		let json = serde_json::to_vec_pretty(&entries)
			.map_err(|err| SessionError::Storage(err.to_string()))?;

		if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await
				.map_err(|err| SessionError::Storage(err.to_string()))?;
		}
		let file = tokio::fs::File::create(&self.path).await
			.map_err(|err| SessionError::Storage(err.to_string()))?;
		let mut writer = tokio::io::BufWriter::new(file);
		writer.write_all(&json).await
			.map_err(|err| SessionError::Storage(err.to_string()))?;
		writer.flush().await
			.map_err(|err| SessionError::Storage(err.to_string()))?;
		Ok(())
	}

	/// Persists the selection. Failures are logged, never propagated.
	pub async fn save(&self, camera: CameraIndex) {
		match self.save_inner(camera).await {
			Ok(_) => {
				info!("Saved camera selection {} to {}", camera, self.path.display());
			},
			Err(err) => {
				error!("Failed to write selection file; error was {}", err);
			},
		}
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn missing_file_means_no_selection() {
		let dir = tempfile::tempdir().unwrap();
		let store = SelectionStore::new(dir.path().join("state.json"));
		assert_eq!(store.load().await, None);
	}

	#[tokio::test]
	async fn save_then_load_keeps_other_keys() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("state.json");
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, r#"{"theme":"dark"}"#).unwrap();

		let store = SelectionStore::new(&path);
		store.save(3).await;
		assert_eq!(store.load().await, Some(3));

		let text = std::fs::read_to_string(&path).unwrap();
		let entries: Map<String, Value> = serde_json::from_str(&text).unwrap();
		assert_eq!(entries["theme"], "dark");
		assert_eq!(entries[SELECTED_CAMERA_KEY], "3");
	}

	#[tokio::test]
	async fn corrupt_value_is_ignored() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.json");
		std::fs::write(&path, r#"{"selectedCameraIndex":"front door"}"#).unwrap();
		assert_eq!(SelectionStore::new(&path).load().await, None);
	}
}
