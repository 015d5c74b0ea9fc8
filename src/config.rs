//! Layered TOML configuration.
//!
//! Files are merged in the order given, key by key, so a later file only needs to
//! mention the settings it changes. Missing keys fall back to the defaults below.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};

use crate::common::CameraIndex;
use crate::error::{SessionError, SessionResult};



pub const DEFAULT_CONFIG_FILES: [&str; 2] = [
	"/etc/analyzer-session/config.toml",
	"analyzer-session.toml",
];

#[derive(Clone)]
#[derive(Debug)]
#[derive(Default)]
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub backend: BackendConfig,
	pub switch: SwitchConfig,
	pub dashboard: DashboardConfig,
	pub storage: StorageConfig,
	pub simulator: SimulatorConfig,
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
	pub base_url: String,
	#[serde(with = "humantime_serde")]
	pub request_timeout: Duration,
}

impl Default for BackendConfig {
	fn default() -> Self {
		BackendConfig {
			base_url: "http://127.0.0.1:5000/".to_string(),
			request_timeout: Duration::from_secs(10),
		}
	}
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
	#[serde(with = "humantime_serde")]
	pub poll_interval: Duration,
	#[serde(with = "humantime_serde")]
	pub timeout: Duration,
}

impl Default for SwitchConfig {
	fn default() -> Self {
		SwitchConfig {
			poll_interval: Duration::from_millis(1000),
			timeout: Duration::from_secs(30),
		}
	}
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
	#[serde(with = "humantime_serde")]
	pub all_status_interval: Duration,
	#[serde(with = "humantime_serde")]
	pub thumbnail_interval: Duration,
	#[serde(with = "humantime_serde")]
	pub feed_reload_delay: Duration,
	pub frame_limit: u32,
}

impl Default for DashboardConfig {
	fn default() -> Self {
		DashboardConfig {
			all_status_interval: Duration::from_secs(30),
			thumbnail_interval: Duration::from_secs(60),
			feed_reload_delay: Duration::from_secs(5),
			frame_limit: 30,
		}
	}
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
	pub selection_file: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		StorageConfig {
			selection_file: PathBuf::from("analyzer-session-state.json"),
		}
	}
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
	pub port: u16,
	pub cameras: Vec<CameraIndex>,
	pub max_concurrent_cameras: usize,
	#[serde(with = "humantime_serde")]
	pub startup_delay: Duration,
	#[serde(with = "humantime_serde")]
	pub frame_interval: Duration,
	pub save_interval: u64,
	pub include_classes: Vec<String>,
}

impl Default for SimulatorConfig {
	fn default() -> Self {
		SimulatorConfig {
			port: 5000,
			cameras: vec![0, 1, 2],
			max_concurrent_cameras: 3,
			startup_delay: Duration::from_millis(1500),
			frame_interval: Duration::from_millis(200),
			save_interval: 20,
			include_classes: ["person", "car", "truck", "motorcycle", "bicycle", "bus"]
				.iter()
				.map(|class| class.to_string())
				.collect(),
		}
	}
}



#[derive(Clone)]
#[derive(Debug)]
pub struct ConfigManager {
	merged: toml::Table,
	config: Config,
}

impl ConfigManager {
	pub fn new() -> Self {
		ConfigManager {
			merged: toml::Table::new(),
			config: Config::default(),
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Reads and merges the given files. Every file must exist and parse.
	pub fn read_config(&mut self, filenames: Vec<&str>) -> SessionResult<()> {
		for filename in filenames {
			let text = std::fs::read_to_string(filename)
				.map_err(|err| SessionError::Config(format!("cannot read {}: {}", filename, err)))?;
			self.merge_str(&text)
				.map_err(|err| match err {
					SessionError::Config(message) => SessionError::Config(format!("{}: {}", filename, message)),
					other => other,
				})?;
			info!("Loaded config file {}", filename);
		}
		Ok(())
	}

	/// Reads whichever of the default config files exist. None existing is fine.
	pub fn read_default_config_files(&mut self) -> SessionResult<()> {
		let existing: Vec<&str> = DEFAULT_CONFIG_FILES
			.iter()
			.copied()
			.filter(|filename| Path::new(filename).is_file())
			.collect();
		if existing.is_empty() {
			debug!("No default config files found; using built-in defaults");
		}
		self.read_config(existing)
	}

	pub fn merge_str(&mut self, text: &str) -> SessionResult<()> {
		let table: toml::Table = text.parse()
			.map_err(|err: toml::de::Error| SessionError::Config(err.to_string()))?;
		merge_tables(&mut self.merged, table);
		self.config = toml::Value::Table(self.merged.clone())
			.try_into()
			.map_err(|err: toml::de::Error| SessionError::Config(err.to_string()))?;
		Ok(())
	}

	pub fn set_backend_url(&mut self, base_url: &str) {
		self.config.backend.base_url = base_url.to_string();
	}
}

impl Default for ConfigManager {
	fn default() -> Self {
		Self::new()
	}
}

fn merge_tables(into: &mut toml::Table, from: toml::Table) {
	for (key, value) in from {
		match (into.get_mut(&key), value) {
			(Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
				merge_tables(existing, incoming);
			},
			(_, value) => {
				into.insert(key, value);
			},
		}
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_dashboard_timings() {
		let config = Config::default();
		assert_eq!(config.switch.poll_interval, Duration::from_secs(1));
		assert_eq!(config.switch.timeout, Duration::from_secs(30));
		assert_eq!(config.dashboard.all_status_interval, Duration::from_secs(30));
		assert_eq!(config.dashboard.thumbnail_interval, Duration::from_secs(60));
		assert_eq!(config.dashboard.frame_limit, 30);
	}

	#[test]
	fn later_files_override_individual_keys() {
		let mut manager = ConfigManager::new();
		manager.merge_str(r#"
			[backend]
			base_url = "http://camera-box:5000/"

			[switch]
			poll_interval = "500ms"
			timeout = "10s"
		"#).unwrap();
		manager.merge_str(r#"
			[switch]
			timeout = "45s"
		"#).unwrap();

		let config = manager.config();
		assert_eq!(config.backend.base_url, "http://camera-box:5000/");
		assert_eq!(config.switch.poll_interval, Duration::from_millis(500));
		assert_eq!(config.switch.timeout, Duration::from_secs(45));
		assert_eq!(config.backend.request_timeout, Duration::from_secs(10));
	}

	#[test]
	fn bad_duration_is_a_config_error() {
		let mut manager = ConfigManager::new();
		let result = manager.merge_str("[switch]\ntimeout = \"soon\"\n");
		assert!(matches!(result, Err(SessionError::Config(_))));
	}

	#[test]
	fn parse_error_names_the_file_once() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("broken.toml");
		std::fs::write(&path, "[switch]\ntimeout = \"soon\"\n").unwrap();

		let mut manager = ConfigManager::new();
		let err = manager.read_config(vec![path.to_str().unwrap()]).unwrap_err();
		let message = err.to_string();
		assert!(message.starts_with(&format!("configuration error: {}: ", path.display())), "{}", message);
		assert_eq!(message.matches("configuration error").count(), 1, "{}", message);
	}

	#[test]
	fn missing_file_is_reported() {
		let mut manager = ConfigManager::new();
		let result = manager.read_config(vec!["/nonexistent/analyzer-session.toml"]);
		assert!(matches!(result, Err(SessionError::Config(_))));
	}
}
