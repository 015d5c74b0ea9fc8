use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;



pub type CameraIndex = u32;
pub type CameraList = Vec<Camera>;
pub type StatusMap = BTreeMap<CameraIndex, AnalyzerStatus>;

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct Camera {
	pub index: CameraIndex,
	pub name: String,
}

impl Camera {
	pub fn new(index: CameraIndex) -> Self {
		Camera {
			index,
			name: format!("Camera {}", index),
		}
	}
}

#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum AnalyzerState {
	Active,
	Inactive,
	Unknown,
}

impl AnalyzerState {
	/// Maps the backend's `status` string. Anything other than active/inactive (e.g. "error") is unknown.
	pub fn from_wire(status: &str) -> Self {
		match status {
			"active" => AnalyzerState::Active,
			"inactive" => AnalyzerState::Inactive,
			_ => AnalyzerState::Unknown,
		}
	}
}

impl fmt::Display for AnalyzerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AnalyzerState::Active => write!(f, "active"),
			AnalyzerState::Inactive => write!(f, "inactive"),
			AnalyzerState::Unknown => write!(f, "unknown"),
		}
	}
}

#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct AnalyzerStatus {
	pub camera_index: CameraIndex,
	pub state: AnalyzerState,
	pub frame_count: u64,
}

impl AnalyzerStatus {
	pub fn unknown(camera_index: CameraIndex) -> Self {
		AnalyzerStatus {
			camera_index,
			state: AnalyzerState::Unknown,
			frame_count: 0,
		}
	}

	/// True only when this status is an active report for exactly `camera`.
	/// Several cameras may be active at once, so "some camera is active" is not enough.
	pub fn is_active_on(&self, camera: CameraIndex) -> bool {
		self.state == AnalyzerState::Active && self.camera_index == camera
	}
}

#[derive(Clone, Copy)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub enum CameraSelector {
	One(CameraIndex),
	All,
}

impl CameraSelector {
	/// Value of the frames endpoint's `camera_index` parameter, where -1 means every camera.
	pub fn frames_param(&self) -> i64 {
		match self {
			CameraSelector::One(index) => i64::from(*index),
			CameraSelector::All => -1,
		}
	}
}

impl fmt::Display for CameraSelector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CameraSelector::One(index) => write!(f, "camera {}", index),
			CameraSelector::All => write!(f, "all cameras"),
		}
	}
}

/// A saved detection frame as the backend reports it. Read-only on the client.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct Frame {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<u64>,
	pub camera_index: CameraIndex,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frame_number: Option<u64>,
	#[serde(default)]
	pub timestamp: Option<String>,
	#[serde(default)]
	pub objects: BTreeSet<String>,
	#[serde(rename = "path", default)]
	pub image_path: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filename: Option<String>,
}

impl fmt::Display for Frame {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "[Camera {}] {} (Frame ", self.camera_index, self.timestamp.as_deref().unwrap_or("No timestamp"))?;
		match self.frame_number {
			Some(number) => write!(f, "{})", number)?,
			None => write!(f, "N/A)")?,
		}
		if !self.objects.is_empty() {
			let objects: Vec<&str> = self.objects.iter().map(String::as_str).collect();
			write!(f, " {}", objects.join(", "))?;
		}
		if let Some(path) = &self.image_path {
			write!(f, " {}", path)?;
		}
		Ok(())
	}
}

/// Image source for the single-stream view.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct StreamSource {
	pub camera: CameraIndex,
	pub url: String,
}
