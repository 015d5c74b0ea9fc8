use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::backend::AnalyzerBackend;
use crate::common::{AnalyzerState, AnalyzerStatus, CameraIndex, CameraSelector, StatusMap};
use crate::error::SessionError;



pub const NO_ANALYZERS_RUNNING: &str = "no analyzers running";

/// One status query's outcome. Failures are folded in as `Unknown` statuses plus `error`.
#[derive(Clone)]
#[derive(Debug)]
#[derive(PartialEq, Eq)]
pub struct StatusReport {
	pub selector: CameraSelector,
	pub statuses: StatusMap,
	pub error: Option<SessionError>,
}

impl StatusReport {
	pub fn empty(selector: CameraSelector) -> Self {
		StatusReport {
			selector,
			statuses: StatusMap::new(),
			error: None,
		}
	}

	/// Status of `camera`, or `Unknown` if the report does not mention it.
	pub fn status_of(&self, camera: CameraIndex) -> AnalyzerStatus {
		self.statuses.get(&camera)
			.cloned()
			.unwrap_or_else(|| AnalyzerStatus::unknown(camera))
	}

	/// The single status of a one-camera query, whichever camera it reports on.
	///
	/// A single-camera query may come back describing another camera, so this does not
	/// look the entry up by the index that was asked for.
	pub fn reported(&self) -> Option<&AnalyzerStatus> {
		self.statuses.values().next()
	}

	pub fn active_cameras(&self) -> Vec<CameraIndex> {
		self.statuses.values()
			.filter(|status| status.state == AnalyzerState::Active)
			.map(|status| status.camera_index)
			.collect()
	}

	pub fn summary(&self) -> String {
		if self.error.is_some() {
			return "Error retrieving camera status.".to_string();
		}
		let active = self.active_cameras();
		if active.is_empty() {
			return NO_ANALYZERS_RUNNING.to_string();
		}
		let cameras: Vec<String> = active.iter().map(|index| index.to_string()).collect();
		format!("{} analyzer(s) running on camera {}", active.len(), cameras.join(", "))
	}
}

impl fmt::Display for StatusReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.summary())?;
		for status in self.statuses.values() {
			writeln!(f, "  Camera {}: {} ({} frames)", status.camera_index, status.state, status.frame_count)?;
		}
		if let Some(err) = &self.error {
			writeln!(f, "  {}", err)?;
		}
		Ok(())
	}
}



/// Single-shot status queries. Scheduling them is up to the caller.
pub struct AnalyzerStatusPoller {
	backend: Arc<dyn AnalyzerBackend>,
}

impl AnalyzerStatusPoller {
	pub fn new(backend: Arc<dyn AnalyzerBackend>) -> Self {
		AnalyzerStatusPoller {
			backend,
		}
	}

	pub async fn get_status(&self, selector: CameraSelector) -> StatusReport {
		match self.backend.analyzer_status(selector).await {
			Ok(statuses) => {
				debug!("Analyzer status for {}: {:?}", selector, statuses);
				StatusReport {
					selector,
					statuses,
					error: None,
				}
			},
			Err(err) => {
				warn!("Error fetching analyzer status for {}: {}", selector, err);
				let mut report = StatusReport::empty(selector);
				if let CameraSelector::One(index) = selector {
					report.statuses.insert(index, AnalyzerStatus::unknown(index));
				}
				report.error = Some(err);
				report
			},
		}
	}
}
