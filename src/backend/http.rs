use std::time::Duration;

use log::debug;
use url::Url;

use crate::backend::wire::{self, CommandReply, FrameBatch, RestartBody};
use crate::backend::AnalyzerBackend;
use crate::common::{CameraIndex, CameraList, CameraSelector, StatusMap};
use crate::error::SessionResult;



/// Talks to the analyzer backend over its JSON API.
#[derive(Clone)]
#[derive(Debug)]
pub struct HttpBackend {
	base_url: Url,
	client: reqwest::Client,
}

impl HttpBackend {
	pub fn new(base_url: &str, request_timeout: Duration) -> SessionResult<Self> {
		// Url::join drops the last path segment unless the base ends with a slash.
		let mut base = base_url.to_string();
		if !base.ends_with('/') {
			base.push('/');
		}
		let client = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()?;
		Ok(HttpBackend {
			base_url: Url::parse(&base)?,
			client,
		})
	}

	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	fn endpoint(&self, path: &str) -> SessionResult<Url> {
		Ok(self.base_url.join(path)?)
	}

	fn status_url(&self, selector: CameraSelector) -> SessionResult<Url> {
		let mut url = self.endpoint("api/analyzer/status")?;
		match selector {
			CameraSelector::One(index) => {
				url.query_pairs_mut().append_pair("camera_index", &index.to_string());
			},
			CameraSelector::All => {
				url.query_pairs_mut().append_pair("all", "true");
			},
		}
		Ok(url)
	}

	fn frames_url(&self, selector: CameraSelector, limit: u32) -> SessionResult<Url> {
		let mut url = self.endpoint("api/analyzer/frames")?;
		url.query_pairs_mut()
			.append_pair("limit", &limit.to_string())
			.append_pair("camera_index", &selector.frames_param().to_string());
		Ok(url)
	}

	async fn get(&self, url: Url) -> SessionResult<(bool, String)> {
		debug!("GET {}", url);
		let response = self.client.get(url).send().await?;
		let ok = response.status().is_success();
		Ok((ok, response.text().await?))
	}

	async fn post<T: serde::Serialize + ?Sized>(&self, url: Url, body: Option<&T>) -> SessionResult<(bool, String)> {
		debug!("POST {}", url);
		let mut request = self.client.post(url);
		if let Some(body) = body {
			request = request.json(body);
		}
		let response = request.send().await?;
		let ok = response.status().is_success();
		Ok((ok, response.text().await?))
	}

	fn absolute(&self, path: &str) -> String {
		match self.base_url.join(path.trim_start_matches('/')) {
			Ok(url) => url.to_string(),
			Err(_) => path.to_string(),
		}
	}
}

#[rocket::async_trait]
impl AnalyzerBackend for HttpBackend {
	async fn list_cameras(&self) -> SessionResult<CameraList> {
		let (ok, body) = self.get(self.endpoint("api/cameras")?).await?;
		wire::decode_cameras(ok, &body)
	}

	async fn analyzer_status(&self, selector: CameraSelector) -> SessionResult<StatusMap> {
		let (ok, body) = self.get(self.status_url(selector)?).await?;
		wire::decode_status(selector, ok, &body)
	}

	async fn restart_analyzer(&self, camera: CameraIndex) -> SessionResult<CommandReply> {
		let body = RestartBody { camera_index: camera };
		let (ok, body) = self.post(self.endpoint("api/analyzer/restart")?, Some(&body)).await?;
		wire::decode_command(ok, &body)
	}

	async fn start_all(&self) -> SessionResult<CommandReply> {
		let (ok, body) = self.post::<()>(self.endpoint("api/analyzer/start-all")?, None).await?;
		wire::decode_command(ok, &body)
	}

	async fn stop_all(&self) -> SessionResult<CommandReply> {
		let (ok, body) = self.post::<()>(self.endpoint("api/analyzer/stop-all")?, None).await?;
		wire::decode_command(ok, &body)
	}

	async fn recent_frames(&self, selector: CameraSelector, limit: u32) -> SessionResult<FrameBatch> {
		let (ok, body) = self.get(self.frames_url(selector, limit)?).await?;
		wire::decode_frames(ok, &body)
	}

	fn stream_url(&self, camera: CameraIndex, cache_buster: u128) -> String {
		self.absolute(&format!("api/stream?camera_index={}&t={}", camera, cache_buster))
	}

	fn thumbnail_url(&self, camera: CameraIndex, cache_buster: u128) -> String {
		self.absolute(&format!("api/camera-thumbnail/{}?t={}", camera, cache_buster))
	}
}



#[cfg(test)]
mod tests {
	use super::*;

	fn backend(base: &str) -> HttpBackend {
		HttpBackend::new(base, Duration::from_secs(1)).unwrap()
	}

	#[test]
	fn base_without_trailing_slash_keeps_its_path() {
		let backend = backend("http://nvr.local:8080/detector");
		assert_eq!(backend.endpoint("api/cameras").unwrap().as_str(), "http://nvr.local:8080/detector/api/cameras");
	}

	#[test]
	fn status_and_frames_queries() {
		let backend = backend("http://127.0.0.1:5000/");
		assert_eq!(
			backend.status_url(CameraSelector::One(2)).unwrap().as_str(),
			"http://127.0.0.1:5000/api/analyzer/status?camera_index=2"
		);
		assert_eq!(
			backend.status_url(CameraSelector::All).unwrap().as_str(),
			"http://127.0.0.1:5000/api/analyzer/status?all=true"
		);
		assert_eq!(
			backend.frames_url(CameraSelector::All, 30).unwrap().as_str(),
			"http://127.0.0.1:5000/api/analyzer/frames?limit=30&camera_index=-1"
		);
	}

	#[test]
	fn stream_and_thumbnail_urls_are_cache_busted() {
		let backend = backend("http://127.0.0.1:5000");
		assert_eq!(backend.stream_url(1, 1700000000000), "http://127.0.0.1:5000/api/stream?camera_index=1&t=1700000000000");
		assert_eq!(backend.thumbnail_url(4, 5), "http://127.0.0.1:5000/api/camera-thumbnail/4?t=5");
	}

	#[test]
	fn invalid_base_url_is_config_error() {
		let result = HttpBackend::new("not a url", Duration::from_secs(1));
		assert!(matches!(result, Err(crate::error::SessionError::Config(_))));
	}

	#[tokio::test]
	async fn unreachable_backend_is_network_error() {
		// Port 9 (discard) is not served locally.
		let backend = backend("http://127.0.0.1:9/");
		let result = backend.list_cameras().await;
		assert!(matches!(result, Err(crate::error::SessionError::Network(_))));
	}
}
