//! A stand-in analyzer backend serving the same JSON API as the real one, so the session
//! client can be exercised without cameras or a detection model.

use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};

use crate::config::SimulatorConfig;

pub mod fleet;
pub mod rest_api;

pub use self::fleet::{AnalyzerFleet, FleetError};



// Dashboards are usually served from another origin, so allow cross-origin requests.
pub struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
	fn info(&self) -> Info {
		Info {
			name: "Add CORS headers to responses",
			kind: Kind::Response
		}
	}

	async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
		response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
		response.set_header(Header::new("Access-Control-Allow-Methods", "POST, GET, OPTIONS"));
		response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
		response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
	}
}

pub fn build(settings: SimulatorConfig, start_on_launch: bool) -> Rocket<Build> {
	let figment = rocket::Config::figment().merge(("port", settings.port));
	rocket::custom(figment)
		.attach(rest_api::stage(settings, start_on_launch))
		.attach(Cors)
}
