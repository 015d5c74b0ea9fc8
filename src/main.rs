use std::sync::Arc;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use analyzer_session::backend::{AnalyzerBackend, CommandReply, HttpBackend};
use analyzer_session::common::{CameraIndex, CameraSelector};
use analyzer_session::config::ConfigManager;
use analyzer_session::dashboard::Dashboard;
use analyzer_session::simulator;
use analyzer_session::switch::SwitchPhase;
use analyzer_session::SessionError;



const WATCH_HELP: &str = "Commands: <camera number> switch | r restart current | s check status | a toggle all-camera frames | f [N] frames | t tiles | start | stop | d dismiss | q quit";

fn selector_args(command: Command) -> Command {
	command
		.arg(
			Arg::new("camera")
				.long("camera")
				.value_parser(value_parser!(CameraIndex))
				.conflicts_with("all")
				.help("Camera index (defaults to camera 0)")
		)
		.arg(
			Arg::new("all")
				.long("all")
				.action(ArgAction::SetTrue)
				.help("Query every camera")
		)
}

fn selector_from(matches: &ArgMatches) -> CameraSelector {
	if matches.get_flag("all") {
		CameraSelector::All
	} else {
		CameraSelector::One(matches.get_one::<CameraIndex>("camera").copied().unwrap_or(0))
	}
}

fn cli() -> Command {
	Command::new("analyzer-session")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Session controller for a multi-camera object-detection backend.")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.action(ArgAction::Append)	// Allow argument to be specified multiple times
				.short('c')
				.long("config")
				.global(true)
				.help("TOML file with session config")
		)
		.arg(
			Arg::new("backend")
				.long("backend")
				.global(true)
				.help("Base URL of the analyzer backend, overriding the config files")
		)
		.subcommand(Command::new("cameras").about("List cameras with a running analyzer"))
		.subcommand(selector_args(Command::new("status").about("Show analyzer status")))
		.subcommand(
			Command::new("switch")
				.about("Switch the analyzer to a camera and wait until it is live")
				.arg(
					Arg::new("camera")
						.required(true)
						.value_parser(value_parser!(CameraIndex))
				)
		)
		.subcommand(
			selector_args(Command::new("frames").about("Show recent detection frames"))
				.arg(
					Arg::new("limit")
						.long("limit")
						.value_parser(value_parser!(u32))
						.help("Maximum number of frames")
				)
		)
		.subcommand(Command::new("start-all").about("Start analyzers on every camera"))
		.subcommand(Command::new("stop-all").about("Stop every analyzer"))
		.subcommand(Command::new("watch").about("Interactive session with periodic refreshes"))
		.subcommand(
			Command::new("simulate")
				.about("Serve a simulated analyzer backend")
				.arg(
					Arg::new("port")
						.long("port")
						.value_parser(value_parser!(u16))
				)
				.arg(
					Arg::new("idle")
						.long("idle")
						.action(ArgAction::SetTrue)
						.help("Do not start analyzers on launch")
				)
		)
}

fn print_reply(command: &str, reply: &CommandReply) {
	if reply.accepted() {
		match (reply.started_count, reply.stopped_count) {
			(Some(started), _) => println!("{}: started {} analyzer(s)", command, started),
			(_, Some(stopped)) => println!("{}: stopped {} analyzer(s)", command, stopped),
			_ => println!("{}: {}", command, reply.message.as_deref().unwrap_or("ok")),
		}
	} else {
		println!("{} failed: {}", command, reply.rejection_message());
	}
}

fn print_tiles(dashboard_tiles: &[analyzer_session::dashboard::FeedTile]) {
	if dashboard_tiles.is_empty() {
		println!("No cameras detected by the server.");
	}
	for tile in dashboard_tiles {
		println!("  {}", tile);
	}
}

/// Returns false when the session should end.
async fn handle_command(dashboard: &Dashboard, line: &str) -> anyhow::Result<bool> {
	let controller = dashboard.controller();
	let mut words = line.split_whitespace();
	match words.next() {
		None => {},
		Some("q") | Some("quit") => return Ok(false),
		Some("r") => {
			controller.restart_current().await;
		},
		Some("s") => {
			if controller.reconcile().await.is_none() {
				println!("No camera selected.");
			}
		},
		Some("a") => {
			dashboard.set_show_all_frames(!dashboard.show_all_frames()).await;
		},
		Some("f") => match words.next().map(|word| word.parse::<CameraIndex>()) {
			Some(Ok(camera)) => {
				dashboard.select_for_frames(camera).await;
			},
			Some(Err(_)) => println!("{}", WATCH_HELP),
			None => {
				dashboard.load_frames().await;
			},
		},
		Some("t") => {
			dashboard.load_camera_tiles().await;
		},
		Some("start") => print_reply("start-all", &dashboard.start_all().await?),
		Some("stop") => print_reply("stop-all", &dashboard.stop_all().await?),
		Some("d") => controller.dismiss().await,
		Some(word) => match word.parse::<CameraIndex>() {
			Ok(camera) => {
				if !controller.request_switch(camera).await {
					println!("Already on camera {}.", camera);
				}
			},
			Err(_) => println!("{}", WATCH_HELP),
		},
	}
	Ok(true)
}

async fn watch(dashboard: Dashboard) -> anyhow::Result<()> {
	let load = dashboard.initial_load().await;
	if let Some(err) = &load.registry.error {
		warn!("Camera list unavailable: {}", err);
	}
	println!("{}", load.view);
	print!("{}", load.status);
	print!("{}", load.frames);
	print_tiles(&load.tiles);
	println!("{}", WATCH_HELP);

	let shutdown = CancellationToken::new();
	let refresher = {
		let dashboard = dashboard.clone();
		let shutdown = shutdown.clone();
		tokio::spawn(async move { dashboard.run(shutdown).await })
	};

	let mut views = dashboard.controller().subscribe();
	let mut statuses = dashboard.subscribe_status();
	let mut frames = dashboard.feed().subscribe();
	let mut tiles = dashboard.subscribe_tiles();
	let mut lines = BufReader::new(tokio::io::stdin()).lines();

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			Ok(_) = views.changed() => println!("{}", *views.borrow_and_update()),
			Ok(_) = statuses.changed() => print!("{}", *statuses.borrow_and_update()),
			Ok(_) = frames.changed() => print!("{}", *frames.borrow_and_update()),
			Ok(_) = tiles.changed() => print_tiles(&tiles.borrow_and_update()),
			line = lines.next_line() => match line.context("Failed to read from stdin")? {
				Some(line) => {
					if !handle_command(&dashboard, line.trim()).await? {
						break;
					}
				},
				None => break,
			},
		}
	}

	info!("Shutting down");
	shutdown.cancel();
	refresher.await?;
	anyhow::Ok(())
}

#[rocket::main]
async fn main() -> anyhow::Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
	let matches = cli().get_matches();

	let mut config_manager = ConfigManager::new();
	let config_filename_matches = matches.get_many::<String>("config");
	match config_filename_matches {
		Some(filenames) => {
			config_manager.read_config(filenames.map(|v| v.as_str()).collect())?;
		},
		None => {
			// Use default file path
			config_manager.read_default_config_files()?;
		}
	};
	if let Some(base_url) = matches.get_one::<String>("backend") {
		config_manager.set_backend_url(base_url);
	}
	let config = config_manager.config().clone();

	if let Some(("simulate", sub_matches)) = matches.subcommand() {
		let mut settings = config.simulator.clone();
		if let Some(port) = sub_matches.get_one::<u16>("port") {
			settings.port = *port;
		}
		simulator::build(settings, !sub_matches.get_flag("idle"))
			.launch()
			.await?;
		return anyhow::Ok(());
	}

	let backend: Arc<dyn AnalyzerBackend> = Arc::new(HttpBackend::new(&config.backend.base_url, config.backend.request_timeout)?);
	let dashboard = Dashboard::from_config(backend.clone(), &config);

	match matches.subcommand() {
		Some(("cameras", _)) => {
			let cameras = dashboard.registry().list_cameras().await?;
			if cameras.is_empty() {
				println!("No cameras detected by the server.");
			}
			for camera in cameras {
				println!("{}\t{}", camera.index, camera.name);
			}
		},
		Some(("status", sub_matches)) => {
			let report = dashboard.poller().get_status(selector_from(sub_matches)).await;
			print!("{}", report);
			if let Some(err) = report.error {
				return Err(err.into());
			}
		},
		Some(("switch", sub_matches)) => {
			let camera = sub_matches.get_one::<CameraIndex>("camera").copied().unwrap_or(0);
			let controller = dashboard.controller();
			controller.request_switch(camera).await;
			let view = controller.settled().await;
			controller.wait_finished().await;
			println!("{}", view);
			match view.phase {
				SwitchPhase::Active => {},
				SwitchPhase::TimedOut => return Err(SessionError::Timeout { camera, waited: controller.settings().timeout }.into()),
				_ => anyhow::bail!("{}", view.message),
			}
			print!("{}", *dashboard.feed().subscribe().borrow());
		},
		Some(("frames", sub_matches)) => {
			let limit = sub_matches.get_one::<u32>("limit").copied().unwrap_or(dashboard.feed().default_limit());
			let listing = dashboard.feed().list_frames(selector_from(sub_matches), limit).await;
			print!("{}", listing);
			if let Some(err) = listing.error {
				return Err(err.into());
			}
		},
		Some(("start-all", _)) => print_reply("start-all", &backend.start_all().await?),
		Some(("stop-all", _)) => print_reply("stop-all", &backend.stop_all().await?),
		Some(("watch", _)) => watch(dashboard).await?,
		_ => unreachable!("clap requires a subcommand"),
	}

	anyhow::Ok(())
}
