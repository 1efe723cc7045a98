#![forbid(unsafe_code)]

mod config;
mod server;
mod telemetry;

use std::io::BufRead as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use overtube_platform::LiveConnectorFactory;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::server::app_state::AppState;
use crate::server::broadcast::BroadcastServer;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::orchestrator::{Orchestrator, OrchestratorCommand};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: overtube_server [--bind host:port] [--config path]\n\
\n\
Options:\n\
\t--bind    Overlay WebSocket address (default: 127.0.0.1:1336)\n\
\t--config  Config file (default: ~/.overtube/config.toml)\n\
\t--help    Show this help\n\
\n\
Commands (stdin):\n\
\tset <youtube|twitch> <channel>\n\
\tremove <youtube|twitch>\n\
\tstyle <id>\n\
\tcss set <id> <css>\n\
\tcss reset <id>\n\
\trefresh\n\
\texit\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	bind: Option<SocketAddr>,
	config: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let addr = v.trim().parse::<SocketAddr>().unwrap_or_else(|e| {
					eprintln!("--bind {v:?}: {e} (expected host:port)");
					usage_and_exit();
				});
				args.bind = Some(addr);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Log every status transition until the server closes the channel.
fn spawn_status_logger(mut rx: broadcast::Receiver<overtube_domain::ConnectionStatusEvent>) {
	tokio::spawn(async move {
		loop {
			match rx.recv().await {
				Ok(ev) => info!(platform = %ev.platform, status = %ev.status, "connection status changed"),
				Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "status logger lagged"),
				Err(broadcast::error::RecvError::Closed) => break,
			}
		}
	});
}

/// Feed stdin lines to the orchestrator from a plain thread, so a pending read never holds up
/// runtime shutdown. EOF stops reading but leaves the server running.
fn spawn_stdin_commands(tx: mpsc::Sender<OrchestratorCommand>) {
	let spawned = std::thread::Builder::new().name("stdin-commands".to_string()).spawn(move || {
		for line in std::io::stdin().lock().lines() {
			let line = match line {
				Ok(line) => line,
				Err(e) => {
					warn!(error = %e, "failed to read stdin");
					return;
				}
			};
			if line.trim().is_empty() {
				continue;
			}

			match line.parse::<OrchestratorCommand>() {
				Ok(cmd) => {
					if tx.blocking_send(cmd).is_err() {
						return;
					}
				}
				Err(e) => warn!(input = %line.trim(), error = %e, "invalid command"),
			}
		}
		info!("stdin closed; command input disabled");
	});

	if let Err(e) = spawned {
		warn!(error = %e, "failed to start stdin command reader");
	}
}

fn spawn_ctrl_c(tx: mpsc::Sender<OrchestratorCommand>) {
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("interrupt received; shutting down");
			let _ = tx.send(OrchestratorCommand::Exit).await;
		}
	});
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut server_cfg = tracing::subscriber::with_default(telemetry::bootstrap_subscriber(), || {
		crate::config::load_server_config_from_path(&config_path)
	})?;
	if let Some(bind) = args.bind {
		server_cfg.server.ws_bind = bind;
	}

	let tracer_provider = telemetry::init_tracing(&server_cfg.telemetry);
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	telemetry::init_metrics(server_cfg.server.metrics_bind.as_deref(), &server_cfg.telemetry.service_name);

	let health_state = HealthState::new();
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				if let Err(e) = spawn_health_server(addr, health_state.clone()).await {
					warn!(error = %format!("{e:#}"), "health endpoint disabled");
				}
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let state_path = server_cfg.server.resolved_state_path()?;
	let app_state = AppState::load(&state_path);
	info!(path = %state_path.display(), "loaded app state");

	let server = BroadcastServer::start(server_cfg.server.broadcast_config()).await?;
	info!(overlay = %format!("ws://{}/ws", server.local_addr()), "overlay endpoint ready");
	spawn_status_logger(server.subscribe_status());
	health_state.mark_ready();

	let factory = Arc::new(LiveConnectorFactory::new(server_cfg.twitch.clone(), server_cfg.youtube.clone()));
	let orchestrator = Orchestrator::new(server, factory, app_state, state_path);

	let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
	for cmd in orchestrator.restore_commands() {
		info!(?cmd, "restoring saved channel");
		tx.send(cmd).await?;
	}
	spawn_stdin_commands(tx.clone());
	spawn_ctrl_c(tx);

	orchestrator.run(rx).await;
	health_state.mark_not_ready();
	info!("overtube_server exited");
	telemetry::shutdown_tracing(tracer_provider);

	Ok(())
}
