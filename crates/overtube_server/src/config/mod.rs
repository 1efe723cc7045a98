#![forbid(unsafe_code)]

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use overtube_platform::twitch::TwitchConfig;
use overtube_platform::youtube::YouTubeConfig;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::broadcast::BroadcastConfig;

pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:1337";
pub const DEFAULT_MAX_CLIENTS: usize = 5;
pub const DEFAULT_LOG_FILTER: &str = "info,overtube_server=debug";
pub const DEFAULT_SERVICE_NAME: &str = "overtube";

/// Default config path: `~/.overtube/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	Ok(overtube_home()?.join("config.toml"))
}

/// Default app state path: `~/.overtube/state.json`.
pub fn default_state_path() -> anyhow::Result<PathBuf> {
	Ok(overtube_home()?.join("state.json"))
}

fn overtube_home() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".overtube"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg)?;

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub telemetry: TelemetrySettings,
	pub twitch: TwitchConfig,
	pub youtube: YouTubeConfig,
}

/// Logging and trace export.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
	/// `EnvFilter` directives. `RUST_LOG` wins when set.
	pub log_filter: String,
	/// OTLP gRPC collector. Spans are only exported when this is set.
	pub otlp_endpoint: Option<String>,
	/// `service.name` on exported spans and the `service` label on metrics.
	pub service_name: String,
}

impl Default for TelemetrySettings {
	fn default() -> Self {
		Self {
			log_filter: DEFAULT_LOG_FILTER.to_string(),
			otlp_endpoint: None,
			service_name: DEFAULT_SERVICE_NAME.to_string(),
		}
	}
}

/// Overlay socket, observability and persistence settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// WebSocket listener address (host:port).
	pub ws_bind: SocketAddr,
	/// Origins allowed to open the overlay socket. Requests without `Origin` are always allowed.
	pub allowed_origins: Vec<String>,
	pub max_clients: usize,
	pub liveness_interval: Duration,
	pub pong_timeout: Duration,
	/// Delay before pushing user ids to a freshly admitted client.
	pub settle_delay: Duration,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// App state file. `None` means `~/.overtube/state.json`.
	pub state_path: Option<PathBuf>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		let broadcast = BroadcastConfig::default();
		Self {
			ws_bind: broadcast.bind,
			allowed_origins: broadcast.allowed_origins,
			max_clients: broadcast.max_clients,
			liveness_interval: broadcast.liveness_interval,
			pong_timeout: broadcast.pong_timeout,
			settle_delay: broadcast.settle_delay,
			metrics_bind: None,
			health_bind: None,
			state_path: None,
		}
	}
}

impl ServerSettings {
	pub fn broadcast_config(&self) -> BroadcastConfig {
		BroadcastConfig {
			bind: self.ws_bind,
			allowed_origins: self.allowed_origins.clone(),
			max_clients: self.max_clients,
			liveness_interval: self.liveness_interval,
			pong_timeout: self.pong_timeout,
			settle_delay: self.settle_delay,
			..BroadcastConfig::default()
		}
	}

	pub fn resolved_state_path(&self) -> anyhow::Result<PathBuf> {
		match &self.state_path {
			Some(p) => Ok(p.clone()),
			None => default_state_path(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	telemetry: FileTelemetrySettings,

	#[serde(default)]
	twitch: FileTwitchSettings,

	#[serde(default)]
	youtube: FileYouTubeSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	ws_bind: Option<String>,
	allowed_origins: Option<Vec<String>>,
	max_clients: Option<usize>,
	liveness_interval_ms: Option<u64>,
	pong_timeout_ms: Option<u64>,
	settle_delay_ms: Option<u64>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	state_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTelemetrySettings {
	log_filter: Option<String>,
	otlp_endpoint: Option<String>,
	service_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileTwitchSettings {
	irc_ws_url: Option<String>,
	gql_url: Option<String>,
	client_id: Option<String>,
	ping_interval_secs: Option<u64>,
	connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileYouTubeSettings {
	poll_interval_ms: Option<u64>,
	client_version: Option<String>,
	language: Option<String>,
	region: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = ServerSettings::default();

		let ws_bind = match non_empty(file.server.ws_bind) {
			Some(v) => v.parse().with_context(|| format!("invalid server.ws_bind {v:?}"))?,
			None => defaults.ws_bind,
		};

		let allowed_origins = file
			.server
			.allowed_origins
			.map(|list| list.into_iter().filter_map(|o| non_empty(Some(o))).collect())
			.unwrap_or(defaults.allowed_origins);

		let server = ServerSettings {
			ws_bind,
			allowed_origins,
			max_clients: file.server.max_clients.filter(|n| *n > 0).unwrap_or(defaults.max_clients),
			liveness_interval: file
				.server
				.liveness_interval_ms
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis)
				.unwrap_or(defaults.liveness_interval),
			pong_timeout: file
				.server
				.pong_timeout_ms
				.filter(|ms| *ms > 0)
				.map(Duration::from_millis)
				.unwrap_or(defaults.pong_timeout),
			settle_delay: file
				.server
				.settle_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.settle_delay),
			metrics_bind: non_empty(file.server.metrics_bind),
			health_bind: non_empty(file.server.health_bind),
			state_path: non_empty(file.server.state_path).map(PathBuf::from),
		};

		let telemetry_defaults = TelemetrySettings::default();
		let telemetry = TelemetrySettings {
			log_filter: non_empty(file.telemetry.log_filter).unwrap_or(telemetry_defaults.log_filter),
			otlp_endpoint: non_empty(file.telemetry.otlp_endpoint),
			service_name: non_empty(file.telemetry.service_name).unwrap_or(telemetry_defaults.service_name),
		};

		let mut twitch = TwitchConfig::default();
		if let Some(v) = non_empty(file.twitch.irc_ws_url) {
			twitch.irc_ws_url = v;
		}
		if let Some(v) = non_empty(file.twitch.gql_url) {
			twitch.gql_url = v;
		}
		if let Some(v) = non_empty(file.twitch.client_id) {
			twitch.client_id = v;
		}
		if let Some(secs) = file.twitch.ping_interval_secs.filter(|s| *s > 0) {
			twitch.ping_interval = Duration::from_secs(secs);
		}
		if let Some(secs) = file.twitch.connect_timeout_secs.filter(|s| *s > 0) {
			twitch.connect_timeout = Duration::from_secs(secs);
		}

		let mut youtube = YouTubeConfig::default();
		if let Some(ms) = file.youtube.poll_interval_ms {
			youtube.poll_interval = Duration::from_millis(ms);
		}
		if let Some(v) = non_empty(file.youtube.client_version) {
			youtube.client_version = v;
		}
		if let Some(v) = non_empty(file.youtube.language) {
			youtube.language = v;
		}
		if let Some(v) = non_empty(file.youtube.region) {
			youtube.region = v;
		}

		Ok(Self {
			server,
			telemetry,
			twitch,
			youtube,
		})
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn env_string(key: &str) -> Option<String> {
	non_empty(std::env::var(key).ok())
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Some(v) = env_string("OVERTUBE_WS_BIND") {
		match v.parse() {
			Ok(addr) => {
				cfg.server.ws_bind = addr;
				info!(%addr, "server config: ws_bind overridden by env");
			}
			Err(e) => warn!(value = %v, error = %e, "server config: ignoring invalid OVERTUBE_WS_BIND"),
		}
	}

	if let Some(v) = env_string("OVERTUBE_ALLOWED_ORIGINS") {
		cfg.server.allowed_origins = v
			.split(',')
			.map(str::trim)
			.filter(|o| !o.is_empty())
			.map(str::to_string)
			.collect();
		info!(origins = ?cfg.server.allowed_origins, "server config: allowed_origins overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_MAX_CLIENTS")
		&& let Ok(max) = v.parse::<usize>()
		&& max > 0
	{
		cfg.server.max_clients = max;
		info!(max, "server config: max_clients overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_PONG_TIMEOUT_MS")
		&& let Ok(ms) = v.parse::<u64>()
		&& ms > 0
	{
		cfg.server.pong_timeout = Duration::from_millis(ms);
		info!(ms, "server config: pong_timeout overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_STATE_PATH") {
		cfg.server.state_path = Some(PathBuf::from(v));
		info!("server config: state_path overridden by env");
	}

	if let Some(v) = env_string("RUST_LOG") {
		cfg.telemetry.log_filter = v;
		info!("telemetry config: log_filter overridden by RUST_LOG");
	}

	if let Some(v) = env_string("OTEL_EXPORTER_OTLP_ENDPOINT") {
		info!(endpoint = %v, "telemetry config: otlp_endpoint overridden by env");
		cfg.telemetry.otlp_endpoint = Some(v);
	}

	if let Some(v) = env_string("OTEL_SERVICE_NAME") {
		info!(service = %v, "telemetry config: service_name overridden by env");
		cfg.telemetry.service_name = v;
	}

	if let Some(v) = env_string("OVERTUBE_TWITCH_IRC_WS_URL") {
		cfg.twitch.irc_ws_url = v;
		info!("twitch config: irc_ws_url overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_TWITCH_CLIENT_ID") {
		cfg.twitch.client_id = v;
		info!("twitch config: client_id overridden by env");
	}

	if let Some(v) = env_string("OVERTUBE_YOUTUBE_POLL_INTERVAL_MS")
		&& let Ok(ms) = v.parse::<u64>()
	{
		cfg.youtube.poll_interval = Duration::from_millis(ms);
		info!(ms, "youtube config: poll_interval overridden by env");
	}

	if cfg.youtube.poll_interval != cfg.youtube.effective_poll_interval() {
		warn!(
			configured_ms = cfg.youtube.poll_interval.as_millis(),
			effective_ms = cfg.youtube.effective_poll_interval().as_millis(),
			"youtube config: poll_interval outside 100..=500ms; clamping"
		);
	}

	if cfg.server.pong_timeout > cfg.server.liveness_interval {
		warn!(
			pong_timeout_ms = cfg.server.pong_timeout.as_millis(),
			liveness_interval_ms = cfg.server.liveness_interval.as_millis(),
			"server config: pong_timeout exceeds liveness_interval; sweeps may overlap"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(toml_src: &str) -> ServerConfig {
		let file: FileConfig = toml::from_str(toml_src).unwrap();
		ServerConfig::from_file(file).unwrap()
	}

	#[test]
	fn empty_file_yields_defaults() {
		let cfg = parse("");
		assert_eq!(cfg.server.ws_bind.to_string(), "127.0.0.1:1336");
		assert_eq!(cfg.server.allowed_origins, vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);
		assert_eq!(cfg.server.max_clients, DEFAULT_MAX_CLIENTS);
		assert_eq!(cfg.server.liveness_interval, Duration::from_secs(3));
		assert_eq!(cfg.server.pong_timeout, Duration::from_secs(3));
		assert_eq!(cfg.server.settle_delay, Duration::from_secs(1));
		assert!(cfg.server.metrics_bind.is_none());
		assert_eq!(cfg.telemetry.log_filter, DEFAULT_LOG_FILTER);
		assert!(cfg.telemetry.otlp_endpoint.is_none());
		assert_eq!(cfg.telemetry.service_name, "overtube");
		assert_eq!(cfg.twitch.irc_ws_url, "wss://irc-ws.chat.twitch.tv:443");
		assert_eq!(cfg.twitch.connect_timeout, Duration::from_secs(45));
		assert_eq!(cfg.youtube.language, "en");
	}

	#[test]
	fn file_values_override_defaults() {
		let cfg = parse(
			r#"
[server]
ws_bind = "0.0.0.0:4000"
allowed_origins = ["http://localhost:9000", "  "]
max_clients = 2
pong_timeout_ms = 750
settle_delay_ms = 0
health_bind = "127.0.0.1:9001"
state_path = "/tmp/overtube-state.json"

[telemetry]
log_filter = "warn,overtube_platform=trace"
otlp_endpoint = "http://127.0.0.1:4317"
service_name = "  "

[twitch]
ping_interval_secs = 45
connect_timeout_secs = 5
client_id = ""

[youtube]
poll_interval_ms = 250
region = "BR"
"#,
		);
		assert_eq!(cfg.server.ws_bind.port(), 4000);
		assert_eq!(cfg.server.allowed_origins, vec!["http://localhost:9000".to_string()]);
		assert_eq!(cfg.server.max_clients, 2);
		assert_eq!(cfg.server.pong_timeout, Duration::from_millis(750));
		assert_eq!(cfg.server.settle_delay, Duration::ZERO);
		assert_eq!(cfg.server.health_bind.as_deref(), Some("127.0.0.1:9001"));
		assert_eq!(cfg.server.state_path, Some(PathBuf::from("/tmp/overtube-state.json")));
		assert_eq!(cfg.telemetry.log_filter, "warn,overtube_platform=trace");
		assert_eq!(cfg.telemetry.otlp_endpoint.as_deref(), Some("http://127.0.0.1:4317"));
		assert_eq!(cfg.telemetry.service_name, DEFAULT_SERVICE_NAME);
		assert_eq!(cfg.twitch.ping_interval, Duration::from_secs(45));
		assert_eq!(cfg.twitch.connect_timeout, Duration::from_secs(5));
		assert_eq!(cfg.twitch.client_id, TwitchConfig::default().client_id);
		assert_eq!(cfg.youtube.poll_interval, Duration::from_millis(250));
		assert_eq!(cfg.youtube.region, "BR");

		let broadcast = cfg.server.broadcast_config();
		assert_eq!(broadcast.max_clients, 2);
		assert_eq!(broadcast.path, "/ws");
	}

	#[test]
	fn invalid_bind_is_an_error() {
		let file: FileConfig = toml::from_str("[server]\nws_bind = \"not an address\"").unwrap();
		assert!(ServerConfig::from_file(file).is_err());
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let cfg = load_server_config_from_path(&dir.path().join("absent.toml")).unwrap();
		assert_eq!(cfg.server.max_clients, DEFAULT_MAX_CLIENTS);
	}

	#[test]
	fn malformed_file_is_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "[server\nws_bind = ").unwrap();
		assert!(load_server_config_from_path(&path).is_err());
	}
}
