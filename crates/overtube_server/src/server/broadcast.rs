#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use overtube_domain::{ConnectionStatus, ConnectionStatusEvent, Platform};
use overtube_platform::{Connector, PullError};
use overtube_protocol::{ServerEnvelope, encode_envelope};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_ALLOWED_ORIGIN, DEFAULT_MAX_CLIENTS};
use crate::server::client::ClientHandle;
use crate::server::state::{AdmissionRejected, Reservation, ServerState};

/// Broadcast server configuration.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
	pub bind: SocketAddr,
	/// Upgrade path overlays connect to.
	pub path: String,
	pub allowed_origins: Vec<String>,
	pub max_clients: usize,
	pub liveness_interval: Duration,
	/// How long a pinged client has to answer.
	pub pong_timeout: Duration,
	pub settle_delay: Duration,
	/// Pause after a scan that moved no message.
	pub idle_delay: Duration,
	pub status_capacity: usize,
}

impl Default for BroadcastConfig {
	fn default() -> Self {
		Self {
			bind: SocketAddr::from(([127, 0, 0, 1], 1336)),
			path: "/ws".to_string(),
			allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
			max_clients: DEFAULT_MAX_CLIENTS,
			liveness_interval: Duration::from_secs(3),
			pong_timeout: Duration::from_secs(3),
			settle_delay: Duration::from_secs(1),
			idle_delay: Duration::from_millis(50),
			status_capacity: 64,
		}
	}
}

struct Shared {
	cfg: BroadcastConfig,
	state: Arc<Mutex<ServerState>>,
	status_tx: Mutex<Option<broadcast::Sender<ConnectionStatusEvent>>>,
	next_client_id: AtomicU64,
}

/// Multiplexes connector queues onto every admitted overlay socket.
pub struct BroadcastServer {
	shared: Arc<Shared>,
	local_addr: SocketAddr,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	stopped: AtomicBool,
}

impl BroadcastServer {
	/// Bind the overlay listener and start the accept, fan-out and liveness tasks.
	pub async fn start(cfg: BroadcastConfig) -> anyhow::Result<Self> {
		let listener = TcpListener::bind(cfg.bind)
			.await
			.with_context(|| format!("bind overlay socket {}", cfg.bind))?;
		let local_addr = listener.local_addr().context("overlay socket address")?;

		let (status_tx, _) = broadcast::channel(cfg.status_capacity.max(1));
		let shared = Arc::new(Shared {
			state: Arc::new(Mutex::new(ServerState::new(cfg.max_clients))),
			status_tx: Mutex::new(Some(status_tx)),
			next_client_id: AtomicU64::new(1),
			cfg,
		});

		let tasks = vec![
			tokio::spawn(accept_loop(listener, shared.clone())),
			tokio::spawn(fan_out_loop(shared.clone())),
			tokio::spawn(liveness_loop(shared.clone())),
		];

		info!(%local_addr, path = %shared.cfg.path, max_clients = shared.cfg.max_clients, "overlay websocket listening");

		Ok(Self {
			shared,
			local_addr,
			tasks: Mutex::new(tasks),
			stopped: AtomicBool::new(false),
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	/// Status transitions. A stopped server hands out an already-closed receiver.
	pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatusEvent> {
		match self.shared.status_tx.lock().as_ref() {
			Some(tx) => tx.subscribe(),
			None => broadcast::channel(1).1,
		}
	}

	pub fn emit_status(&self, platform: Platform, status: ConnectionStatus) {
		self.shared.emit_status(platform, status);
	}

	/// Register a connector, mark its platform running and announce its user id.
	pub async fn add_stream(&self, connector: Arc<dyn Connector>) {
		if self.is_stopped() {
			connector.close();
			return;
		}

		let platform = connector.platform();
		let user_id = connector.user_id();
		info!(%platform, channel = %connector.channel(), user_id = ?user_id, "chat stream added");
		self.shared.state.lock().add_connector(connector);
		metrics::gauge!("overtube_active_streams").set(self.connector_count() as f64);
		self.shared.emit_status(platform, ConnectionStatus::Running);

		match user_id {
			Some(id) => self.shared.broadcast(&ServerEnvelope::set_new_user_id(platform, id)).await,
			None => debug!(%platform, "user id unresolved; skipping setNewUserId"),
		}
	}

	/// Close and detach every connector for `platform`.
	pub fn remove_all_streams_from_platform(&self, platform: Platform) {
		let removed = self.shared.state.lock().take_platform(platform);
		for connector in &removed {
			connector.close();
		}
		if !removed.is_empty() {
			info!(%platform, count = removed.len(), "chat streams removed");
		}
		metrics::gauge!("overtube_active_streams").set(self.connector_count() as f64);
		self.shared.emit_status(platform, ConnectionStatus::Stopped);
	}

	/// Ask every overlay to reload.
	pub async fn refresh_clients(&self) {
		self.shared.broadcast(&ServerEnvelope::refresh()).await;
	}

	pub fn client_count(&self) -> usize {
		self.shared.state.lock().client_count()
	}

	pub fn connector_count(&self) -> usize {
		self.shared.state.lock().connector_count()
	}

	pub fn active_platforms(&self) -> Vec<Platform> {
		let mut platforms: Vec<Platform> = self.shared.state.lock().connectors().iter().map(|c| c.platform()).collect();
		platforms.sort();
		platforms.dedup();
		platforms
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::Acquire)
	}

	/// Close every socket, abort the server tasks and close the status channel. Runs once.
	pub async fn stop(&self) {
		if self.stopped.swap(true, Ordering::AcqRel) {
			return;
		}

		for task in self.tasks.lock().drain(..) {
			task.abort();
		}

		let (connectors, clients) = self.shared.state.lock().shut_down();
		for connector in &connectors {
			connector.close();
		}
		futures::future::join_all(clients.iter().map(|c| c.close())).await;

		self.shared.status_tx.lock().take();
		metrics::gauge!("overtube_ws_clients").set(0.0);
		metrics::gauge!("overtube_active_streams").set(0.0);
		info!(connectors = connectors.len(), clients = clients.len(), "broadcast server stopped");
	}
}

impl Drop for BroadcastServer {
	fn drop(&mut self) {
		for task in self.tasks.lock().drain(..) {
			task.abort();
		}
	}
}

impl Shared {
	fn emit_status(&self, platform: Platform, status: ConnectionStatus) {
		debug!(%platform, %status, "connection status");
		if let Some(tx) = self.status_tx.lock().as_ref() {
			let _ = tx.send(ConnectionStatusEvent::new(platform, status));
		}
	}

	/// Path, origin and capacity checks run inside the upgrade handshake.
	fn screen(&self, req: &Request) -> Result<Reservation, StatusCode> {
		if req.uri().path() != self.cfg.path {
			return Err(StatusCode::NOT_FOUND);
		}

		if let Some(origin) = req.headers().get(header::ORIGIN) {
			let allowed = origin
				.to_str()
				.map(|o| self.cfg.allowed_origins.iter().any(|a| a == o))
				.unwrap_or(false);
			if !allowed {
				debug!(origin = ?origin, "overlay origin not allowed");
				metrics::counter!("overtube_ws_refused_total", "reason" => "origin").increment(1);
				return Err(StatusCode::FORBIDDEN);
			}
		}

		Reservation::acquire(&self.state).map_err(|e: AdmissionRejected| {
			debug!(reason = %e, "overlay admission refused");
			metrics::counter!("overtube_ws_refused_total", "reason" => e.as_str()).increment(1);
			StatusCode::SERVICE_UNAVAILABLE
		})
	}

	async fn broadcast(&self, env: &ServerEnvelope) {
		let text = match encode_envelope(env) {
			Ok(text) => text,
			Err(e) => {
				warn!(error = %e, "failed to encode overlay envelope");
				return;
			}
		};
		let msg = Message::text(text);

		let clients = self.state.lock().clients();
		if clients.is_empty() {
			return;
		}

		let results = futures::future::join_all(clients.iter().map(|c| {
			let msg = msg.clone();
			async move { (c.id(), c.send(msg).await) }
		}))
		.await;

		for (id, res) in results {
			if let Err(e) = res {
				self.evict(id, &e.to_string()).await;
			}
		}
	}

	async fn send_to(&self, client: &ClientHandle, env: &ServerEnvelope) {
		let text = match encode_envelope(env) {
			Ok(text) => text,
			Err(e) => {
				warn!(error = %e, "failed to encode overlay envelope");
				return;
			}
		};
		if let Err(e) = client.send(Message::text(text)).await {
			self.evict(client.id(), &e.to_string()).await;
		}
	}

	async fn evict(&self, id: u64, reason: &str) {
		let Some(client) = self.state.lock().remove_client(id) else {
			return;
		};
		info!(client_id = id, peer = %client.peer(), reason, "evicting overlay client");
		metrics::counter!("overtube_ws_evicted_total").increment(1);
		metrics::gauge!("overtube_ws_clients").set(self.state.lock().client_count() as f64);
		client.close().await;
	}

	async fn close_all_clients(&self) {
		let clients = self.state.lock().drain_clients();
		if clients.is_empty() {
			return;
		}
		info!(count = clients.len(), "no active streams; closing overlay clients");
		metrics::gauge!("overtube_ws_clients").set(0.0);
		futures::future::join_all(clients.iter().map(|c| c.close())).await;
	}

	fn drop_connector(&self, connector: &Arc<dyn Connector>) {
		if !self.state.lock().remove_connector(connector) {
			return;
		}
		connector.close();
		let platform = connector.platform();
		warn!(%platform, channel = %connector.channel(), "chat stream disconnected; removing");
		metrics::counter!("overtube_stream_disconnects_total", "platform" => platform.as_str()).increment(1);
		metrics::gauge!("overtube_active_streams").set(self.state.lock().connector_count() as f64);
		self.emit_status(platform, ConnectionStatus::Stopped);
	}
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(v) => v,
			Err(e) => {
				warn!(error = %e, "overlay accept failed");
				tokio::time::sleep(Duration::from_millis(100)).await;
				continue;
			}
		};

		let shared = shared.clone();
		tokio::spawn(async move {
			handle_upgrade(shared, stream, peer).await;
		});
	}
}

async fn handle_upgrade(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
	let mut slot: Option<Reservation> = None;
	let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
		match shared.screen(req) {
			Ok(reservation) => {
				slot = Some(reservation);
				Ok(resp)
			}
			Err(status) => {
				let mut refusal = ErrorResponse::new(None);
				*refusal.status_mut() = status;
				Err(refusal)
			}
		}
	};

	let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
		Ok(socket) => socket,
		Err(e) => {
			debug!(%peer, error = %e, "overlay upgrade not completed");
			return;
		}
	};
	let Some(slot) = slot.take() else {
		return;
	};

	let id = shared.next_client_id.fetch_add(1, Ordering::Relaxed);
	let client = Arc::new(ClientHandle::new(id, peer, socket));
	if let Err(e) = slot.admit(client.clone()) {
		debug!(client_id = id, %peer, reason = %e, "overlay client admitted after stop");
		client.close().await;
		return;
	}

	info!(client_id = id, %peer, "overlay client connected");
	metrics::counter!("overtube_ws_accepted_total").increment(1);
	metrics::gauge!("overtube_ws_clients").set(shared.state.lock().client_count() as f64);

	if !shared.cfg.settle_delay.is_zero() {
		tokio::time::sleep(shared.cfg.settle_delay).await;
	}

	let connectors = shared.state.lock().connectors();
	for connector in connectors {
		let Some(user_id) = connector.user_id() else {
			continue;
		};
		shared
			.send_to(&client, &ServerEnvelope::set_new_user_id(connector.platform(), user_id))
			.await;
	}
}

async fn fan_out_loop(shared: Arc<Shared>) {
	loop {
		let connectors = shared.state.lock().connectors();

		if connectors.is_empty() {
			shared.close_all_clients().await;
			tokio::time::sleep(shared.cfg.idle_delay).await;
			continue;
		}

		let mut moved = false;
		for connector in &connectors {
			if !connector.is_connected() {
				shared.drop_connector(connector);
				continue;
			}

			match connector.try_pull() {
				Ok(msg) => {
					moved = true;
					metrics::counter!("overtube_fanout_messages_total", "platform" => msg.platform().as_str()).increment(1);
					shared.broadcast(&ServerEnvelope::from(&msg)).await;
				}
				Err(PullError::Empty) => {}
				Err(PullError::Closed) => shared.drop_connector(connector),
			}
		}

		if !moved {
			tokio::time::sleep(shared.cfg.idle_delay).await;
		}
	}
}

async fn liveness_loop(shared: Arc<Shared>) {
	let every = shared.cfg.liveness_interval;
	let mut tick = tokio::time::interval_at(Instant::now() + every, every);
	tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let ping = match encode_envelope(&ServerEnvelope::ping()) {
		Ok(text) => Message::text(text),
		Err(e) => {
			warn!(error = %e, "failed to encode ping; liveness sweep disabled");
			return;
		}
	};

	loop {
		tick.tick().await;

		let clients = shared.state.lock().clients();
		if clients.is_empty() {
			continue;
		}

		let wait = shared.cfg.pong_timeout;
		let results = futures::future::join_all(clients.iter().map(|c| {
			let ping = ping.clone();
			async move { (c.id(), c.check_liveness(ping, wait).await) }
		}))
		.await;

		for (id, res) in results {
			if let Err(e) = res {
				shared.evict(id, &e.to_string()).await;
			}
		}
	}
}
