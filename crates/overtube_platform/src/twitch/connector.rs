#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use overtube_domain::{ChannelId, ChatMessage, Platform};
use rand::Rng;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use super::badges::{BadgeTable, CHAT_LIST_BADGES_HASH, chat_list_badges_request, parse_channel_badges};
use super::irc::{Control, control_line, decode_line};
use crate::connector::{Connector, ConnectorCore, PullError};
use crate::{ConnectError, now_unix_ms};

type TwitchWs = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Twitch connector configuration.
#[derive(Debug, Clone)]
pub struct TwitchConfig {
	/// IRC-over-WebSocket endpoint.
	pub irc_ws_url: String,
	/// GraphQL endpoint used for channel badges.
	pub gql_url: String,
	/// Public web client id sent with GraphQL requests.
	pub client_id: String,
	pub badges_query_hash: String,
	/// Keepalive cadence on the chat socket.
	pub ping_interval: Duration,
	/// Bound on dialing the chat socket and writing the login lines.
	pub connect_timeout: Duration,
	pub http_timeout: Duration,
}

impl Default for TwitchConfig {
	fn default() -> Self {
		Self {
			irc_ws_url: "wss://irc-ws.chat.twitch.tv:443".to_string(),
			gql_url: "https://gql.twitch.tv/gql".to_string(),
			client_id: "kimne78kx3ncx6brgo4mv6wki5h1ko".to_string(),
			badges_query_hash: CHAT_LIST_BADGES_HASH.to_string(),
			ping_interval: Duration::from_secs(30),
			connect_timeout: Duration::from_secs(45),
			http_timeout: Duration::from_secs(10),
		}
	}
}

/// Anonymous read-only session on one Twitch channel.
pub struct TwitchConnector {
	core: Arc<ConnectorCore>,
	badges: Arc<BadgeTable>,
}

impl TwitchConnector {
	pub async fn connect(cfg: &TwitchConfig, channel: ChannelId) -> Result<Self, ConnectError> {
		let login = channel.as_str().trim_start_matches('#').to_ascii_lowercase();
		info!(channel = %login, url = %cfg.irc_ws_url, "connecting to twitch chat");

		let ws = tokio::time::timeout(cfg.connect_timeout, open_session(&cfg.irc_ws_url, &login))
			.await
			.map_err(|_| {
				ConnectError::Transport(format!("twitch irc connect timed out after {:?}", cfg.connect_timeout))
			})??;

		let core = ConnectorCore::new(Platform::Twitch, channel);
		let badges = Arc::new(load_badges(cfg, &login, &core).await);
		debug!(channel = %login, badges = badges.len(), "twitch badge table ready");

		let task = tokio::spawn(read_loop(ws, core.clone(), badges.clone(), cfg.ping_interval));
		core.attach_task(task);

		Ok(Self { core, badges })
	}

	pub fn badges(&self) -> &BadgeTable {
		&self.badges
	}
}

impl Connector for TwitchConnector {
	fn platform(&self) -> Platform {
		Platform::Twitch
	}

	fn channel(&self) -> &ChannelId {
		self.core.channel()
	}

	fn user_id(&self) -> Option<String> {
		self.core.user_id()
	}

	fn is_connected(&self) -> bool {
		self.core.is_connected()
	}

	fn try_pull(&self) -> Result<ChatMessage, PullError> {
		self.core.try_pull()
	}

	fn close(&self) {
		self.core.close();
	}
}

impl Drop for TwitchConnector {
	fn drop(&mut self) {
		self.core.close();
	}
}

fn anonymous_nick() -> String {
	let n: u32 = rand::rng().random_range(10_000..100_000);
	format!("justinfan{n}")
}

/// Login lines, in the order the server expects them.
pub(crate) fn handshake_lines(login: &str, nick: &str) -> [String; 5] {
	[
		"CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
		"PASS SCHMOOPIIE".to_string(),
		format!("NICK {nick}"),
		format!("USER {nick} 8 * :{nick}"),
		format!("JOIN #{login}"),
	]
}

/// Dial the chat socket and log in anonymously.
async fn open_session(url: &str, login: &str) -> Result<TwitchWs, ConnectError> {
	let (mut ws, _resp) = tokio_tungstenite::connect_async(url)
		.await
		.map_err(|e| ConnectError::Transport(format!("twitch irc connect: {e}")))?;

	if let Err(e) = handshake(&mut ws, login).await {
		let _ = ws.close(None).await;
		return Err(e);
	}
	Ok(ws)
}

async fn handshake(ws: &mut TwitchWs, login: &str) -> Result<(), ConnectError> {
	let nick = anonymous_nick();
	for line in handshake_lines(login, &nick) {
		ws.send(Message::text(line))
			.await
			.map_err(|e| ConnectError::Handshake(e.to_string()))?;
	}
	Ok(())
}

/// Static badges merged with the channel's own. A failed fetch leaves only the static set.
async fn load_badges(cfg: &TwitchConfig, login: &str, core: &ConnectorCore) -> BadgeTable {
	let mut table = BadgeTable::with_static();

	let resp = match fetch_channel_badges(cfg, login).await {
		Ok(resp) => resp,
		Err(e) => {
			warn!(channel = %login, error = %e, "failed to fetch twitch channel badges");
			return table;
		}
	};

	let parsed = parse_channel_badges(&resp);
	core.set_user_id(parsed.user_id);
	for (key, badge) in parsed.badges {
		table.insert(key, badge);
	}
	table
}

async fn fetch_channel_badges(cfg: &TwitchConfig, login: &str) -> anyhow::Result<serde_json::Value> {
	let client = reqwest::Client::builder().timeout(cfg.http_timeout).build()?;
	let resp = client
		.post(&cfg.gql_url)
		.header("client-id", &cfg.client_id)
		.json(&chat_list_badges_request(login, &cfg.badges_query_hash))
		.send()
		.await?
		.error_for_status()?;
	Ok(resp.json().await?)
}

async fn read_loop(mut ws: TwitchWs, core: Arc<ConnectorCore>, badges: Arc<BadgeTable>, ping_every: Duration) {
	let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
	ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

	let reason = loop {
		if !core.is_connected() {
			break "closed";
		}

		tokio::select! {
			_ = ping.tick() => {
				if let Err(e) = ws.send(Message::text("PING :tmi.twitch.tv")).await {
					warn!(channel = %core.channel(), error = %e, "twitch keepalive failed");
					break "keepalive write failed";
				}
			}

			frame = ws.next() => {
				let Some(frame) = frame else {
					break "socket ended";
				};
				let frame = match frame {
					Ok(f) => f,
					Err(e) => {
						warn!(channel = %core.channel(), error = %e, "twitch read error");
						break "read error";
					}
				};

				match frame {
					Message::Text(t) => {
						if let Err(reason) = handle_text(&mut ws, &core, &badges, &t).await {
							break reason;
						}
					}
					Message::Ping(p) => {
						let _ = ws.send(Message::Pong(p)).await;
					}
					Message::Close(frame) => {
						debug!(channel = %core.channel(), ?frame, "twitch socket closed by server");
						break "closed by server";
					}
					_ => {}
				}
			}
		}
	};

	core.terminate(reason);
	let _ = ws.close(None).await;
}

async fn handle_text(ws: &mut TwitchWs, core: &ConnectorCore, badges: &BadgeTable, text: &str) -> Result<(), &'static str> {
	for line in text.lines().filter(|l| !l.is_empty()) {
		match control_line(line) {
			Some(Control::Ping(arg)) => {
				ws.send(Message::text(format!("PONG {arg}")))
					.await
					.map_err(|_| "pong write failed")?;
				continue;
			}
			Some(Control::Reconnect) => return Err("server requested reconnect"),
			None => {}
		}

		match decode_line(line, badges, now_unix_ms()) {
			Ok(Some(msg)) => {
				core.publish(msg);
			}
			Ok(None) => {}
			Err(e) => {
				metrics::counter!("overtube_parse_errors_total", "platform" => "twitch").increment(1);
				warn!(channel = %core.channel(), error = %e, "skipping undecodable twitch line");
				debug!(raw = line, "undecodable twitch line");
			}
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn handshake_order_and_nick() {
		let lines = handshake_lines("somechannel", "justinfan12345");
		assert_eq!(
			lines,
			[
				"CAP REQ :twitch.tv/tags twitch.tv/commands",
				"PASS SCHMOOPIIE",
				"NICK justinfan12345",
				"USER justinfan12345 8 * :justinfan12345",
				"JOIN #somechannel",
			]
		);
	}

	#[test]
	fn anonymous_nick_is_randomized_justinfan() {
		let nick = anonymous_nick();
		let digits = nick.strip_prefix("justinfan").unwrap();
		assert_eq!(digits.len(), 5);
		assert!(digits.chars().all(|c| c.is_ascii_digit()));
	}
}
