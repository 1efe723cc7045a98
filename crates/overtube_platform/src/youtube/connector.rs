#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use overtube_domain::{ChannelId, ChatMessage, Platform};
use tracing::{debug, info, warn};

use super::bootstrap::{ChannelTarget, channel_id, chat_continuation, extract_initial_data, live_video_id, next_continuation};
use super::chat::{DedupCursor, decode_poll};
use super::client::YouTubeClient;
use crate::ConnectError;
use crate::connector::{Connector, ConnectorCore, Publish, PullError};

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// YouTube connector configuration.
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
	pub base_url: String,
	/// Delay between chat polls, clamped to 100..=500 ms.
	pub poll_interval: Duration,
	pub client_version: String,
	/// Interface language (`hl`).
	pub language: String,
	/// Content region (`gl`).
	pub region: String,
	pub user_agent: String,
	pub http_timeout: Duration,
}

impl Default for YouTubeConfig {
	fn default() -> Self {
		Self {
			base_url: "https://www.youtube.com".to_string(),
			poll_interval: MAX_POLL_INTERVAL,
			client_version: "2.20250626.01.00".to_string(),
			language: "en".to_string(),
			region: "US".to_string(),
			user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
				.to_string(),
			http_timeout: Duration::from_secs(10),
		}
	}
}

impl YouTubeConfig {
	pub fn effective_poll_interval(&self) -> Duration {
		self.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
	}
}

/// Polling session on one YouTube live chat.
pub struct YouTubeConnector {
	core: Arc<ConnectorCore>,
	video_id: String,
}

fn resolution(step: &str) -> impl FnOnce(anyhow::Error) -> ConnectError + '_ {
	move |e| ConnectError::Resolution(format!("{step}: {e:#}"))
}

impl YouTubeConnector {
	pub async fn connect(cfg: &YouTubeConfig, channel: ChannelId) -> Result<Self, ConnectError> {
		let client = YouTubeClient::new(cfg).map_err(|e| ConnectError::Transport(format!("{e:#}")))?;
		let target = ChannelTarget::parse(channel.as_str());
		info!(channel = %channel, ?target, "connecting to youtube chat");

		let mut owner_id = None;
		let video_id = match (&target, target.live_page_path()) {
			(ChannelTarget::Video(id), _) => id.clone(),
			(_, Some(path)) => {
				let html = client.get_page(&path).await.map_err(resolution("live page"))?;
				let data = extract_initial_data(&html)
					.ok_or_else(|| ConnectError::Resolution("live page has no ytInitialData".to_string()))?;
				owner_id = channel_id(Some(&data), &html);
				live_video_id(Some(&data), &html)
					.ok_or_else(|| ConnectError::Resolution(format!("{channel} is not live")))?
			}
			(_, None) => return Err(ConnectError::Resolution(format!("cannot resolve {channel}"))),
		};

		let watch = client
			.get_page(&format!("/watch?v={}", urlencoding::encode(&video_id)))
			.await
			.map_err(resolution("watch page"))?;
		if owner_id.is_none() {
			owner_id = channel_id(extract_initial_data(&watch).as_ref(), &watch);
		}
		let reload = chat_continuation(&watch)
			.ok_or_else(|| ConnectError::Resolution(format!("video {video_id} has no live chat")))?;

		let first = client.get_live_chat(&reload).await.map_err(resolution("chat exchange"))?;
		let continuation = next_continuation(&first).map_err(|e| ConnectError::Resolution(format!("chat exchange: {e}")))?;
		debug!(%video_id, owner_id = ?owner_id, "youtube chat resolved");

		let core = ConnectorCore::new(Platform::YouTube, channel);
		core.set_user_id(owner_id);

		let task = tokio::spawn(poll_loop(client, core.clone(), continuation, cfg.effective_poll_interval()));
		core.attach_task(task);

		Ok(Self { core, video_id })
	}

	/// The broadcast being followed.
	pub fn video_id(&self) -> &str {
		&self.video_id
	}
}

impl Connector for YouTubeConnector {
	fn platform(&self) -> Platform {
		Platform::YouTube
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

impl Drop for YouTubeConnector {
	fn drop(&mut self) {
		self.core.close();
	}
}

async fn poll_loop(client: YouTubeClient, core: Arc<ConnectorCore>, mut continuation: String, every: Duration) {
	let mut cursor = DedupCursor::default();

	let reason = loop {
		if !core.is_connected() {
			break "closed";
		}

		let resp = match client.get_live_chat(&continuation).await {
			Ok(resp) => resp,
			Err(e) => {
				warn!(channel = %core.channel(), error = %format!("{e:#}"), "youtube poll failed");
				break "poll failed";
			}
		};

		let batch = match decode_poll(&resp, &mut cursor) {
			Ok(batch) => batch,
			Err(e) => {
				warn!(channel = %core.channel(), error = %e, "youtube poll response has no continuation");
				break "continuation lost";
			}
		};
		continuation = batch.continuation;

		for msg in batch.messages {
			if core.publish(msg) == Publish::Closed {
				break;
			}
		}

		tokio::time::sleep(every).await;
	};

	core.terminate(reason);
}
