#![forbid(unsafe_code)]

pub mod connector;
pub mod json;
pub mod twitch;
pub mod youtube;

use std::sync::Arc;

use async_trait::async_trait;
use overtube_domain::{ChannelId, MessageError, Platform};
use thiserror::Error;
use uuid::Uuid;

pub use connector::{Connector, ConnectorCore, MESSAGE_QUEUE_CAPACITY, Publish, PullError};

/// Errors that abort `connect`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
	/// The chat socket could not be opened.
	#[error("transport error: {0}")]
	Transport(String),

	/// Writing the login sequence failed.
	#[error("handshake failed: {0}")]
	Handshake(String),

	/// A bootstrap lookup (live video, continuation token) failed.
	#[error("resolution failed: {0}")]
	Resolution(String),
}

/// Per-message decode failures. Logged and skipped; never fatal for a connector.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("malformed tag entry: {0:?}")]
	MalformedTag(String),

	#[error("emote start {start} beyond message length {len}")]
	EmoteStartOutOfRange { start: usize, len: usize },

	#[error("emote range starting at {start} overlaps previous range ending before {cursor}")]
	EmoteOverlap { start: usize, cursor: usize },

	#[error("emote range {start}-{end} does not fall on character boundaries")]
	EmoteRangeInvalid { start: usize, end: usize },

	#[error("missing field: {0}")]
	MissingField(String),

	#[error("invalid timestamp: {0:?}")]
	InvalidTimestamp(String),

	#[error("run is neither text nor emoji")]
	UnknownRun,

	#[error(transparent)]
	Message(#[from] MessageError),
}

/// Creates connectors for the orchestrator.
#[async_trait]
pub trait ConnectorFactory: Send + Sync + 'static {
	async fn connect(&self, platform: Platform, channel: ChannelId) -> Result<Arc<dyn Connector>, ConnectError>;
}

/// Factory backed by the real Twitch and YouTube connectors.
#[derive(Debug, Clone, Default)]
pub struct LiveConnectorFactory {
	pub twitch: twitch::TwitchConfig,
	pub youtube: youtube::YouTubeConfig,
}

impl LiveConnectorFactory {
	pub fn new(twitch: twitch::TwitchConfig, youtube: youtube::YouTubeConfig) -> Self {
		Self { twitch, youtube }
	}
}

#[async_trait]
impl ConnectorFactory for LiveConnectorFactory {
	async fn connect(&self, platform: Platform, channel: ChannelId) -> Result<Arc<dyn Connector>, ConnectError> {
		match platform {
			Platform::Twitch => {
				let c = twitch::TwitchConnector::connect(&self.twitch, channel).await?;
				Ok(Arc::new(c))
			}
			Platform::YouTube => {
				let c = youtube::YouTubeConnector::connect(&self.youtube, channel).await?;
				Ok(Arc::new(c))
			}
		}
	}
}

/// Fresh id for log correlation of one connector session.
pub fn new_session_id() -> String {
	Uuid::new_v4().to_string()
}

pub(crate) fn now_unix_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}
