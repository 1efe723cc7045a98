#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
	YouTube,
	Twitch,
}

impl Platform {
	pub const ALL: [Platform; 2] = [Platform::YouTube, Platform::Twitch];

	/// Stable string identifier (also used on the client wire).
	pub const fn as_str(self) -> &'static str {
		match self {
			Platform::YouTube => "youtube",
			Platform::Twitch => "twitch",
		}
	}
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown platform: {0}")]
	UnknownPlatform(String),
}

impl FromStr for Platform {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}

		match s.to_ascii_lowercase().as_str() {
			"twitch" | "tw" => Ok(Platform::Twitch),
			"youtube" | "you_tube" | "yt" => Ok(Platform::YouTube),
			other => Err(ParseIdError::UnknownPlatform(other.to_string())),
		}
	}
}

/// Platform-specific channel identifier (Twitch login, YouTube handle or video id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
	/// Create a non-empty, trimmed `ChannelId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelId::new(s.to_string())
	}
}

/// Lifecycle of a platform slot as seen by the broadcast server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
	Stopped,
	Starting,
	Running,
}

impl ConnectionStatus {
	pub const fn as_str(self) -> &'static str {
		match self {
			ConnectionStatus::Stopped => "stopped",
			ConnectionStatus::Starting => "starting",
			ConnectionStatus::Running => "running",
		}
	}
}

impl fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// `(platform, status)` transition published on the status channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusEvent {
	pub platform: Platform,
	pub status: ConnectionStatus,
}

impl ConnectionStatusEvent {
	pub fn new(platform: Platform, status: ConnectionStatus) -> Self {
		Self { platform, status }
	}
}

/// One piece of a chat message, in left-to-right source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
	Text { content: String },
	Emote { image_url: String, name: String },
}

impl MessagePart {
	pub fn text(content: impl Into<String>) -> Self {
		Self::Text {
			content: content.into(),
		}
	}

	pub fn emote(image_url: impl Into<String>, name: impl Into<String>) -> Self {
		Self::Emote {
			image_url: image_url.into(),
			name: name.into(),
		}
	}
}

/// Author badge resolved from a connector's badge table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Badge {
	pub name: String,
	pub image_url: String,
	/// Category tag, e.g. `moderator` or `custom`.
	pub kind: String,
}

impl Badge {
	pub fn new(name: impl Into<String>, image_url: impl Into<String>, kind: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			image_url: image_url.into(),
			kind: kind.into(),
		}
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
	#[error("message has no decodable parts")]
	NoParts,
}

/// Normalized chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChatMessage")]
pub struct ChatMessage {
	platform: Platform,
	author: String,
	parts: Vec<MessagePart>,
	timestamp: i64,
	badges: Vec<Badge>,
}

/// Unchecked wire shape; deserialization goes through [`ChatMessage::new`].
#[derive(Deserialize)]
struct RawChatMessage {
	platform: Platform,
	author: String,
	parts: Vec<MessagePart>,
	timestamp: i64,
	#[serde(default)]
	badges: Vec<Badge>,
}

impl TryFrom<RawChatMessage> for ChatMessage {
	type Error = MessageError;

	fn try_from(raw: RawChatMessage) -> Result<Self, Self::Error> {
		ChatMessage::new(raw.platform, raw.author, raw.parts, raw.timestamp, raw.badges)
	}
}

impl ChatMessage {
	/// Build a message; a message without parts is rejected.
	pub fn new(
		platform: Platform,
		author: impl Into<String>,
		parts: Vec<MessagePart>,
		timestamp: i64,
		badges: Vec<Badge>,
	) -> Result<Self, MessageError> {
		if parts.is_empty() {
			return Err(MessageError::NoParts);
		}
		Ok(Self {
			platform,
			author: author.into(),
			parts,
			timestamp,
			badges,
		})
	}

	pub fn platform(&self) -> Platform {
		self.platform
	}

	pub fn author(&self) -> &str {
		&self.author
	}

	pub fn parts(&self) -> &[MessagePart] {
		&self.parts
	}

	pub fn timestamp(&self) -> i64 {
		self.timestamp
	}

	pub fn badges(&self) -> &[Badge] {
		&self.badges
	}

	/// Concatenated text parts, emotes omitted.
	pub fn plain_text(&self) -> String {
		self.parts
			.iter()
			.filter_map(|p| match p {
				MessagePart::Text { content } => Some(content.as_str()),
				MessagePart::Emote { .. } => None,
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn platform_parse_and_display() {
		assert_eq!("twitch".parse::<Platform>().unwrap(), Platform::Twitch);
		assert_eq!("YT".parse::<Platform>().unwrap(), Platform::YouTube);
		assert_eq!(Platform::YouTube.to_string(), "youtube");
		assert!(matches!("kick".parse::<Platform>(), Err(ParseIdError::UnknownPlatform(_))));
	}

	#[test]
	fn platform_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&Platform::YouTube).unwrap(), "\"youtube\"");
		assert_eq!(serde_json::to_string(&Platform::Twitch).unwrap(), "\"twitch\"");
	}

	#[test]
	fn rejects_empty_ids() {
		assert!(ChannelId::new("").is_err());
		assert!("   ".parse::<ChannelId>().is_err());
		assert_eq!(ChannelId::new("  shroud ").unwrap().as_str(), "shroud");
	}

	#[test]
	fn message_without_parts_is_rejected() {
		let err = ChatMessage::new(Platform::Twitch, "someone", Vec::new(), 0, Vec::new()).unwrap_err();
		assert_eq!(err, MessageError::NoParts);
	}

	#[test]
	fn deserializing_checks_parts() {
		let empty = r#"{"platform":"twitch","author":"someone","parts":[],"timestamp":1,"badges":[]}"#;
		let err = serde_json::from_str::<ChatMessage>(empty).unwrap_err();
		assert!(err.to_string().contains("no decodable parts"));

		let ok = r#"{"platform":"youtube","author":"someone","parts":[{"kind":"text","content":"hi"}],"timestamp":1}"#;
		let msg = serde_json::from_str::<ChatMessage>(ok).unwrap();
		assert_eq!(msg.plain_text(), "hi");
		assert!(msg.badges().is_empty());
	}

	#[test]
	fn plain_text_skips_emotes() {
		let msg = ChatMessage::new(
			Platform::YouTube,
			"someone",
			vec![
				MessagePart::text("hi "),
				MessagePart::emote("https://img/1", ":wave:"),
				MessagePart::text(" there"),
			],
			1,
			Vec::new(),
		)
		.unwrap();
		assert_eq!(msg.plain_text(), "hi  there");
		assert_eq!(msg.parts().len(), 3);
	}
}
