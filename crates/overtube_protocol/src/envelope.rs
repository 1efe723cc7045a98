#![forbid(unsafe_code)]

use overtube_domain::{Badge, ChatMessage, MessagePart, Platform};
use serde::{Deserialize, Serialize};

/// Server → overlay frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEnvelope {
	Msg(MsgEnvelope),
	Cmd(Command),
}

impl ServerEnvelope {
	pub fn ping() -> Self {
		ServerEnvelope::Cmd(Command::Ping)
	}

	pub fn refresh() -> Self {
		ServerEnvelope::Cmd(Command::Refresh)
	}

	pub fn set_new_user_id(platform: Platform, id: impl Into<String>) -> Self {
		ServerEnvelope::Cmd(Command::SetNewUserId { platform, id: id.into() })
	}
}

impl From<&ChatMessage> for ServerEnvelope {
	fn from(msg: &ChatMessage) -> Self {
		ServerEnvelope::Msg(MsgEnvelope::from(msg))
	}
}

/// Control commands pushed to overlays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
	/// Channel owner id for a platform, used by overlays to load channel assets.
	SetNewUserId { platform: Platform, id: String },
	/// Liveness check; the overlay answers with `{"command":"pong"}`.
	Ping,
	/// Ask the overlay to reload itself.
	Refresh,
}

/// A chat message as overlays render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsgEnvelope {
	pub user_name: String,
	pub platform: Platform,
	pub timestamp: i64,
	pub message_parts: Vec<WirePart>,
	pub badges: Vec<WireBadge>,
}

impl From<&ChatMessage> for MsgEnvelope {
	fn from(msg: &ChatMessage) -> Self {
		Self {
			user_name: msg.author().to_string(),
			platform: msg.platform(),
			timestamp: msg.timestamp(),
			message_parts: msg.parts().iter().map(WirePart::from).collect(),
			badges: msg.badges().iter().map(WireBadge::from).collect(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartType {
	Text,
	Emote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePart {
	pub part_type: PartType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub emote_img_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub emote_name: Option<String>,
}

impl From<&MessagePart> for WirePart {
	fn from(part: &MessagePart) -> Self {
		match part {
			MessagePart::Text { content } => Self {
				part_type: PartType::Text,
				text: Some(content.clone()),
				emote_img_url: None,
				emote_name: None,
			},
			MessagePart::Emote { image_url, name } => Self {
				part_type: PartType::Emote,
				text: None,
				emote_img_url: Some(image_url.clone()),
				emote_name: Some(name.clone()),
			},
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBadge {
	pub name: String,
	pub img_src: String,
	#[serde(rename = "type")]
	pub kind: String,
}

impl From<&Badge> for WireBadge {
	fn from(b: &Badge) -> Self {
		Self {
			name: b.name.clone(),
			img_src: b.image_url.clone(),
			kind: b.kind.clone(),
		}
	}
}

/// Overlay → server frame. Only `pong` is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReply {
	pub command: String,
}

impl ClientReply {
	pub fn pong() -> Self {
		Self {
			command: "pong".to_string(),
		}
	}

	pub fn is_pong(&self) -> bool {
		self.command == "pong"
	}
}
