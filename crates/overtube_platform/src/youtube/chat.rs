#![forbid(unsafe_code)]

//! Decoding of `get_live_chat` poll responses.

use overtube_domain::{Badge, ChatMessage, MessagePart, Platform};
use serde_json::Value;
use tracing::{debug, warn};

use super::bootstrap::next_continuation;
use crate::json::{LookupError, lookup, lookup_array, lookup_str};
use crate::{ParseError, json_path};

/// Overlay-relative images for YouTube's built-in author badges.
const STATIC_BADGES: [(&str, &str); 3] = [
	("VERIFIED", "/images/badges/youtube-verified.svg"),
	("MODERATOR", "/images/badges/youtube-moderator.svg"),
	("OWNER", "/images/badges/youtube-owner.svg"),
];

fn static_badge_image(icon_type: &str) -> Option<&'static str> {
	STATIC_BADGES.iter().find(|(k, _)| *k == icon_type).map(|(_, v)| *v)
}

/// Highest timestamp (ms) already emitted. Anything at or below it is a repeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupCursor(i64);

impl DedupCursor {
	pub fn new(last_emitted: i64) -> Self {
		Self(last_emitted)
	}

	pub fn value(self) -> i64 {
		self.0
	}

	pub fn admits(self, timestamp: i64) -> bool {
		timestamp > self.0
	}

	pub fn advance(&mut self, timestamp: i64) {
		self.0 = self.0.max(timestamp);
	}
}

/// Result of one poll: the token for the next poll and the new messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBatch {
	pub continuation: String,
	pub messages: Vec<ChatMessage>,
}

/// Decode a poll response and advance `cursor` past everything returned.
///
/// A missing next token is an error; bad chat items are logged and skipped.
pub fn decode_poll(resp: &Value, cursor: &mut DedupCursor) -> Result<PollBatch, LookupError> {
	let continuation = next_continuation(resp)?;

	let since = *cursor;
	let messages = decode_actions(resp, since);
	for m in &messages {
		cursor.advance(m.timestamp());
	}

	Ok(PollBatch { continuation, messages })
}

/// Text messages from the response's action list that are newer than `since`.
pub fn decode_actions(resp: &Value, since: DedupCursor) -> Vec<ChatMessage> {
	let actions = match lookup_array(resp, &json_path!["continuationContents", "liveChatContinuation", "actions"], true) {
		Ok(actions) => actions,
		Err(LookupError::WrongType { .. }) => {
			warn!("youtube chat actions are not a list");
			return Vec::new();
		}
		Err(_) => return Vec::new(),
	};

	let mut out = Vec::with_capacity(actions.len());
	for action in actions {
		let Ok(item) = lookup(action, &json_path!["addChatItemAction", "item", "liveChatTextMessageRenderer"], true) else {
			continue;
		};
		match decode_text_message(item, since) {
			Ok(Some(msg)) => out.push(msg),
			Ok(None) => {}
			Err(e) => {
				metrics::counter!("overtube_parse_errors_total", "platform" => "youtube").increment(1);
				warn!(error = %e, "skipping undecodable youtube chat item");
			}
		}
	}
	out
}

/// One `liveChatTextMessageRenderer`. `Ok(None)` for items already emitted.
pub fn decode_text_message(item: &Value, since: DedupCursor) -> Result<Option<ChatMessage>, ParseError> {
	let raw_ts = lookup_str(item, &json_path!["timestampUsec"], false)
		.map_err(|_| ParseError::MissingField("timestampUsec".to_string()))?;
	let timestamp = raw_ts
		.parse::<i64>()
		.map_err(|_| ParseError::InvalidTimestamp(raw_ts.to_string()))?
		/ 1000;

	if !since.admits(timestamp) {
		return Ok(None);
	}

	let author = lookup_str(item, &json_path!["authorName", "simpleText"], false)
		.map_err(|_| ParseError::MissingField("authorName.simpleText".to_string()))?;

	let runs = lookup_array(item, &json_path!["message", "runs"], false)
		.map_err(|_| ParseError::MissingField("message.runs".to_string()))?;
	let parts = runs.iter().map(decode_run).collect::<Result<Vec<_>, _>>()?;

	let badges = lookup_array(item, &json_path!["authorBadges"], true)
		.map(|list| list.iter().filter_map(decode_badge).collect())
		.unwrap_or_default();

	let msg = ChatMessage::new(Platform::YouTube, author, parts, timestamp, badges)?;
	Ok(Some(msg))
}

fn decode_run(run: &Value) -> Result<MessagePart, ParseError> {
	if let Some(text) = run.get("text").and_then(Value::as_str) {
		return Ok(MessagePart::text(text));
	}
	let Some(emoji) = run.get("emoji") else {
		return Err(ParseError::UnknownRun);
	};

	let thumbnails = lookup_array(emoji, &json_path!["image", "thumbnails"], false)
		.map_err(|_| ParseError::MissingField("emoji.image.thumbnails".to_string()))?;
	let url = thumbnails
		.iter()
		.max_by_key(|t| t.get("width").and_then(Value::as_u64).unwrap_or(0))
		.and_then(|t| t.get("url"))
		.and_then(Value::as_str)
		.ok_or_else(|| ParseError::MissingField("emoji.image.thumbnails.url".to_string()))?;

	let name = lookup_str(emoji, &json_path!["image", "accessibility", "accessibilityData", "label"], true)
		.or_else(|_| lookup_str(emoji, &json_path!["shortcuts", 0], true))
		.map_err(|_| ParseError::MissingField("emoji name".to_string()))?;

	Ok(MessagePart::emote(url, name))
}

fn decode_badge(entry: &Value) -> Option<Badge> {
	let renderer = entry.get("liveChatAuthorBadgeRenderer")?;
	let name = renderer
		.get("tooltip")
		.and_then(Value::as_str)
		.or_else(|| lookup_str(renderer, &json_path!["accessibility", "accessibilityData", "label"], true).ok())
		.unwrap_or_default();
	let icon_type = lookup_str(renderer, &json_path!["icon", "iconType"], true).unwrap_or("CUSTOM");

	let image = lookup_str(renderer, &json_path!["customThumbnail", "thumbnails", -1, "url"], true)
		.ok()
		.or_else(|| static_badge_image(icon_type));
	let Some(image) = image else {
		debug!(icon_type, "youtube badge without image");
		return None;
	};

	Some(Badge::new(name, image, icon_type.to_ascii_lowercase()))
}
