#![forbid(unsafe_code)]

//! Decoding of Twitch IRC lines into normalized messages.

use std::collections::HashMap;

use overtube_domain::{ChatMessage, MessagePart, Platform};
use tracing::debug;

use super::badges::BadgeTable;
use crate::ParseError;

const PRIVMSG_MARKER: &str = "PRIVMSG";

pub fn emote_image_url(id: &str) -> String {
	format!("https://static-cdn.jtvnw.net/emoticons/v2/{id}/default/dark/2.0")
}

/// Non-chat lines the read loop has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
	/// Server keepalive; answer with `PONG` + the same argument.
	Ping(String),
	/// Server asks us to reconnect.
	Reconnect,
}

pub fn control_line(line: &str) -> Option<Control> {
	if let Some(arg) = line.strip_prefix("PING") {
		return Some(Control::Ping(arg.trim().to_string()));
	}
	let command = if line.starts_with('@') || line.starts_with(':') {
		line.split(' ').find(|p| !p.starts_with('@') && !p.starts_with(':'))
	} else {
		line.split(' ').next()
	};
	match command {
		Some("RECONNECT") => Some(Control::Reconnect),
		_ => None,
	}
}

/// Tags and text of a `PRIVMSG` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivMsg<'a> {
	pub tags: HashMap<&'a str, &'a str>,
	pub text: &'a str,
}

/// Split a raw line into tags and text. `Ok(None)` when the line is not a chat message.
pub fn split_privmsg(line: &str) -> Result<Option<PrivMsg<'_>>, ParseError> {
	let Some((prefix, rest)) = line.split_once(PRIVMSG_MARKER) else {
		return Ok(None);
	};

	// Tag values never contain spaces; what follows the first one is the IRC source.
	let tag_section = prefix.split_once(' ').map_or(prefix, |(tags, _)| tags);

	let mut tags = HashMap::new();
	for entry in tag_section.split(';') {
		let mut kv = entry.split('=');
		let (Some(key), Some(value), None) = (kv.next(), kv.next(), kv.next()) else {
			return Err(ParseError::MalformedTag(entry.to_string()));
		};
		tags.insert(key.trim().trim_start_matches('@'), value.trim());
	}

	let text = rest
		.split_once(':')
		.map(|(_, text)| text.trim_end_matches(['\r', '\n']))
		.unwrap_or_default();

	Ok(Some(PrivMsg { tags, text }))
}

struct EmoteRange {
	start: usize,
	end: usize,
	part: MessagePart,
}

/// Split `text` into text and emote parts using the `emotes` tag (`id:s-e,s-e/id:s-e`).
///
/// Offsets are byte offsets into `text`.
pub fn message_parts(text: &str, emotes: &str) -> Result<Vec<MessagePart>, ParseError> {
	if emotes.is_empty() {
		return Ok(if text.is_empty() { Vec::new() } else { vec![MessagePart::text(text)] });
	}

	let mut ranges = Vec::new();
	for entry in emotes.split('/') {
		if entry.is_empty() {
			debug!("skipping empty emote entry");
			continue;
		}
		let fields: Vec<&str> = entry.split(':').collect();
		let [id, positions] = fields.as_slice() else {
			debug!(entry, "skipping malformed emote entry");
			continue;
		};
		let image_url = emote_image_url(id);

		for pos in positions.split(',') {
			let Some((start, end)) = pos.split_once('-') else {
				debug!(entry, "skipping malformed emote range");
				continue;
			};
			let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) else {
				debug!(entry, "skipping non-numeric emote range");
				continue;
			};

			if start > text.len() {
				return Err(ParseError::EmoteStartOutOfRange { start, len: text.len() });
			}
			let name_end = end.saturating_add(1).min(text.len());
			let name = text.get(start..name_end).ok_or(ParseError::EmoteRangeInvalid { start, end })?;

			ranges.push(EmoteRange {
				start,
				end,
				part: MessagePart::emote(image_url.clone(), name),
			});
		}
	}

	// Ranges are validated even when there is nothing to split.
	if text.is_empty() {
		return Ok(Vec::new());
	}

	ranges.sort_by_key(|r| r.start);

	let mut parts = Vec::with_capacity(ranges.len() * 2 + 1);
	let mut cursor = 0usize;
	for r in ranges {
		if r.start < cursor {
			return Err(ParseError::EmoteOverlap { start: r.start, cursor });
		}
		if r.start > cursor {
			let gap = text
				.get(cursor..r.start)
				.ok_or(ParseError::EmoteRangeInvalid { start: r.start, end: r.end })?;
			parts.push(MessagePart::text(gap));
		}
		parts.push(r.part);
		cursor = r.end.saturating_add(1);
	}

	if cursor < text.len() {
		let tail = text
			.get(cursor..)
			.ok_or(ParseError::EmoteRangeInvalid { start: cursor, end: text.len() })?;
		parts.push(MessagePart::text(tail));
	}

	Ok(parts)
}

/// Decode one IRC line. Non-chat lines yield `Ok(None)`.
///
/// `tmi-sent-ts` is in milliseconds and stored divided by 1000; `now_ms` fills in when it is absent.
pub fn decode_line(line: &str, badges: &BadgeTable, now_ms: i64) -> Result<Option<ChatMessage>, ParseError> {
	let Some(privmsg) = split_privmsg(line)? else {
		return Ok(None);
	};
	let tag = |key: &str| privmsg.tags.get(key).copied().unwrap_or_default();

	let timestamp = tag("tmi-sent-ts").parse::<i64>().unwrap_or(now_ms) / 1000;
	let parts = message_parts(privmsg.text, tag("emotes"))?;
	let message = ChatMessage::new(
		Platform::Twitch,
		tag("display-name"),
		parts,
		timestamp,
		badges.resolve(tag("badges")),
	)?;

	Ok(Some(message))
}
