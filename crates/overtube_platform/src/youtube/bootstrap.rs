#![forbid(unsafe_code)]

//! Scraping helpers for the public channel and watch pages.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::json::{LookupError, lookup_str};
use crate::json_path;

const INITIAL_DATA_MARKERS: [&str; 2] = ["var ytInitialData = ", "window[\"ytInitialData\"] = "];

const CHAT_CONTINUATION_MARKER: &str = r#"{"liveChatRenderer":{"continuations":[{"reloadContinuationData":{"continuation":""#;

static CANONICAL_WATCH_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r#"<link rel="canonical" href="https://www\.youtube\.com/watch\?v=([0-9A-Za-z_-]{11})""#)
		.expect("canonical link pattern")
});

static CHANNEL_ID_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r#""(?:channelId|externalChannelId)":"(UC[0-9A-Za-z_-]{22})""#).expect("channel id pattern"));

/// What the user typed into the channel field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
	/// `@handle`, stored with the leading `@`.
	Handle(String),
	/// `UC...` channel id.
	Channel(String),
	/// A specific live video; skips the channel page.
	Video(String),
}

fn is_video_id(s: &str) -> bool {
	s.len() == 11 && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn is_channel_id(s: &str) -> bool {
	s.len() == 24 && s.starts_with("UC")
}

impl ChannelTarget {
	/// Normalize `@handle`, `handle`, channel/watch/live URLs, `youtu.be` links and bare video ids.
	///
	/// A bare 11-character token is taken as a video id; prefix handles of that length with `@`.
	pub fn parse(input: &str) -> Self {
		let input = input.trim().trim_end_matches('/');

		if input.contains("://") || input.starts_with("www.") || input.starts_with("youtube.com") || input.starts_with("youtu.be") {
			let with_scheme = if input.contains("://") {
				input.to_string()
			} else {
				format!("https://{input}")
			};
			if let Ok(url) = Url::parse(&with_scheme)
				&& let Some(target) = Self::from_url(&url)
			{
				return target;
			}
		}

		if let Some(handle) = input.strip_prefix('@') {
			return ChannelTarget::Handle(format!("@{handle}"));
		}
		if is_channel_id(input) {
			return ChannelTarget::Channel(input.to_string());
		}
		if is_video_id(input) {
			return ChannelTarget::Video(input.to_string());
		}
		ChannelTarget::Handle(format!("@{input}"))
	}

	fn from_url(url: &Url) -> Option<Self> {
		if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "v") {
			return is_video_id(&v).then(|| ChannelTarget::Video(v.into_owned()));
		}

		let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
		let host = url.host_str().unwrap_or_default();
		match segments.as_slice() {
			[id] if host.ends_with("youtu.be") && is_video_id(id) => Some(ChannelTarget::Video((*id).to_string())),
			["live", id, ..] if is_video_id(id) => Some(ChannelTarget::Video((*id).to_string())),
			["channel", id, ..] => Some(ChannelTarget::Channel((*id).to_string())),
			[handle, ..] if handle.starts_with('@') => Some(ChannelTarget::Handle((*handle).to_string())),
			_ => None,
		}
	}

	/// Path of the page that redirects to the current live broadcast.
	pub fn live_page_path(&self) -> Option<String> {
		match self {
			ChannelTarget::Handle(h) => Some(format!("/{h}/live")),
			ChannelTarget::Channel(id) => Some(format!("/channel/{id}/live")),
			ChannelTarget::Video(_) => None,
		}
	}
}

/// The `ytInitialData` object embedded in a page.
pub fn extract_initial_data(html: &str) -> Option<Value> {
	let start = INITIAL_DATA_MARKERS
		.iter()
		.find_map(|m| html.find(m).map(|i| i + m.len()))?;
	let mut stream = serde_json::Deserializer::from_str(&html[start..]).into_iter::<Value>();
	stream.next()?.ok()
}

/// Id of the broadcast a channel's live page points at. `None` when the channel is offline.
pub fn live_video_id(initial_data: Option<&Value>, html: &str) -> Option<String> {
	if let Some(data) = initial_data
		&& let Ok(id) = lookup_str(data, &json_path!["currentVideoEndpoint", "watchEndpoint", "videoId"], true)
	{
		return Some(id.to_string());
	}
	CANONICAL_WATCH_RE
		.captures(html)
		.and_then(|c| c.get(1))
		.map(|m| m.as_str().to_string())
}

/// Owning channel id (`UC...`), from the initial data or the page markup.
pub fn channel_id(initial_data: Option<&Value>, html: &str) -> Option<String> {
	if let Some(data) = initial_data
		&& let Ok(id) = lookup_str(data, &json_path!["metadata", "channelMetadataRenderer", "externalId"], true)
	{
		return Some(id.to_string());
	}
	CHANNEL_ID_RE
		.captures(html)
		.and_then(|c| c.get(1))
		.map(|m| m.as_str().to_string())
}

/// Initial chat token from the watch page's `liveChatRenderer`.
pub fn chat_continuation(html: &str) -> Option<String> {
	let start = html.find(CHAT_CONTINUATION_MARKER)? + CHAT_CONTINUATION_MARKER.len();
	let rest = &html[start..];
	let end = rest.find('"')?;
	let token = &rest[..end];
	(!token.is_empty()).then(|| token.to_string())
}

const CONTINUATION_KINDS: [&str; 3] = [
	"invalidationContinuationData",
	"timedContinuationData",
	"reloadContinuationData",
];

/// Token for the next poll: the "Live chat" view selector entry, else the first listed continuation.
pub fn next_continuation(resp: &Value) -> Result<String, LookupError> {
	let primary = lookup_str(
		resp,
		&json_path![
			"continuationContents",
			"liveChatContinuation",
			"header",
			"liveChatHeaderRenderer",
			"viewSelector",
			"sortFilterSubMenuRenderer",
			"subMenuItems",
			-1,
			"continuation",
			"reloadContinuationData",
			"continuation"
		],
		true,
	);
	let err = match primary {
		Ok(token) => return Ok(token.to_string()),
		Err(e) => e,
	};

	CONTINUATION_KINDS
		.iter()
		.find_map(|kind| {
			lookup_str(
				resp,
				&json_path!["continuationContents", "liveChatContinuation", "continuations", 0, *kind, "continuation"],
				true,
			)
			.ok()
		})
		.map(str::to_string)
		.ok_or(err)
}
