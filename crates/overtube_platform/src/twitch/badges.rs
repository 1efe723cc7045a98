#![forbid(unsafe_code)]

use std::collections::HashMap;

use overtube_domain::Badge;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::json::{lookup_array, lookup_str};
use crate::json_path;

const BADGE_CDN: &str = "https://static-cdn.jtvnw.net/badges/v1";

/// Persisted query hash of the web client's `ChatList_Badges` operation.
pub const CHAT_LIST_BADGES_HASH: &str = "838a7e0b47c09cac05f93ff081a9ff4f876b68f7624f0fc465fe30031e372fc2";

const STATIC_BADGES: [(&str, &str, &str, &str); 6] = [
	("moderator/1", "Moderator", "3267646d-33f0-4b17-b3df-f923a41db1d0", "moderator"),
	("staff/1", "Twitch Staff", "d97c37bd-a6f5-4c38-8f57-4e4bef88af34", "staff"),
	("vip/1", "VIP", "b817aba4-fad8-49e2-b88a-7cc744dfa6ec", "vip"),
	("partner/1", "Verified", "d12a2e27-16f6-41d0-ab77-b780518f00a3", "partner"),
	("founder/0", "Founder", "511b78a9-ab37-472f-9569-457753bbe7d3", "founder"),
	("premium/1", "Prime", "bbbe0db0-a598-423e-86d0-f9fb98ca1933", "prime"),
];

/// `set/version` → badge. Filled once at connect time, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct BadgeTable {
	entries: HashMap<String, Badge>,
}

impl BadgeTable {
	/// Global badges every channel shares.
	pub fn with_static() -> Self {
		let entries = STATIC_BADGES
			.iter()
			.map(|(key, name, uuid, kind)| ((*key).to_string(), Badge::new(*name, format!("{BADGE_CDN}/{uuid}/3"), *kind)))
			.collect();
		Self { entries }
	}

	pub fn insert(&mut self, key: impl Into<String>, badge: Badge) {
		self.entries.insert(key.into(), badge);
	}

	pub fn get(&self, key: &str) -> Option<&Badge> {
		self.entries.get(key)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Resolve a `badges` tag (`moderator/1,subscriber/12`) in tag order. Unknown keys are omitted.
	pub fn resolve(&self, tag: &str) -> Vec<Badge> {
		tag.split(',')
			.filter(|k| !k.is_empty())
			.filter_map(|k| self.get(k).cloned())
			.collect()
	}
}

/// Request body for the `ChatList_Badges` persisted query.
pub fn chat_list_badges_request(login: &str, hash: &str) -> Value {
	json!([{
		"operationName": "ChatList_Badges",
		"variables": { "channelLogin": login },
		"extensions": {
			"persistedQuery": { "version": 1, "sha256Hash": hash }
		}
	}])
}

/// Channel user id and custom badges from a `ChatList_Badges` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelBadges {
	pub user_id: Option<String>,
	pub badges: Vec<(String, Badge)>,
}

pub fn parse_channel_badges(resp: &Value) -> ChannelBadges {
	let mut out = ChannelBadges::default();

	match lookup_str(resp, &json_path![0, "data", "user", "id"], false) {
		Ok(id) => out.user_id = Some(id.to_string()),
		Err(e) => warn!(error = %e, "twitch badge response has no user id"),
	}

	let list = match lookup_array(resp, &json_path![0, "data", "user", "broadcastBadges"], false) {
		Ok(list) => list,
		Err(_) => return out,
	};

	for entry in list {
		let fields = (
			entry.get("setID").and_then(Value::as_str),
			entry.get("version").and_then(Value::as_str),
			entry.get("title").and_then(Value::as_str),
			entry.get("image4x").and_then(Value::as_str),
		);
		let (Some(set), Some(version), Some(title), Some(image)) = fields else {
			debug!(badge = %entry, "skipping incomplete channel badge");
			continue;
		};
		out.badges.push((format!("{set}/{version}"), Badge::new(title, image, "custom")));
	}

	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resolves_in_tag_order() {
		let table = BadgeTable::with_static();
		let badges = table.resolve("moderator/1,founder/0");
		let names: Vec<_> = badges.iter().map(|b| b.name.as_str()).collect();
		assert_eq!(names, ["Moderator", "Founder"]);
		assert_eq!(badges[0].kind, "moderator");
		assert_eq!(
			badges[0].image_url,
			"https://static-cdn.jtvnw.net/badges/v1/3267646d-33f0-4b17-b3df-f923a41db1d0/3"
		);
	}

	#[test]
	fn unknown_keys_are_omitted() {
		let table = BadgeTable::with_static();
		assert!(table.resolve("unknown/1").is_empty());
		assert!(table.resolve("").is_empty());
		assert_eq!(table.resolve("unknown/1,,vip/1").len(), 1);
	}

	#[test]
	fn static_table_has_six_keys() {
		let table = BadgeTable::with_static();
		assert_eq!(table.len(), 6);
		assert_eq!(table.get("premium/1").map(|b| b.kind.as_str()), Some("prime"));
	}

	#[test]
	fn parses_channel_badges_response() {
		let resp = json!([{
			"data": {
				"user": {
					"id": "71092938",
					"broadcastBadges": [
						{ "setID": "subscriber", "version": "0", "title": "Subscriber", "image4x": "https://cdn/sub0" },
						{ "setID": "bits", "title": "broken" },
						{ "setID": "subscriber", "version": "12", "title": "1-Year Subscriber", "image4x": "https://cdn/sub12" }
					]
				}
			}
		}]);

		let parsed = parse_channel_badges(&resp);
		assert_eq!(parsed.user_id.as_deref(), Some("71092938"));
		assert_eq!(parsed.badges.len(), 2);
		assert_eq!(parsed.badges[1].0, "subscriber/12");
		assert_eq!(parsed.badges[1].1, Badge::new("1-Year Subscriber", "https://cdn/sub12", "custom"));
	}

	#[test]
	fn missing_user_yields_empty_result() {
		let parsed = parse_channel_badges(&json!([{ "data": { "user": null } }]));
		assert_eq!(parsed, ChannelBadges::default());
	}

	#[test]
	fn request_body_carries_login_and_hash() {
		let body = chat_list_badges_request("somechannel", CHAT_LIST_BADGES_HASH);
		assert_eq!(body[0]["variables"]["channelLogin"], "somechannel");
		assert_eq!(body[0]["extensions"]["persistedQuery"]["sha256Hash"], CHAT_LIST_BADGES_HASH);
	}
}
