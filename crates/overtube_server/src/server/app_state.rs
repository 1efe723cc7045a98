#![forbid(unsafe_code)]

use std::fs;
use std::path::Path;

use anyhow::Context as _;
use overtube_domain::Platform;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// User-editable CSS attached to a chat style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatStyleCustomCss {
	#[serde(rename = "Id")]
	pub id: u32,
	#[serde(rename = "CSS")]
	pub css: String,
}

/// Persisted selections: last channels and overlay style.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppState {
	pub youtube_channel: String,
	pub twitch_channel: String,
	pub chat_style_id: u32,
	#[serde(rename = "ChatStyleCustomCSSs")]
	pub chat_style_custom_css: Vec<ChatStyleCustomCss>,
}

impl Default for AppState {
	fn default() -> Self {
		Self {
			youtube_channel: String::new(),
			twitch_channel: String::new(),
			chat_style_id: 1,
			chat_style_custom_css: Vec::new(),
		}
	}
}

impl AppState {
	/// Read the state file. Missing or unreadable files yield defaults.
	pub fn load(path: &Path) -> Self {
		let raw = match fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(e) => {
				if e.kind() == std::io::ErrorKind::NotFound {
					debug!(path = %path.display(), "no app state yet; using defaults");
				} else {
					warn!(path = %path.display(), error = %e, "failed to read app state; using defaults");
				}
				return Self::default();
			}
		};

		match serde_json::from_str(&raw) {
			Ok(state) => state,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "failed to parse app state; using defaults");
				Self::default()
			}
		}
	}

	pub fn save(&self, path: &Path) -> anyhow::Result<()> {
		if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
			fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
		}
		let json = serde_json::to_string(self).context("serialize app state")?;
		fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
		Ok(())
	}

	/// Saved channel for `platform`, if any.
	pub fn channel(&self, platform: Platform) -> Option<&str> {
		let v = match platform {
			Platform::YouTube => &self.youtube_channel,
			Platform::Twitch => &self.twitch_channel,
		};
		Some(v.as_str()).filter(|s| !s.is_empty())
	}

	pub fn set_channel(&mut self, platform: Platform, channel: impl Into<String>) {
		let channel = channel.into();
		match platform {
			Platform::YouTube => self.youtube_channel = channel,
			Platform::Twitch => self.twitch_channel = channel,
		}
	}

	pub fn clear_channel(&mut self, platform: Platform) {
		self.set_channel(platform, String::new());
	}

	pub fn custom_css(&self, id: u32) -> Option<&str> {
		self.chat_style_custom_css.iter().find(|c| c.id == id).map(|c| c.css.as_str())
	}

	/// Insert or replace the CSS for style `id`.
	pub fn set_custom_css(&mut self, id: u32, css: impl Into<String>) {
		let css = css.into();
		match self.chat_style_custom_css.iter_mut().find(|c| c.id == id) {
			Some(entry) => entry.css = css,
			None => self.chat_style_custom_css.push(ChatStyleCustomCss { id, css }),
		}
	}

	pub fn reset_custom_css(&mut self, id: u32) {
		self.chat_style_custom_css.retain(|c| c.id != id);
	}
}
