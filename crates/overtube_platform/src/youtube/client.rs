#![forbid(unsafe_code)]

use anyhow::Context;
use serde_json::{Value, json};

use super::YouTubeConfig;

const LIVE_CHAT_PATH: &str = "/youtubei/v1/live_chat/get_live_chat?prettyPrint=false";

/// Thin HTTP client for the public YouTube pages and the innertube chat endpoint.
#[derive(Debug, Clone)]
pub(crate) struct YouTubeClient {
	http: reqwest::Client,
	base_url: String,
	client_context: Value,
}

/// `context.client` block sent with every innertube request.
pub(crate) fn client_context(cfg: &YouTubeConfig) -> Value {
	json!({
		"hl": cfg.language,
		"gl": cfg.region,
		"clientName": "WEB",
		"clientVersion": cfg.client_version,
	})
}

impl YouTubeClient {
	pub(crate) fn new(cfg: &YouTubeConfig) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent(cfg.user_agent.as_str())
			.timeout(cfg.http_timeout)
			.build()
			.context("build youtube http client")?;
		Ok(Self {
			http,
			base_url: cfg.base_url.trim_end_matches('/').to_string(),
			client_context: client_context(cfg),
		})
	}

	pub(crate) async fn get_page(&self, path: &str) -> anyhow::Result<String> {
		let url = format!("{}{}", self.base_url, path);
		let resp = self
			.http
			.get(&url)
			.send()
			.await
			.with_context(|| format!("GET {url}"))?
			.error_for_status()
			.with_context(|| format!("GET {url}"))?;
		resp.text().await.context("read page body")
	}

	pub(crate) async fn get_live_chat(&self, continuation: &str) -> anyhow::Result<Value> {
		let body = json!({
			"continuation": continuation,
			"context": { "client": self.client_context },
		});
		let resp = self
			.http
			.post(format!("{}{}", self.base_url, LIVE_CHAT_PATH))
			.json(&body)
			.send()
			.await
			.context("youtube get_live_chat")?
			.error_for_status()
			.context("youtube get_live_chat status")?;
		resp.json().await.context("parse get_live_chat response")
	}
}
