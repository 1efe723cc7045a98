#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use overtube_domain::{ChannelId, ChatMessage, MessagePart, Platform};
use overtube_platform::youtube::{YouTubeConfig, YouTubeConnector};
use overtube_platform::{ConnectError, Connector, PullError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

const VIDEO_ID: &str = "abcdefghijk";
const OWNER_ID: &str = "UCabcdefghijklmnopqrstuv";
const CHAT_PATH: &str = "/youtubei/v1/live_chat/get_live_chat";

/// Canned YouTube: fixed pages by path and a queue of chat poll replies.
#[derive(Default)]
struct FakeYouTube {
	pages: HashMap<String, String>,
	chat: Mutex<VecDeque<(StatusCode, Value)>>,
	tokens: Mutex<Vec<String>>,
}

impl FakeYouTube {
	fn live_channel() -> Self {
		let live = format!(
			r#"<html><script>var ytInitialData = {};</script></html>"#,
			json!({
				"currentVideoEndpoint": { "watchEndpoint": { "videoId": VIDEO_ID } },
				"metadata": { "channelMetadataRenderer": { "externalId": OWNER_ID } }
			})
		);
		let watch = r#"<html><script>{"liveChatRenderer":{"continuations":[{"reloadContinuationData":{"continuation":"reload-0"}}]}}</script></html>"#;

		let mut pages = HashMap::new();
		pages.insert("/@somestreamer/live".to_string(), live);
		pages.insert(format!("/watch?v={VIDEO_ID}"), watch.to_string());
		Self {
			pages,
			..Self::default()
		}
	}

	fn reply(self, status: StatusCode, body: Value) -> Self {
		self.chat.lock().push_back((status, body));
		self
	}
}

fn page(status: StatusCode, body: String) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(Bytes::from(body)));
	*resp.status_mut() = status;
	resp
}

async fn handle(req: Request<Incoming>, fake: Arc<FakeYouTube>) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() == Method::POST && req.uri().path() == CHAT_PATH {
		let body = req.into_body().collect().await?.to_bytes();
		let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
		fake.tokens
			.lock()
			.push(body["continuation"].as_str().unwrap_or_default().to_string());

		let next = fake.chat.lock().pop_front();
		return Ok(match next {
			Some((status, json)) => page(status, json.to_string()),
			None => page(StatusCode::NOT_FOUND, String::new()),
		});
	}

	let key = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or_default();
	Ok(match fake.pages.get(key) {
		Some(html) => page(StatusCode::OK, html.clone()),
		None => page(StatusCode::NOT_FOUND, String::new()),
	})
}

async fn serve(fake: Arc<FakeYouTube>) -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");
	tokio::spawn(async move {
		while let Ok((stream, _)) = listener.accept().await {
			let fake = fake.clone();
			tokio::spawn(async move {
				let service = service_fn(move |req| handle(req, fake.clone()));
				let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
			});
		}
	});
	addr
}

fn local_config(addr: SocketAddr) -> YouTubeConfig {
	YouTubeConfig {
		base_url: format!("http://{addr}"),
		poll_interval: Duration::from_millis(100),
		http_timeout: Duration::from_secs(2),
		..YouTubeConfig::default()
	}
}

fn text_item(ts_usec: &str, author: &str, text: &str) -> Value {
	json!({ "addChatItemAction": { "item": { "liveChatTextMessageRenderer": {
		"timestampUsec": ts_usec,
		"authorName": { "simpleText": author },
		"message": { "runs": [{ "text": text }] }
	}}}})
}

fn poll(next: &str, actions: Vec<Value>) -> Value {
	json!({ "continuationContents": { "liveChatContinuation": {
		"continuations": [{ "timedContinuationData": { "continuation": next, "timeoutMs": 100 } }],
		"actions": actions
	}}})
}

/// Wait for the connector to stop, then drain what it buffered.
async fn drain_after_stop(connector: &YouTubeConnector) -> Vec<ChatMessage> {
	timeout(Duration::from_secs(5), async {
		while connector.is_connected() {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("connector stops");

	let mut out = Vec::new();
	loop {
		match connector.try_pull() {
			Ok(msg) => out.push(msg),
			Err(PullError::Empty) => sleep(Duration::from_millis(5)).await,
			Err(PullError::Closed) => return out,
		}
	}
}

#[tokio::test]
async fn follows_live_chat_and_emits_each_message_once() {
	let fake = Arc::new(
		FakeYouTube::live_channel()
			.reply(StatusCode::OK, poll("c1", vec![text_item("1700000000000000", "early", "before connect")]))
			.reply(
				StatusCode::OK,
				poll(
					"c2",
					vec![
						text_item("1700000001000000", "a", "first"),
						text_item("1700000002000000", "b", "second"),
					],
				),
			)
			.reply(
				StatusCode::OK,
				poll(
					"c3",
					vec![
						text_item("1700000002000000", "b", "second"),
						text_item("1700000003000000", "c", "third"),
					],
				),
			)
			.reply(StatusCode::OK, json!({ "continuationContents": { "liveChatContinuation": { "actions": [] } } })),
	);
	let addr = serve(fake.clone()).await;

	let connector = YouTubeConnector::connect(&local_config(addr), ChannelId::new("@somestreamer").unwrap())
		.await
		.expect("connect");
	assert_eq!(connector.platform(), Platform::YouTube);
	assert_eq!(connector.video_id(), VIDEO_ID);
	assert_eq!(connector.user_id().as_deref(), Some(OWNER_ID));

	let messages = drain_after_stop(&connector).await;
	let texts: Vec<String> = messages.iter().map(ChatMessage::plain_text).collect();
	assert_eq!(texts, ["first", "second", "third"]);
	assert_eq!(messages[0].author(), "a");
	assert_eq!(messages[0].timestamp(), 1_700_000_001_000);
	assert_eq!(messages[2].parts(), [MessagePart::text("third")]);

	assert_eq!(*fake.tokens.lock(), ["reload-0", "c1", "c2", "c3"]);
}

#[tokio::test]
async fn failed_poll_terminates_the_connector() {
	let fake = Arc::new(
		FakeYouTube::live_channel()
			.reply(StatusCode::OK, poll("c1", Vec::new()))
			.reply(StatusCode::OK, poll("c2", vec![text_item("1700000001000000", "a", "kept")]))
			.reply(StatusCode::INTERNAL_SERVER_ERROR, Value::Null),
	);
	let addr = serve(fake.clone()).await;

	let connector = YouTubeConnector::connect(&local_config(addr), ChannelId::new("@somestreamer").unwrap())
		.await
		.expect("connect");

	let messages = drain_after_stop(&connector).await;
	assert_eq!(messages.len(), 1);
	assert_eq!(messages[0].plain_text(), "kept");
	assert_eq!(connector.try_pull(), Err(PullError::Closed));
	assert_eq!(fake.tokens.lock().len(), 3);
}

#[tokio::test]
async fn offline_channel_fails_to_resolve() {
	let mut fake = FakeYouTube::default();
	fake.pages.insert(
		"/@somestreamer/live".to_string(),
		r#"<html><script>var ytInitialData = {"contents":{}};</script></html>"#.to_string(),
	);
	let addr = serve(Arc::new(fake)).await;

	let err = YouTubeConnector::connect(&local_config(addr), ChannelId::new("@somestreamer").unwrap())
		.await
		.err()
		.expect("connect must fail");
	assert!(matches!(err, ConnectError::Resolution(ref m) if m.contains("not live")), "got {err}");
}

#[tokio::test]
async fn video_without_live_chat_fails_to_resolve() {
	let mut fake = FakeYouTube::default();
	fake.pages
		.insert(format!("/watch?v={VIDEO_ID}"), "<html>premiere</html>".to_string());
	let addr = serve(Arc::new(fake)).await;

	let err = YouTubeConnector::connect(&local_config(addr), ChannelId::new(VIDEO_ID).unwrap())
		.await
		.err()
		.expect("connect must fail");
	assert!(matches!(err, ConnectError::Resolution(ref m) if m.contains("no live chat")), "got {err}");
}
