#![forbid(unsafe_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use overtube_domain::{ChannelId, MessagePart, Platform};
use overtube_platform::twitch::{TwitchConfig, TwitchConnector};
use overtube_platform::{ConnectError, Connector, PullError};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::Message;

const CHAT_LINE: &str = "@badges=vip/1;display-name=Viewer;emotes=25:6-10;tmi-sent-ts=1700000000999;user-type= \
	:viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #somechannel :hello Kappa";

fn local_config(addr: std::net::SocketAddr) -> TwitchConfig {
	TwitchConfig {
		irc_ws_url: format!("ws://{addr}"),
		gql_url: "http://127.0.0.1:9/gql".to_string(),
		http_timeout: Duration::from_millis(500),
		connect_timeout: Duration::from_millis(500),
		..TwitchConfig::default()
	}
}

#[tokio::test]
async fn reads_chat_from_irc_socket() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");

	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.expect("accept");
		let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");

		let mut login = Vec::new();
		while login.len() < 5 {
			match ws.next().await {
				Some(Ok(Message::Text(t))) => login.push(t.to_string()),
				other => panic!("unexpected frame during login: {other:?}"),
			}
		}

		ws.send(Message::text(format!(":tmi.twitch.tv 001 x :Welcome\r\nPING :tmi.twitch.tv\r\n{CHAT_LINE}\r\n")))
			.await
			.expect("send chat");

		let pong = match ws.next().await {
			Some(Ok(Message::Text(t))) => t.to_string(),
			other => panic!("expected pong, got {other:?}"),
		};

		let _ = ws.close(None).await;
		(login, pong)
	});

	let connector = TwitchConnector::connect(&local_config(addr), ChannelId::new("SomeChannel").unwrap())
		.await
		.expect("connect");
	assert_eq!(connector.platform(), Platform::Twitch);
	assert_eq!(connector.user_id(), None);

	let msg = timeout(Duration::from_secs(5), async {
		loop {
			match connector.try_pull() {
				Ok(m) => break m,
				Err(PullError::Empty) => sleep(Duration::from_millis(10)).await,
				Err(PullError::Closed) => panic!("connector closed before delivering"),
			}
		}
	})
	.await
	.expect("message delivered");

	assert_eq!(msg.author(), "Viewer");
	assert_eq!(msg.timestamp(), 1_700_000_000);
	assert_eq!(msg.parts()[0], MessagePart::text("hello "));
	assert!(matches!(&msg.parts()[1], MessagePart::Emote { name, .. } if name == "Kappa"));
	assert_eq!(msg.badges().len(), 1);
	assert_eq!(msg.badges()[0].kind, "vip");

	let (login, pong) = server.await.expect("server task");
	assert_eq!(login[0], "CAP REQ :twitch.tv/tags twitch.tv/commands");
	assert!(login[2].starts_with("NICK justinfan"));
	assert_eq!(login[4], "JOIN #somechannel");
	assert_eq!(pong, "PONG :tmi.twitch.tv");

	timeout(Duration::from_secs(5), async {
		while connector.is_connected() {
			sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("connector terminates after server close");
	assert_eq!(connector.try_pull(), Err(PullError::Closed));
}

#[tokio::test]
async fn unreachable_socket_is_a_transport_error() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");
	drop(listener);

	let err = TwitchConnector::connect(&local_config(addr), ChannelId::new("x").unwrap())
		.await
		.err()
		.expect("connect must fail");
	assert!(matches!(err, ConnectError::Transport(_)));
}

#[tokio::test]
async fn silent_server_times_out_instead_of_hanging() {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");

	// Accept the TCP connection but never answer the upgrade.
	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.expect("accept");
		sleep(Duration::from_secs(10)).await;
		drop(stream);
	});

	let err = timeout(
		Duration::from_secs(5),
		TwitchConnector::connect(&local_config(addr), ChannelId::new("somechannel").unwrap()),
	)
	.await
	.expect("connect must give up on its own")
	.err()
	.expect("connect must fail");
	assert!(matches!(err, ConnectError::Transport(ref m) if m.contains("timed out")), "got {err}");

	server.abort();
}
