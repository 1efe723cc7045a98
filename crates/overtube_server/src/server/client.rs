#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use overtube_protocol::decode_reply;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

/// Overlay replies are tiny; anything larger is not a pong.
const MAX_REPLY_SIZE: usize = 1024;

type OverlaySocket = WebSocketStream<TcpStream>;

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("write failed: {0}")]
	Write(#[source] tungstenite::Error),

	#[error("read failed: {0}")]
	Read(#[source] tungstenite::Error),

	#[error("no reply within {0:?}")]
	Timeout(Duration),

	#[error("unexpected reply: {0}")]
	UnexpectedReply(String),

	#[error("socket closed by peer")]
	Closed,
}

/// One admitted overlay socket.
///
/// The write half is shared by fan-out and the liveness sweep; the read half is only
/// touched while waiting for a pong.
pub struct ClientHandle {
	id: u64,
	peer: SocketAddr,
	writer: Mutex<SplitSink<OverlaySocket, Message>>,
	reader: Mutex<SplitStream<OverlaySocket>>,
}

impl ClientHandle {
	pub fn new(id: u64, peer: SocketAddr, socket: OverlaySocket) -> Self {
		let (writer, reader) = socket.split();
		Self {
			id,
			peer,
			writer: Mutex::new(writer),
			reader: Mutex::new(reader),
		}
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn peer(&self) -> SocketAddr {
		self.peer
	}

	pub async fn send(&self, msg: Message) -> Result<(), ClientError> {
		self.writer.lock().await.send(msg).await.map_err(ClientError::Write)
	}

	/// Send `ping` and wait up to `wait` for `{"command":"pong"}`.
	pub async fn check_liveness(&self, ping: Message, wait: Duration) -> Result<(), ClientError> {
		self.send(ping).await?;

		let mut reader = self.reader.lock().await;
		let text = tokio::time::timeout(wait, next_text(&mut reader))
			.await
			.map_err(|_| ClientError::Timeout(wait))??;

		match decode_reply(&text, MAX_REPLY_SIZE) {
			Ok(reply) if reply.is_pong() => Ok(()),
			Ok(reply) => Err(ClientError::UnexpectedReply(reply.command)),
			Err(e) => Err(ClientError::UnexpectedReply(e.to_string())),
		}
	}

	/// Best-effort close handshake.
	pub async fn close(&self) {
		let mut writer = self.writer.lock().await;
		if let Err(e) = writer.send(Message::Close(None)).await {
			debug!(client_id = self.id, error = %e, "close frame not delivered");
		}
		let _ = writer.close().await;
	}
}

async fn next_text(reader: &mut SplitStream<OverlaySocket>) -> Result<String, ClientError> {
	while let Some(frame) = reader.next().await {
		match frame.map_err(ClientError::Read)? {
			Message::Text(t) => return Ok(t.as_str().to_owned()),
			Message::Binary(_) => return Err(ClientError::UnexpectedReply("binary frame".to_string())),
			Message::Close(_) => return Err(ClientError::Closed),
			Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
		}
	}
	Err(ClientError::Closed)
}
