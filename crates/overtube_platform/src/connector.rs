#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use overtube_domain::{ChannelId, ChatMessage, Platform};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::new_session_id;

/// Capacity of every connector's outbound message queue.
pub const MESSAGE_QUEUE_CAPACITY: usize = 200;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PullError {
	/// Nothing buffered right now.
	#[error("queue empty")]
	Empty,
	/// The connector terminated and its queue is drained.
	#[error("queue closed")]
	Closed,
}

/// Outcome of handing a decoded message to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
	Queued,
	Dropped,
	Closed,
}

/// A live session with one chat platform, exposing a pull-based message stream.
pub trait Connector: Send + Sync + 'static {
	fn platform(&self) -> Platform;

	fn channel(&self) -> &ChannelId;

	/// Platform-assigned id of the channel owner, once resolved.
	fn user_id(&self) -> Option<String>;

	fn is_connected(&self) -> bool;

	/// Non-blocking dequeue of the next message.
	fn try_pull(&self) -> Result<ChatMessage, PullError>;

	/// Stop the connector. Idempotent.
	fn close(&self);
}

/// State shared by every connector: identity, liveness flag, the bounded queue and the loop task.
pub struct ConnectorCore {
	platform: Platform,
	channel: ChannelId,
	session_id: String,
	user_id: RwLock<Option<String>>,
	connected: AtomicBool,
	tx: Mutex<Option<mpsc::Sender<ChatMessage>>>,
	rx: Mutex<mpsc::Receiver<ChatMessage>>,
	task: Mutex<Option<JoinHandle<()>>>,
	dropped: AtomicU64,
}

impl ConnectorCore {
	pub fn new(platform: Platform, channel: ChannelId) -> Arc<Self> {
		Self::with_capacity(platform, channel, MESSAGE_QUEUE_CAPACITY)
	}

	pub fn with_capacity(platform: Platform, channel: ChannelId, capacity: usize) -> Arc<Self> {
		let (tx, rx) = mpsc::channel(capacity.max(1));
		Arc::new(Self {
			platform,
			channel,
			session_id: new_session_id(),
			user_id: RwLock::new(None),
			connected: AtomicBool::new(true),
			tx: Mutex::new(Some(tx)),
			rx: Mutex::new(rx),
			task: Mutex::new(None),
			dropped: AtomicU64::new(0),
		})
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}

	pub fn set_user_id(&self, user_id: Option<String>) {
		*self.user_id.write() = user_id;
	}

	/// Messages discarded because the queue was full.
	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Record the loop task so `close` can abort it.
	pub fn attach_task(&self, handle: JoinHandle<()>) {
		if !self.is_connected() {
			handle.abort();
			return;
		}
		if let Some(prev) = self.task.lock().replace(handle) {
			prev.abort();
		}
	}

	/// Non-blocking enqueue; a full queue drops the new message.
	pub fn publish(&self, msg: ChatMessage) -> Publish {
		let guard = self.tx.lock();
		let Some(tx) = guard.as_ref() else {
			return Publish::Closed;
		};

		match tx.try_send(msg) {
			Ok(()) => {
				metrics::counter!("overtube_connector_messages_total", "platform" => self.platform.as_str()).increment(1);
				Publish::Queued
			}
			Err(TrySendError::Full(_)) => {
				let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
				metrics::counter!("overtube_connector_dropped_total", "platform" => self.platform.as_str()).increment(1);
				if total == 1 || total.is_power_of_two() {
					warn!(platform = %self.platform, channel = %self.channel, dropped_total = total, "connector queue full; dropping message");
				}
				Publish::Dropped
			}
			Err(TrySendError::Closed(_)) => Publish::Closed,
		}
	}

	/// Mark the connector dead and close its queue. Buffered messages stay drainable.
	pub fn terminate(&self, reason: &str) {
		let was_connected = self.connected.swap(false, Ordering::AcqRel);
		let closed_queue = self.tx.lock().take().is_some();
		if was_connected || closed_queue {
			info!(platform = %self.platform, channel = %self.channel, session_id = %self.session_id, reason, "connector terminated");
		}
	}
}

impl Connector for ConnectorCore {
	fn platform(&self) -> Platform {
		self.platform
	}

	fn channel(&self) -> &ChannelId {
		&self.channel
	}

	fn user_id(&self) -> Option<String> {
		self.user_id.read().clone()
	}

	fn is_connected(&self) -> bool {
		self.connected.load(Ordering::Acquire)
	}

	fn try_pull(&self) -> Result<ChatMessage, PullError> {
		match self.rx.lock().try_recv() {
			Ok(msg) => Ok(msg),
			Err(TryRecvError::Empty) => Err(PullError::Empty),
			Err(TryRecvError::Disconnected) => Err(PullError::Closed),
		}
	}

	fn close(&self) {
		self.terminate("closed");
		if let Some(task) = self.task.lock().take() {
			debug!(platform = %self.platform, channel = %self.channel, "aborting connector task");
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use overtube_domain::MessagePart;

	use super::*;

	fn msg(n: i64) -> ChatMessage {
		ChatMessage::new(Platform::Twitch, "viewer", vec![MessagePart::text(n.to_string())], n, Vec::new()).unwrap()
	}

	fn core() -> Arc<ConnectorCore> {
		ConnectorCore::new(Platform::Twitch, ChannelId::new("somechannel").unwrap())
	}

	#[test]
	fn full_queue_drops_newest() {
		let core = core();
		for n in 0..MESSAGE_QUEUE_CAPACITY as i64 {
			assert_eq!(core.publish(msg(n)), Publish::Queued);
		}
		assert_eq!(core.publish(msg(9999)), Publish::Dropped);
		assert_eq!(core.dropped(), 1);

		let mut seen = Vec::new();
		while let Ok(m) = core.try_pull() {
			seen.push(m.timestamp());
		}
		assert_eq!(seen.len(), MESSAGE_QUEUE_CAPACITY);
		assert_eq!(seen.first(), Some(&0));
		assert_eq!(seen.last(), Some(&(MESSAGE_QUEUE_CAPACITY as i64 - 1)));
	}

	#[test]
	fn terminate_keeps_buffer_then_reports_closed() {
		let core = core();
		core.publish(msg(1));
		core.terminate("test");
		assert!(!core.is_connected());
		assert_eq!(core.publish(msg(2)), Publish::Closed);
		assert_eq!(core.try_pull().unwrap().timestamp(), 1);
		assert_eq!(core.try_pull(), Err(PullError::Closed));
	}

	#[test]
	fn empty_queue_is_not_closed() {
		let core = core();
		assert_eq!(core.try_pull(), Err(PullError::Empty));
		assert!(core.is_connected());
	}

	#[test]
	fn close_is_idempotent() {
		let core = core();
		core.close();
		core.close();
		assert!(!core.is_connected());
		assert_eq!(core.try_pull(), Err(PullError::Closed));
	}

	#[tokio::test]
	async fn close_aborts_the_loop_task() {
		let core = core();
		let handle = tokio::spawn(async {
			tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
		});
		core.attach_task(handle);
		core.close();
		assert!(core.task.lock().is_none());
	}

	#[test]
	fn user_id_is_nullable_until_resolved() {
		let core = core();
		assert_eq!(core.user_id(), None);
		core.set_user_id(Some("12345".to_string()));
		assert_eq!(core.user_id().as_deref(), Some("12345"));
	}
}
