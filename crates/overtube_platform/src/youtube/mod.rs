#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod chat;
mod client;
mod connector;

pub use bootstrap::ChannelTarget;
pub use chat::{DedupCursor, PollBatch, decode_poll};
pub use connector::{MAX_POLL_INTERVAL, MIN_POLL_INTERVAL, YouTubeConfig, YouTubeConnector};
