#![forbid(unsafe_code)]

mod badges;
mod connector;
pub mod irc;

pub use badges::{BadgeTable, CHAT_LIST_BADGES_HASH, ChannelBadges, chat_list_badges_request, parse_channel_badges};
pub use connector::{TwitchConfig, TwitchConnector};
