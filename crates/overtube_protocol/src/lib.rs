#![forbid(unsafe_code)]

//! JSON envelopes exchanged with overlay clients.

pub mod codec;
pub mod envelope;

pub use codec::{CodecError, DEFAULT_MAX_FRAME_SIZE, decode_envelope, decode_reply, encode_envelope};
pub use envelope::{ClientReply, Command, MsgEnvelope, PartType, ServerEnvelope, WireBadge, WirePart};
