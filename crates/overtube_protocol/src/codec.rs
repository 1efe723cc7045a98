#![forbid(unsafe_code)]

use thiserror::Error;

use crate::envelope::{ClientReply, ServerEnvelope};

/// Largest overlay frame accepted or produced.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

fn check_len(len: usize, max: usize) -> Result<(), CodecError> {
	if len > max {
		return Err(CodecError::FrameTooLarge { len, max });
	}
	Ok(())
}

/// Serialize an envelope into a text frame.
pub fn encode_envelope(env: &ServerEnvelope) -> Result<String, CodecError> {
	let text = serde_json::to_string(env)?;
	check_len(text.len(), DEFAULT_MAX_FRAME_SIZE)?;
	Ok(text)
}

/// Parse a server frame (overlay side).
pub fn decode_envelope(text: &str) -> Result<ServerEnvelope, CodecError> {
	check_len(text.len(), DEFAULT_MAX_FRAME_SIZE)?;
	Ok(serde_json::from_str(text)?)
}

/// Parse an overlay reply, rejecting frames above `max`.
pub fn decode_reply(text: &str, max: usize) -> Result<ClientReply, CodecError> {
	check_len(text.len(), max)?;
	Ok(serde_json::from_str(text)?)
}
