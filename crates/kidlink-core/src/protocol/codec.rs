//! JSON codec for [`Frame`]s.
//!
//! Wire format: one UTF-8 JSON object per transport message.
//!
//! ```json
//! {"sequence":7,"payload":{"kind":"telemetry","body":{"type":"app_usage_response","timestamp":"...","appUsage":[...]}}}
//! ```
//!
//! The transport is message-oriented, so frames need no length prefix.  The
//! `type` (telemetry/control) and `command` discriminators survive a
//! round-trip unchanged, along with every documented field.

use thiserror::Error;

use crate::protocol::messages::Frame;

/// Upper bound on an encoded frame.  A comprehensive update with five photos
/// is a few kilobytes; anything near this limit is a bug or an attack.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// The bytes were not a valid JSON frame.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame exceeds [`MAX_FRAME_SIZE`].
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

/// Encodes a frame into its JSON byte representation.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails and
/// [`CodecError::TooLarge`] if the result exceeds [`MAX_FRAME_SIZE`].
///
/// # Examples
///
/// ```rust
/// use kidlink_core::protocol::codec::{decode_frame, encode_frame};
/// use kidlink_core::protocol::messages::{Command, CommandKind, Frame, Payload};
///
/// let frame = Frame {
///     sequence: 0,
///     payload: Payload::Command(Command::from_kind(CommandKind::GetLocation)),
/// };
/// let bytes = encode_frame(&frame).unwrap();
/// assert_eq!(decode_frame(&bytes).unwrap(), frame);
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(frame).map_err(|e| CodecError::Encode(e.to_string()))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(bytes)
}

/// Decodes one frame from `bytes`.
///
/// # Errors
///
/// Returns [`CodecError::TooLarge`] for oversized input and
/// [`CodecError::Malformed`] if the bytes are not a valid frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
}
