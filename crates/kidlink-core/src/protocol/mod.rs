//! Protocol module containing message types, the frame codec, and sequencing.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_frame, encode_frame, CodecError};
pub use messages::*;
pub use sequence::{SequenceCheck, SequenceCounter, SequenceTracker};
