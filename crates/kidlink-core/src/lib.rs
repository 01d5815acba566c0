//! # kidlink-core
//!
//! Shared library for KidLink containing the message model, the JSON frame
//! codec, and the small pairing domain (roles, pairing codes, permission sets,
//! and the parent-side receive buffer).
//!
//! This crate is used by both the parent and the child side of a pairing.
//! It has no async runtime, no sockets, and no device access.
//!
//! # Architecture overview (for beginners)
//!
//! KidLink pairs two devices: a supervising **parent** and a supervised
//! **child**.  The parent shows a 6-digit pairing code, the child types it in,
//! and once a transport has connected the two the parent can ask the child for
//! permissions and send it commands while the child streams telemetry back.
//!
//! This crate (`kidlink-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – What travels between the devices.  Telemetry messages,
//!   commands, and negotiation control messages are wrapped in a numbered
//!   [`Frame`] and encoded as JSON.
//!
//! - **`domain`** – Pure state with no I/O: the [`PairingCode`] newtype, the
//!   [`PermissionSet`], the session [`ConnectionState`], and the bounded
//!   [`ReceiveBuffer`] the parent keeps of recent telemetry.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `kidlink_core::PairingCode` instead of `kidlink_core::domain::pairing::PairingCode`.
pub use domain::pairing::{ConnectionState, PairingCode, PairingCodeError, Role};
pub use domain::permissions::{PermissionKind, PermissionSet, UnknownPermissionKind};
pub use domain::receive_buffer::{ReceiveBuffer, RECEIVE_BUFFER_CAPACITY};
pub use protocol::codec::{decode_frame, encode_frame, CodecError};
pub use protocol::messages::{Command, ControlMessage, Frame, Payload, TelemetryMessage};
