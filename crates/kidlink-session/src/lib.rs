//! kidlink-session library entry point.
//!
//! # What does kidlink-session do? (for beginners)
//!
//! `kidlink-core` defines *what* the two devices say to each other.  This
//! crate defines *when* and *why* they say it:
//!
//! 1. A [`PairingSession`](application::pairing_session::PairingSession)
//!    validates the pairing code, asks a transport for a channel, and runs the
//!    `Idle → Connecting → Connected → Disconnected` state machine.
//! 2. On the parent, a
//!    [`PermissionNegotiator`](application::negotiate_permission::PermissionNegotiator)
//!    asks the child for a permission and waits for the answer; on the child the
//!    same type prompts the device and reports back.
//! 3. On the child, a
//!    [`TelemetryStreamer`](application::stream_telemetry::TelemetryStreamer)
//!    sends a full snapshot every few seconds plus an immediate message for
//!    every interesting event, and a
//!    [`CommandDispatcher`](application::dispatch_command::CommandDispatcher)
//!    answers the parent's commands.
//! 4. A [`Device`](application::device::Device) owns one of each and wires
//!    them to the session.
//!
//! The crate follows a two-layer layout:
//!
//! - `application` – the use cases above plus the traits they consume
//!   (`Transport`, `CapabilityProvider`).  No OS or network code.
//! - `infrastructure` – concrete implementations of those traits (an
//!   in-memory loopback transport, a simulated device) and the TOML
//!   configuration file.

/// Application layer: session state machine and the per-role use cases.
pub mod application;

/// Infrastructure layer: transport and capability implementations, configuration.
pub mod infrastructure;

mod sync;

pub use application::capability::{CapabilityError, CapabilityEvent, CapabilityProvider};
pub use application::config::SessionConfig;
pub use application::device::Device;
pub use application::pairing_session::{ConnectionStatus, PairingSession, SessionError};
pub use application::transport::{ConnectedChannel, Transport, TransportError};
