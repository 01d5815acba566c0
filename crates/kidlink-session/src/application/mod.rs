//! Application layer use cases for KidLink.
//!
//! # What lives here?
//!
//! - **`transport`** / **`capability`** – the two traits the core consumes.
//!   Implementations are injected from the infrastructure layer (or from tests).
//!
//! - **`pairing_session`** – the connection state machine, framing, observer
//!   dispatch, and the parent's bounded receive buffer.
//!
//! - **`negotiate_permission`** – the permission request/response exchange.
//!
//! - **`stream_telemetry`** – periodic and event-driven telemetry on the child.
//!
//! - **`dispatch_command`** – executes parent commands on the child.
//!
//! - **`device`** – the per-device owner that wires all of the above together.
//!
//! **Dependency rule**: nothing in this layer may import `crate::infrastructure`.

pub mod capability;
pub mod config;
pub mod device;
pub mod dispatch_command;
pub mod negotiate_permission;
pub mod pairing_session;
pub mod stream_telemetry;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
