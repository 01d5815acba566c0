//! Infrastructure layer for KidLink.
//!
//! Contains the concrete adapters behind the application traits: an
//! in-process loopback transport, a simulated device, and TOML configuration
//! storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `kidlink_core`, but MUST NOT be imported by the `application` layer.

pub mod capability;
pub mod storage;
pub mod transport;
