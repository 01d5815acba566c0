//! Domain layer: pairing roles and codes, permission state, and the receive buffer.
//!
//! Everything here is plain data with synchronous methods.  The session crate
//! wraps these types in locks and drives them from async tasks.

pub mod pairing;
pub mod permissions;
pub mod receive_buffer;
