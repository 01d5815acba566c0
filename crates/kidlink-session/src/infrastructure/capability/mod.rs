//! Capability adapters.
//!
//! [`simulated`] fabricates plausible device data so the whole pairing flow
//! can run without a phone.  Platform providers (Android, iOS) would sit
//! alongside it.

pub mod simulated;
