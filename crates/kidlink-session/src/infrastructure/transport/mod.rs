//! Transport adapters.
//!
//! Only the in-process [`loopback`] rendezvous exists today.  A relay-server
//! transport would live next to it and implement the same
//! [`Transport`](crate::application::transport::Transport) trait.

pub mod loopback;
