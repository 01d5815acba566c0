//! Pairing roles, pairing codes, and the session connection state.
//!
//! # Pairing codes (for beginners)
//!
//! The parent device displays a short numeric code and a person reads it out
//! (or copies it) to the child device.  Both devices hand the same code to the
//! transport, which uses it to find the matching peer.  Because a human relays
//! the code it is kept deliberately small: exactly six ASCII digits.
//!
//! [`PairingCode`] is a *newtype*: a struct wrapping a `String` whose only
//! constructor validates the format.  Once you hold a `PairingCode` you know it
//! is well-formed, so no other function needs to re-check it.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of digits in a pairing code.
pub const PAIRING_CODE_LENGTH: usize = 6;

/// Which side of the pairing this device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The supervising device: requests permissions and sends commands.
    Parent,
    /// The supervised device: answers requests and streams telemetry.
    Child,
}

impl Role {
    /// Returns the role on the other end of the connection.
    pub fn peer(self) -> Role {
        match self {
            Role::Parent => Role::Child,
            Role::Child => Role::Parent,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Parent => f.write_str("parent"),
            Role::Child => f.write_str("child"),
        }
    }
}

/// Error returned when a string is not a valid pairing code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid pairing code format {0:?}: expected exactly 6 decimal digits")]
pub struct PairingCodeError(pub String);

/// A validated 6-digit pairing code.
///
/// # Examples
///
/// ```rust
/// use kidlink_core::PairingCode;
///
/// let code = PairingCode::parse("123456").unwrap();
/// assert_eq!(code.as_str(), "123456");
/// assert!(PairingCode::parse("12345").is_err());
/// assert!(PairingCode::parse("12a456").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairingCode(String);

impl PairingCode {
    /// Validates `input` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns [`PairingCodeError`] unless `input` is exactly six ASCII digits.
    /// Surrounding whitespace is not trimmed; `" 123456"` is rejected.
    pub fn parse(input: &str) -> Result<Self, PairingCodeError> {
        let well_formed =
            input.len() == PAIRING_CODE_LENGTH && input.bytes().all(|b| b.is_ascii_digit());
        if well_formed {
            Ok(Self(input.to_string()))
        } else {
            Err(PairingCodeError(input.to_string()))
        }
    }

    /// Generates a random code in the range `100000..=999999`.
    ///
    /// Codes never start with `0` so they read naturally when spoken aloud.
    pub fn generate() -> Self {
        let n: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
        Self(n.to_string())
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PairingCode {
    type Err = PairingCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PairingCode {
    type Error = PairingCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PairingCode> for String {
    fn from(code: PairingCode) -> Self {
        code.0
    }
}

/// Lifecycle state of a pairing session.
///
/// ```text
/// Idle ──begin──► Connecting ──transport ready──► Connected
///                     │                               │
///                     └──── cancel / failure ────►  Disconnected ◄── disconnect / failure
/// ```
///
/// `Disconnected` is terminal for one begin-to-disconnect cycle.  Calling
/// `begin` again starts a fresh cycle at `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    /// Returns `true` only for [`ConnectionState::Connected`].
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns `true` while a cycle is in progress (connecting or connected).
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Returns `true` if the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}
