//! Timing and sizing knobs for the session use cases.
//!
//! This is a plain struct with no file or environment access; the
//! infrastructure layer fills it from the TOML config file.

use std::time::Duration;

/// Runtime settings shared by the negotiator, streamer, and dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Child-side wait before the permission prompt resolves.  Stands in for
    /// the latency of a real OS permission dialog.
    pub negotiation_delay: Duration,
    /// How long the parent waits for a `permission_response` before giving up
    /// and resolving the request to `false`.
    pub negotiation_timeout: Duration,
    /// Interval between `comprehensive_update` messages.
    pub telemetry_interval: Duration,
    /// Maximum number of photos attached to a comprehensive update.
    pub recent_photos_limit: usize,
}

impl Default for SessionConfig {
    /// | Field               | Default  |
    /// |---------------------|----------|
    /// | negotiation_delay   | 1500 ms  |
    /// | negotiation_timeout | 30 s     |
    /// | telemetry_interval  | 5000 ms  |
    /// | recent_photos_limit | 5        |
    fn default() -> Self {
        Self {
            negotiation_delay: Duration::from_millis(1500),
            negotiation_timeout: Duration::from_secs(30),
            telemetry_interval: Duration::from_millis(5000),
            recent_photos_limit: 5,
        }
    }
}
