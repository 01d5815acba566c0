//! TOML-based configuration for KidLink devices.
//!
//! Every field has a serde default, so an empty file (or no file at all) is a
//! valid configuration.  Example:
//!
//! ```toml
//! [session]
//! negotiation_delay_ms = 1500
//! telemetry_interval_ms = 5000
//!
//! [transport]
//! handshake_delay_ms = 2000
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Durations are stored as integer milliseconds and converted to
//! [`Duration`] by [`AppConfig::session_config`], [`AppConfig::loopback_config`]
//! and [`AppConfig::simulated_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::config::SessionConfig;
use crate::infrastructure::capability::simulated::SimulatedConfig;
use crate::infrastructure::transport::loopback::LoopbackConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but makes no sense (zero interval, probability > 1, ...).
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub capability: CapabilitySection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Pairing session timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Child-side wait before the permission prompt resolves.
    #[serde(default = "default_negotiation_delay_ms")]
    pub negotiation_delay_ms: u64,
    /// Parent-side give-up time for an unanswered permission request.
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,
    /// Interval between `comprehensive_update` messages.
    #[serde(default = "default_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
    /// Photos attached to each comprehensive update.
    #[serde(default = "default_recent_photos_limit")]
    pub recent_photos_limit: usize,
}

/// Rendezvous timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    #[serde(default = "default_handshake_delay_ms")]
    pub handshake_delay_ms: u64,
    /// How long a device waits for its peer to present the same code.
    #[serde(default = "default_pairing_timeout_ms")]
    pub pairing_timeout_ms: u64,
}

/// Simulated device behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilitySection {
    #[serde(default = "default_location_watch_interval_ms")]
    pub location_watch_interval_ms: u64,
    #[serde(default = "default_screen_projection_grant_probability")]
    pub screen_projection_grant_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// `tracing` filter used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"kidlink_session=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_negotiation_delay_ms() -> u64 {
    1500
}
fn default_negotiation_timeout_ms() -> u64 {
    30_000
}
fn default_telemetry_interval_ms() -> u64 {
    5000
}
fn default_recent_photos_limit() -> usize {
    5
}
fn default_handshake_delay_ms() -> u64 {
    2000
}
fn default_pairing_timeout_ms() -> u64 {
    60_000
}
fn default_location_watch_interval_ms() -> u64 {
    10_000
}
fn default_screen_projection_grant_probability() -> f64 {
    0.7
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            negotiation_delay_ms: default_negotiation_delay_ms(),
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
            telemetry_interval_ms: default_telemetry_interval_ms(),
            recent_photos_limit: default_recent_photos_limit(),
        }
    }
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            handshake_delay_ms: default_handshake_delay_ms(),
            pairing_timeout_ms: default_pairing_timeout_ms(),
        }
    }
}

impl Default for CapabilitySection {
    fn default() -> Self {
        Self {
            location_watch_interval_ms: default_location_watch_interval_ms(),
            screen_projection_grant_probability: default_screen_projection_grant_probability(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading, saving, conversion ───────────────────────────────────────────────

impl AppConfig {
    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`] for
    /// values outside their range.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `path`, returning the defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system errors other than "not found", plus
    /// everything [`from_toml_str`](Self::from_toml_str) returns.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
            Err(e) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Writes the config to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.telemetry_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "session.telemetry_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.capability.location_watch_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "capability.location_watch_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        let p = self.capability.screen_projection_grant_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::Invalid {
                field: "capability.screen_projection_grant_probability",
                reason: format!("{p} is not between 0 and 1"),
            });
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            negotiation_delay: Duration::from_millis(self.session.negotiation_delay_ms),
            negotiation_timeout: Duration::from_millis(self.session.negotiation_timeout_ms),
            telemetry_interval: Duration::from_millis(self.session.telemetry_interval_ms),
            recent_photos_limit: self.session.recent_photos_limit,
        }
    }

    pub fn loopback_config(&self) -> LoopbackConfig {
        LoopbackConfig {
            handshake_delay: Duration::from_millis(self.transport.handshake_delay_ms),
            pairing_timeout: Duration::from_millis(self.transport.pairing_timeout_ms),
        }
    }

    pub fn simulated_config(&self) -> SimulatedConfig {
        SimulatedConfig {
            location_watch_interval: Duration::from_millis(
                self.capability.location_watch_interval_ms,
            ),
            screen_projection_grant_probability: self
                .capability
                .screen_projection_grant_probability,
            ..SimulatedConfig::default()
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
