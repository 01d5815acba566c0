//! The device-capability seam.
//!
//! Everything the child needs from its host device (permission prompts, GPS,
//! photo library, camera, screen, device stats, usage stats) goes through the
//! [`CapabilityProvider`] trait.  The session core never talks to the OS
//! directly, so every use case can be unit-tested with a mock provider.
//!
//! Providers also push unsolicited [`CapabilityEvent`]s (a permission revoked
//! in system settings, a location fix from an active watch, an app launched)
//! through a broadcast channel obtained from [`CapabilityProvider::subscribe`].

use async_trait::async_trait;
use kidlink_core::{
    protocol::messages::{
        AppActivity, AppUsageEntry, CapturedPhoto, DeviceInfo, Location, NotificationInfo,
        Photo, Screenshot,
    },
    PermissionKind,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Error type for capability calls.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    /// The capability requires a permission the user has not granted.
    #[error("{0} permission has not been granted")]
    PermissionDenied(PermissionKind),

    /// The capability exists but could not produce a result (no GPS fix,
    /// camera busy, prompt dismissed by the OS, ...).
    #[error("capability unavailable: {0}")]
    Unavailable(String),
}

/// Unsolicited notification from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityEvent {
    /// A permission changed outside of a negotiation, e.g. the user revoked it
    /// in the system settings.
    PermissionChanged { kind: PermissionKind, granted: bool },
    /// A fix produced by an active location watch.
    LocationUpdated(Location),
    /// An app was opened, closed, or brought to the foreground.
    AppActivity(AppActivity),
    /// A notification was posted on the device.
    NotificationReceived(NotificationInfo),
}

/// Abstraction over the host device's capabilities.
///
/// Implementations must be cheap to share (`Arc<dyn CapabilityProvider>`)
/// and callable from any task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Shows the permission prompt for `kind` and returns the user's answer.
    async fn request_permission(&self, kind: PermissionKind) -> Result<bool, CapabilityError>;

    /// Returns a fresh location fix.
    async fn get_current_location(&self) -> Result<Location, CapabilityError>;

    /// Returns up to `limit` photos, newest first.
    async fn get_recent_photos(&self, limit: usize) -> Result<Vec<Photo>, CapabilityError>;

    /// Takes a picture with the camera.
    async fn capture_photo(&self) -> Result<CapturedPhoto, CapabilityError>;

    /// Captures the current screen contents.
    async fn capture_screen(&self) -> Result<Screenshot, CapabilityError>;

    fn get_device_info(&self) -> DeviceInfo;

    fn get_app_usage(&self) -> Vec<AppUsageEntry>;

    /// Starts emitting [`CapabilityEvent::LocationUpdated`] periodically.
    /// Calling it while a watch is already active is a no-op.
    fn watch_location(&self);

    /// Stops the location watch.  No-op when no watch is active.
    fn unwatch_location(&self);

    /// Returns a new receiver for unsolicited device events.
    fn subscribe(&self) -> broadcast::Receiver<CapabilityEvent>;
}
