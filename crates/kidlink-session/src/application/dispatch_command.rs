//! CommandDispatcher: executes parent commands on the child.
//!
//! | command          | response telemetry    |
//! |------------------|-----------------------|
//! | `capture_screen` | `screen_capture`      |
//! | `capture_photo`  | `camera_capture`      |
//! | `get_location`   | `location_response`   |
//! | `get_app_usage`  | `app_usage_response`  |
//!
//! Nothing a command does ever propagates back to the parent as an error:
//! unknown names are logged and ignored, capability failures are logged and
//! absorbed.  The outcome is returned to the caller for logging and tests.

use std::sync::Arc;

use chrono::Utc;
use kidlink_core::{
    protocol::messages::{
        sort_app_usage, AppUsageResponseMessage, CameraCaptureMessage, Command, CommandKind,
        LocationResponseMessage, ScreenCaptureMessage, UnknownCommand,
    },
    Role, TelemetryMessage,
};
use tracing::{debug, info, warn};

use super::capability::{CapabilityError, CapabilityProvider};
use super::pairing_session::{PairingSession, SessionError};

/// What happened to one command.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The response (identified by its telemetry `type`) was sent.
    Responded(&'static str),
    /// Not the child, so commands are not executed here.
    Ignored,
    /// The command name is not recognised.
    Unknown(UnknownCommand),
    /// The capability call failed; no response was sent.
    Failed(CapabilityError),
    /// The response was built but could not be sent.
    Undelivered(SessionError),
}

pub struct CommandDispatcher {
    session: PairingSession,
    provider: Arc<dyn CapabilityProvider>,
}

impl CommandDispatcher {
    pub fn new(session: PairingSession, provider: Arc<dyn CapabilityProvider>) -> Self {
        Self { session, provider }
    }

    /// Executes `command` and sends its response.  Never fails.
    pub async fn handle(&self, command: &Command) -> DispatchOutcome {
        if self.session.role() != Some(Role::Child) {
            debug!(command = %command.command, "command ignored outside the child role");
            return DispatchOutcome::Ignored;
        }

        let kind = match command.kind() {
            Ok(kind) => kind,
            Err(unknown) => {
                warn!(error = %unknown, "ignoring command");
                return DispatchOutcome::Unknown(unknown);
            }
        };
        info!(%kind, "executing parent command");

        let response = match self.execute(kind).await {
            Ok(response) => response,
            Err(e) => {
                warn!(%kind, error = %e, "command failed, no response sent");
                return DispatchOutcome::Failed(e);
            }
        };
        let tag = response.type_tag();
        match self.session.send(response) {
            Ok(()) => DispatchOutcome::Responded(tag),
            Err(e) => {
                warn!(%kind, error = %e, "command response could not be sent");
                DispatchOutcome::Undelivered(e)
            }
        }
    }

    async fn execute(&self, kind: CommandKind) -> Result<TelemetryMessage, CapabilityError> {
        let message = match kind {
            CommandKind::CaptureScreen => TelemetryMessage::ScreenCapture(ScreenCaptureMessage {
                screenshot: self.provider.capture_screen().await?,
                timestamp: Utc::now(),
            }),
            CommandKind::CapturePhoto => TelemetryMessage::CameraCapture(CameraCaptureMessage {
                photo: self.provider.capture_photo().await?,
                timestamp: Utc::now(),
            }),
            CommandKind::GetLocation => {
                TelemetryMessage::LocationResponse(LocationResponseMessage {
                    location: self.provider.get_current_location().await?,
                    timestamp: Utc::now(),
                })
            }
            CommandKind::GetAppUsage => {
                let mut app_usage = self.provider.get_app_usage();
                sort_app_usage(&mut app_usage);
                TelemetryMessage::AppUsageResponse(AppUsageResponseMessage {
                    timestamp: Utc::now(),
                    app_usage,
                })
            }
        };
        Ok(message)
    }
}
