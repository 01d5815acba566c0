//! All KidLink message types.
//!
//! Three families of messages share the channel between the devices:
//!
//! - [`TelemetryMessage`] – child → parent data, tagged by a `type` string.
//! - [`Command`] – parent → child instructions, tagged by a `command` string.
//! - [`ControlMessage`] – the permission negotiation exchange, which is kept
//!   apart from generic commands so the child can never confuse the two.
//!
//! Every message is wrapped in a [`Frame`] carrying a per-sender sequence
//! number before it is encoded.  Field names on the wire are camelCase because
//! the parent UI consumes them directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::permissions::{PermissionKind, PermissionSet};

// ── Capability data ───────────────────────────────────────────────────────────

/// A single location fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in metres.
    pub accuracy: f64,
    /// Milliseconds since Unix epoch at which the fix was taken.
    pub timestamp: i64,
}

/// A gallery photo reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: String,
    pub filename: String,
    pub uri: String,
    /// Milliseconds since Unix epoch.
    pub creation_time: i64,
    pub width: u32,
    pub height: u32,
}

/// A photo taken on demand with the camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPhoto {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
}

/// A screenshot of the child's screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub uri: String,
    pub width: u32,
    pub height: u32,
}

/// Total/used pair, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Wifi,
    Cellular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(rename = "type")]
    pub kind: NetworkType,
    /// Signal strength in bars, 1–5.
    pub strength: u8,
}

/// Snapshot of device health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Battery charge percentage, 0–100.
    pub battery: u8,
    pub storage: Usage,
    pub memory: Usage,
    pub network: NetworkInfo,
}

/// Usage statistics for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUsageEntry {
    pub name: String,
    /// Minutes spent in the app.
    pub time_spent: u32,
    /// Milliseconds since Unix epoch.
    pub last_used: i64,
}

/// Sorts app usage descending by time spent, the order the parent expects.
pub fn sort_app_usage(entries: &mut [AppUsageEntry]) {
    entries.sort_by(|a, b| b.time_spent.cmp(&a.time_spent));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionChange {
    #[serde(rename = "type")]
    pub kind: PermissionKind,
    pub granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppActivity {
    pub name: String,
    /// `"opened"`, `"closed"`, or `"backgrounded"`.
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationInfo {
    pub title: String,
    pub body: String,
    pub app: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Panic,
    LocationAlert,
    AppAlert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyAlert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub priority: AlertPriority,
}

// ── Telemetry payloads ────────────────────────────────────────────────────────

/// `comprehensive_update`: the periodic full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComprehensiveUpdate {
    pub timestamp: DateTime<Utc>,
    pub device_info: DeviceInfo,
    pub app_usage: Vec<AppUsageEntry>,
    pub permissions: PermissionSet,
    /// Present only when location is granted and the fix succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Present only when gallery is granted and the listing succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_photos: Option<Vec<Photo>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionUpdateMessage {
    pub timestamp: DateTime<Utc>,
    pub permission: PermissionChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdateMessage {
    pub timestamp: DateTime<Utc>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppActivityMessage {
    pub timestamp: DateTime<Utc>,
    pub app: AppActivity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationReceivedMessage {
    pub timestamp: DateTime<Utc>,
    pub notification: NotificationInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenCaptureMessage {
    pub timestamp: DateTime<Utc>,
    pub screenshot: Screenshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCaptureMessage {
    pub timestamp: DateTime<Utc>,
    pub photo: CapturedPhoto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyAlertMessage {
    pub timestamp: DateTime<Utc>,
    pub alert: EmergencyAlert,
}

/// `permission_granted`: sent by the child after a successful negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrantedMessage {
    /// Time of the grant.
    pub timestamp: DateTime<Utc>,
    pub permission: PermissionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResponseMessage {
    pub timestamp: DateTime<Utc>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUsageResponseMessage {
    pub timestamp: DateTime<Utc>,
    pub app_usage: Vec<AppUsageEntry>,
}

// ── Telemetry enum ────────────────────────────────────────────────────────────

/// Every child → parent message, discriminated by its `type` field.
///
/// # Serde representation
///
/// ```json
/// {"type":"permission_granted","timestamp":"2024-05-01T10:00:00Z","permission":"location"}
/// {"type":"location_update","timestamp":"...","location":{"latitude":1.0,...}}
/// ```
///
/// Messages are immutable once built; ownership moves into the session's
/// outbound path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    ComprehensiveUpdate(ComprehensiveUpdate),
    PermissionUpdate(PermissionUpdateMessage),
    LocationUpdate(LocationUpdateMessage),
    AppActivity(AppActivityMessage),
    NotificationReceived(NotificationReceivedMessage),
    ScreenCapture(ScreenCaptureMessage),
    CameraCapture(CameraCaptureMessage),
    EmergencyAlert(EmergencyAlertMessage),
    PermissionGranted(PermissionGrantedMessage),
    LocationResponse(LocationResponseMessage),
    AppUsageResponse(AppUsageResponseMessage),
}

impl TelemetryMessage {
    /// The `type` discriminator as it appears on the wire.
    pub fn type_tag(&self) -> &'static str {
        match self {
            TelemetryMessage::ComprehensiveUpdate(_) => "comprehensive_update",
            TelemetryMessage::PermissionUpdate(_) => "permission_update",
            TelemetryMessage::LocationUpdate(_) => "location_update",
            TelemetryMessage::AppActivity(_) => "app_activity",
            TelemetryMessage::NotificationReceived(_) => "notification_received",
            TelemetryMessage::ScreenCapture(_) => "screen_capture",
            TelemetryMessage::CameraCapture(_) => "camera_capture",
            TelemetryMessage::EmergencyAlert(_) => "emergency_alert",
            TelemetryMessage::PermissionGranted(_) => "permission_granted",
            TelemetryMessage::LocationResponse(_) => "location_response",
            TelemetryMessage::AppUsageResponse(_) => "app_usage_response",
        }
    }

    /// Event time of the message (not transmission time).
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryMessage::ComprehensiveUpdate(m) => m.timestamp,
            TelemetryMessage::PermissionUpdate(m) => m.timestamp,
            TelemetryMessage::LocationUpdate(m) => m.timestamp,
            TelemetryMessage::AppActivity(m) => m.timestamp,
            TelemetryMessage::NotificationReceived(m) => m.timestamp,
            TelemetryMessage::ScreenCapture(m) => m.timestamp,
            TelemetryMessage::CameraCapture(m) => m.timestamp,
            TelemetryMessage::EmergencyAlert(m) => m.timestamp,
            TelemetryMessage::PermissionGranted(m) => m.timestamp,
            TelemetryMessage::LocationResponse(m) => m.timestamp,
            TelemetryMessage::AppUsageResponse(m) => m.timestamp,
        }
    }

    /// Builds a `permission_update` stamped with the current time.
    pub fn permission_update(kind: PermissionKind, granted: bool) -> Self {
        TelemetryMessage::PermissionUpdate(PermissionUpdateMessage {
            timestamp: Utc::now(),
            permission: PermissionChange { kind, granted },
        })
    }

    /// Builds a `permission_granted` stamped with the current time.
    pub fn permission_granted(kind: PermissionKind) -> Self {
        TelemetryMessage::PermissionGranted(PermissionGrantedMessage {
            timestamp: Utc::now(),
            permission: kind,
        })
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Error for a command name the child does not understand.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

/// Commands the child knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    CaptureScreen,
    CapturePhoto,
    GetLocation,
    GetAppUsage,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::CaptureScreen => "capture_screen",
            CommandKind::CapturePhoto => "capture_photo",
            CommandKind::GetLocation => "get_location",
            CommandKind::GetAppUsage => "get_app_usage",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture_screen" => Ok(CommandKind::CaptureScreen),
            "capture_photo" => Ok(CommandKind::CapturePhoto),
            "get_location" => Ok(CommandKind::GetLocation),
            "get_app_usage" => Ok(CommandKind::GetAppUsage),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

/// A parent → child instruction.
///
/// The command name stays a free-form string on the wire so that a newer
/// parent can send commands an older child does not know; the child rejects
/// those with a log line rather than failing to decode the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Command {
    /// Builds a command with the given name and parameters, stamped now.
    pub fn new(command: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            params,
        }
    }

    /// Builds a parameterless known command.
    pub fn from_kind(kind: CommandKind) -> Self {
        Self::new(kind.as_str(), Map::new())
    }

    /// Resolves the command name to a known [`CommandKind`].
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCommand`] if the name is not recognised.
    pub fn kind(&self) -> Result<CommandKind, UnknownCommand> {
        self.command.parse()
    }
}

// ── Negotiation control messages ──────────────────────────────────────────────

/// Messages of the permission negotiation exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Parent → child: please prompt for `permission`.
    PermissionRequest {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        permission: PermissionKind,
    },
    /// Child → parent: outcome of the request with the same id.
    PermissionResponse {
        #[serde(rename = "requestId")]
        request_id: Uuid,
        permission: PermissionKind,
        granted: bool,
    },
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// The body of a [`Frame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Telemetry(TelemetryMessage),
    Command(Command),
    Control(ControlMessage),
}

impl Payload {
    /// Short label for log lines, e.g. `telemetry/location_update`.
    pub fn describe(&self) -> String {
        match self {
            Payload::Telemetry(t) => format!("telemetry/{}", t.type_tag()),
            Payload::Command(c) => format!("command/{}", c.command),
            Payload::Control(ControlMessage::PermissionRequest { permission, .. }) => {
                format!("control/permission_request/{permission}")
            }
            Payload::Control(ControlMessage::PermissionResponse { permission, .. }) => {
                format!("control/permission_response/{permission}")
            }
        }
    }
}

impl From<TelemetryMessage> for Payload {
    fn from(message: TelemetryMessage) -> Self {
        Payload::Telemetry(message)
    }
}

impl From<Command> for Payload {
    fn from(command: Command) -> Self {
        Payload::Command(command)
    }
}

impl From<ControlMessage> for Payload {
    fn from(message: ControlMessage) -> Self {
        Payload::Control(message)
    }
}

/// Unit of transmission: a payload plus the sender's sequence number.
///
/// Sequence numbers start at 0 for each connected channel and increase by one
/// per frame.  The receiver uses them to drop duplicates so that delivery is
/// exactly-once even over a transport that may redeliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub sequence: u64,
    pub payload: Payload,
}
