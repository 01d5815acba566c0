//! TelemetryStreamer: periodic snapshots and event-driven messages on the child.
//!
//! While streaming, two background tasks feed one emit sink:
//!
//! - the **ticker** builds one `comprehensive_update` per interval.  The first
//!   tick fires immediately.  Location and photos are attached only when the
//!   matching permission is granted; a failed fetch just omits the field.
//! - the **event forwarder** turns permission flips and provider events into
//!   `permission_update`, `location_update`, `app_activity` and
//!   `notification_received` messages as they happen.
//!
//! Every run gets its own id.  The sink is only called while holding the state
//! lock and only for the current run id, so once [`TelemetryStreamer::stop`]
//! returns nothing can reach the sink again, even from a collection that was
//! already in flight.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use kidlink_core::{
    protocol::messages::{
        AlertKind, AlertPriority, AppActivity, AppActivityMessage, CameraCaptureMessage,
        ComprehensiveUpdate, EmergencyAlert, EmergencyAlertMessage, LocationUpdateMessage,
        NotificationInfo, NotificationReceivedMessage, PermissionChange, ScreenCaptureMessage,
    },
    PermissionKind, TelemetryMessage,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync::lock;
use super::capability::{CapabilityEvent, CapabilityProvider};
use super::config::SessionConfig;
use super::negotiate_permission::PermissionNegotiator;

/// Destination for outbound telemetry, normally `PairingSession::send`.
pub type TelemetrySink = Arc<dyn Fn(TelemetryMessage) + Send + Sync>;

/// Snapshot returned by [`TelemetryStreamer::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingStatus {
    pub is_streaming: bool,
    pub frequency: Duration,
}

struct Running {
    id: u64,
    sink: TelemetrySink,
    cancel: CancellationToken,
}

struct StreamerState {
    frequency: Duration,
    next_run: u64,
    running: Option<Running>,
}

pub struct TelemetryStreamer {
    provider: Arc<dyn CapabilityProvider>,
    negotiator: Arc<PermissionNegotiator>,
    recent_photos_limit: usize,
    state: Mutex<StreamerState>,
}

impl TelemetryStreamer {
    pub fn new(
        provider: Arc<dyn CapabilityProvider>,
        negotiator: Arc<PermissionNegotiator>,
        config: &SessionConfig,
    ) -> Self {
        let frequency = if config.telemetry_interval.is_zero() {
            let fallback = SessionConfig::default().telemetry_interval;
            warn!(?fallback, "zero telemetry interval configured, using the default");
            fallback
        } else {
            config.telemetry_interval
        };
        Self {
            provider,
            negotiator,
            recent_photos_limit: config.recent_photos_limit,
            state: Mutex::new(StreamerState {
                frequency,
                next_run: 0,
                running: None,
            }),
        }
    }

    /// Starts streaming into `sink`.  Logged no-op if already running.
    pub fn start(self: &Arc<Self>, sink: TelemetrySink) {
        let (run_id, frequency, cancel) = {
            let mut state = lock(&self.state);
            if state.running.is_some() {
                warn!("telemetry streaming already active, start ignored");
                return;
            }
            state.next_run += 1;
            let cancel = CancellationToken::new();
            state.running = Some(Running {
                id: state.next_run,
                sink,
                cancel: cancel.clone(),
            });
            (state.next_run, state.frequency, cancel)
        };

        // Subscribe before spawning so nothing between start() and the first
        // poll is missed.
        let changes = self.negotiator.subscribe_changes();
        let events = self.provider.subscribe();
        if self.negotiator.local_permissions().location {
            self.provider.watch_location();
        }

        tokio::spawn(Arc::clone(self).tick_loop(run_id, frequency, cancel.clone()));
        tokio::spawn(Arc::clone(self).forward_loop(run_id, changes, events, cancel));
        info!(?frequency, "telemetry streaming started");
    }

    /// Stops streaming.  Idempotent.
    pub fn stop(&self) {
        let Some(running) = lock(&self.state).running.take() else {
            return;
        };
        running.cancel.cancel();
        self.provider.unwatch_location();
        info!("telemetry streaming stopped");
    }

    /// Changes the snapshot interval.  A running stream restarts with the
    /// same sink, and its first tick fires immediately.
    ///
    /// A zero interval is rejected with a warning and changes nothing.
    pub fn set_frequency(self: &Arc<Self>, frequency: Duration) {
        if frequency.is_zero() {
            warn!("telemetry frequency must be greater than zero, change ignored");
            return;
        }
        let sink = {
            let mut state = lock(&self.state);
            state.frequency = frequency;
            state.running.as_ref().map(|r| Arc::clone(&r.sink))
        };
        debug!(?frequency, "telemetry frequency changed");
        if let Some(sink) = sink {
            self.stop();
            self.start(sink);
        }
    }

    pub fn status(&self) -> StreamingStatus {
        let state = lock(&self.state);
        StreamingStatus {
            is_streaming: state.running.is_some(),
            frequency: state.frequency,
        }
    }

    // ── Event helpers ─────────────────────────────────────────────────────────
    //
    // Each returns `false` without doing anything when streaming is inactive.

    pub fn send_app_activity(&self, name: &str, action: &str) -> bool {
        self.emit_current(TelemetryMessage::AppActivity(AppActivityMessage {
            timestamp: Utc::now(),
            app: AppActivity {
                name: name.to_string(),
                action: action.to_string(),
            },
        }))
    }

    pub fn send_notification(&self, notification: NotificationInfo) -> bool {
        self.emit_current(TelemetryMessage::NotificationReceived(
            NotificationReceivedMessage {
                timestamp: Utc::now(),
                notification,
            },
        ))
    }

    /// Raises a high-priority panic alert.
    pub fn send_emergency_alert(&self, message: &str) -> bool {
        self.send_alert(EmergencyAlert {
            kind: AlertKind::Panic,
            message: message.to_string(),
            priority: AlertPriority::High,
        })
    }

    pub fn send_alert(&self, alert: EmergencyAlert) -> bool {
        self.emit_current(TelemetryMessage::EmergencyAlert(EmergencyAlertMessage {
            timestamp: Utc::now(),
            alert,
        }))
    }

    /// Captures the screen and emits it as `screen_capture`.
    pub async fn send_screen_capture(&self) -> bool {
        if !self.status().is_streaming {
            return false;
        }
        match self.provider.capture_screen().await {
            Ok(screenshot) => self.emit_current(TelemetryMessage::ScreenCapture(
                ScreenCaptureMessage {
                    timestamp: Utc::now(),
                    screenshot,
                },
            )),
            Err(e) => {
                warn!(error = %e, "screen capture failed");
                false
            }
        }
    }

    /// Takes a photo and emits it as `camera_capture`.
    pub async fn send_camera_capture(&self) -> bool {
        if !self.status().is_streaming {
            return false;
        }
        match self.provider.capture_photo().await {
            Ok(photo) => self.emit_current(TelemetryMessage::CameraCapture(CameraCaptureMessage {
                timestamp: Utc::now(),
                photo,
            })),
            Err(e) => {
                warn!(error = %e, "camera capture failed");
                false
            }
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn emit(&self, run_id: u64, message: TelemetryMessage) -> bool {
        let state = lock(&self.state);
        match &state.running {
            Some(running) if running.id == run_id => {
                debug!(kind = message.type_tag(), "telemetry emitted");
                (running.sink)(message);
                true
            }
            _ => false,
        }
    }

    fn emit_current(&self, message: TelemetryMessage) -> bool {
        let state = lock(&self.state);
        match &state.running {
            Some(running) => {
                debug!(kind = message.type_tag(), "telemetry emitted");
                (running.sink)(message);
                true
            }
            None => {
                debug!(kind = message.type_tag(), "streaming inactive, message dropped");
                false
            }
        }
    }

    async fn tick_loop(self: Arc<Self>, run_id: u64, frequency: Duration, cancel: CancellationToken) {
        let mut ticker = interval(frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                update = self.collect() => {
                    self.emit(run_id, TelemetryMessage::ComprehensiveUpdate(update));
                }
            }
        }
        debug!(run_id, "telemetry ticker stopped");
    }

    /// Builds one snapshot.  Capability failures drop the affected field.
    async fn collect(&self) -> ComprehensiveUpdate {
        let permissions = self.negotiator.local_permissions();
        let mut update = ComprehensiveUpdate {
            timestamp: Utc::now(),
            device_info: self.provider.get_device_info(),
            app_usage: self.provider.get_app_usage(),
            permissions,
            location: None,
            recent_photos: None,
        };

        if permissions.location {
            match self.provider.get_current_location().await {
                Ok(location) => update.location = Some(location),
                Err(e) => warn!(error = %e, "location omitted from snapshot"),
            }
        }
        if permissions.gallery {
            match self.provider.get_recent_photos(self.recent_photos_limit).await {
                Ok(mut photos) => {
                    photos.truncate(self.recent_photos_limit);
                    update.recent_photos = Some(photos);
                }
                Err(e) => warn!(error = %e, "photos omitted from snapshot"),
            }
        }
        update
    }

    async fn forward_loop(
        self: Arc<Self>,
        run_id: u64,
        mut changes: broadcast::Receiver<PermissionChange>,
        mut events: broadcast::Receiver<CapabilityEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => self.on_permission_change(run_id, change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "permission changes lagged, some updates were lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                event = events.recv() => match event {
                    Ok(event) => self.on_capability_event(run_id, event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "device events lagged, some updates were lost");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(run_id, "telemetry event forwarder stopped");
    }

    fn on_permission_change(&self, run_id: u64, change: PermissionChange) {
        if !self.emit(
            run_id,
            TelemetryMessage::permission_update(change.kind, change.granted),
        ) {
            return;
        }
        if change.kind == PermissionKind::Location {
            if change.granted {
                self.provider.watch_location();
            } else {
                self.provider.unwatch_location();
            }
        }
    }

    fn on_capability_event(&self, run_id: u64, event: CapabilityEvent) {
        let message = match event {
            CapabilityEvent::LocationUpdated(location) => {
                TelemetryMessage::LocationUpdate(LocationUpdateMessage {
                    timestamp: Utc::now(),
                    location,
                })
            }
            CapabilityEvent::AppActivity(app) => TelemetryMessage::AppActivity(AppActivityMessage {
                timestamp: Utc::now(),
                app,
            }),
            CapabilityEvent::NotificationReceived(notification) => {
                TelemetryMessage::NotificationReceived(NotificationReceivedMessage {
                    timestamp: Utc::now(),
                    notification,
                })
            }
            // The negotiator owns the permission set and re-broadcasts flips.
            CapabilityEvent::PermissionChanged { .. } => return,
        };
        self.emit(run_id, message);
    }
}
