//! Simulated device for demos and tests.
//!
//! Produces randomised but plausible data: a location jittered around a home
//! point, a handful of gallery photos, device stats, and per-app usage.  The
//! "user" answering permission prompts grants everything except screen
//! projection, which is granted with a configurable probability.  Tests can
//! script answers per kind with [`SimulatedCapabilityProvider::set_prompt_answer`].
//!
//! Location, photos and the camera refuse with
//! [`CapabilityError::PermissionDenied`] until the matching permission has
//! been granted through a prompt.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kidlink_core::{
    protocol::messages::{
        sort_app_usage, AppActivity, AppUsageEntry, CapturedPhoto, DeviceInfo, Location,
        NetworkInfo, NetworkType, NotificationInfo, Photo, Screenshot, Usage,
    },
    PermissionKind, PermissionSet,
};
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::capability::{CapabilityError, CapabilityEvent, CapabilityProvider};
use crate::sync::lock;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const GALLERY_SIZE: usize = 12;
const APPS: [&str; 10] = [
    "Messages", "Safari", "Instagram", "TikTok", "YouTube", "Spotify", "Games", "Camera", "Photos",
    "Settings",
];

/// Tunables for the simulated device.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedConfig {
    /// Interval between fixes while a location watch is active.
    pub location_watch_interval: Duration,
    /// Probability that the simulated user grants screen projection.
    pub screen_projection_grant_probability: f64,
    /// Centre of the simulated location jitter (latitude, longitude).
    pub home: (f64, f64),
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            location_watch_interval: Duration::from_millis(10_000),
            screen_projection_grant_probability: 0.7,
            home: (37.7749, -122.4194),
        }
    }
}

pub struct SimulatedCapabilityProvider {
    config: SimulatedConfig,
    granted: Mutex<PermissionSet>,
    prompt_answers: Mutex<HashMap<PermissionKind, bool>>,
    events: broadcast::Sender<CapabilityEvent>,
    watch: Mutex<Option<CancellationToken>>,
}

impl SimulatedCapabilityProvider {
    pub fn new(config: SimulatedConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            granted: Mutex::new(PermissionSet::new()),
            prompt_answers: Mutex::new(HashMap::new()),
            events,
            watch: Mutex::new(None),
        }
    }

    /// Fixes the simulated user's answer for future prompts of `kind`.
    pub fn set_prompt_answer(&self, kind: PermissionKind, granted: bool) {
        lock(&self.prompt_answers).insert(kind, granted);
    }

    /// Revokes `kind` as if the user did it in the system settings.
    pub fn revoke(&self, kind: PermissionKind) {
        if lock(&self.granted).set(kind, false) {
            info!(%kind, "simulated user revoked permission");
            if kind == PermissionKind::Location {
                self.unwatch_location();
            }
            self.publish(CapabilityEvent::PermissionChanged {
                kind,
                granted: false,
            });
        }
    }

    pub fn simulate_app_activity(&self, name: &str, action: &str) {
        self.publish(CapabilityEvent::AppActivity(AppActivity {
            name: name.to_string(),
            action: action.to_string(),
        }));
    }

    pub fn simulate_notification(&self, app: &str, title: &str, body: &str) {
        self.publish(CapabilityEvent::NotificationReceived(NotificationInfo {
            title: title.to_string(),
            body: body.to_string(),
            app: app.to_string(),
        }));
    }

    /// Whether a location watch is running.
    pub fn is_watching_location(&self) -> bool {
        lock(&self.watch).is_some()
    }

    fn publish(&self, event: CapabilityEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn require(&self, kind: PermissionKind) -> Result<(), CapabilityError> {
        if lock(&self.granted).is_granted(kind) {
            Ok(())
        } else {
            Err(CapabilityError::PermissionDenied(kind))
        }
    }

    fn prompt_answer(&self, kind: PermissionKind) -> bool {
        if let Some(answer) = lock(&self.prompt_answers).get(&kind) {
            return *answer;
        }
        match kind {
            PermissionKind::ScreenProjection => {
                rand::thread_rng().gen_bool(self.config.screen_projection_grant_probability)
            }
            _ => true,
        }
    }
}

impl Default for SimulatedCapabilityProvider {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl Drop for SimulatedCapabilityProvider {
    fn drop(&mut self) {
        self.unwatch_location();
    }
}

fn jittered_location(home: (f64, f64)) -> Location {
    let mut rng = rand::thread_rng();
    Location {
        latitude: home.0 + rng.gen_range(-0.005..0.005),
        longitude: home.1 + rng.gen_range(-0.005..0.005),
        accuracy: rng.gen_range(5.0..25.0),
        timestamp: Utc::now().timestamp_millis(),
    }
}

fn gallery(limit: usize) -> Vec<Photo> {
    let now = Utc::now().timestamp_millis();
    (0..limit.min(GALLERY_SIZE))
        .map(|i| Photo {
            id: format!("photo-{i}"),
            filename: format!("IMG_{:04}.JPG", 1000 + i),
            uri: format!("file:///sdcard/DCIM/Camera/IMG_{:04}.JPG", 1000 + i),
            creation_time: now - (i as i64) * 3_600_000,
            width: 4032,
            height: 3024,
        })
        .collect()
}

fn device_info() -> DeviceInfo {
    let mut rng = rand::thread_rng();
    DeviceInfo {
        battery: rng.gen_range(15..=100),
        storage: Usage {
            total: 64_000_000_000,
            used: rng.gen_range(8_000_000_000..60_000_000_000),
        },
        memory: Usage {
            total: 4_000_000_000,
            used: rng.gen_range(1_000_000_000..3_500_000_000),
        },
        network: NetworkInfo {
            kind: if rng.gen_bool(0.8) {
                NetworkType::Wifi
            } else {
                NetworkType::Cellular
            },
            strength: rng.gen_range(1..=4),
        },
    }
}

fn app_usage() -> Vec<AppUsageEntry> {
    let mut rng = rand::thread_rng();
    let now = Utc::now().timestamp_millis();
    let mut entries: Vec<AppUsageEntry> = APPS
        .iter()
        .map(|name| AppUsageEntry {
            name: (*name).to_string(),
            time_spent: rng.gen_range(1..=180),
            last_used: now - rng.gen_range(0..86_400_000),
        })
        .collect();
    sort_app_usage(&mut entries);
    entries
}

#[async_trait]
impl CapabilityProvider for SimulatedCapabilityProvider {
    async fn request_permission(&self, kind: PermissionKind) -> Result<bool, CapabilityError> {
        let granted = self.prompt_answer(kind);
        lock(&self.granted).set(kind, granted);
        debug!(%kind, granted, "simulated permission prompt answered");
        Ok(granted)
    }

    async fn get_current_location(&self) -> Result<Location, CapabilityError> {
        self.require(PermissionKind::Location)?;
        Ok(jittered_location(self.config.home))
    }

    async fn get_recent_photos(&self, limit: usize) -> Result<Vec<Photo>, CapabilityError> {
        self.require(PermissionKind::Gallery)?;
        Ok(gallery(limit))
    }

    async fn capture_photo(&self) -> Result<CapturedPhoto, CapabilityError> {
        self.require(PermissionKind::Camera)?;
        let timestamp = Utc::now().timestamp_millis();
        Ok(CapturedPhoto {
            uri: format!("file:///sdcard/DCIM/Camera/capture-{timestamp}.jpg"),
            width: 1920,
            height: 1080,
            timestamp,
        })
    }

    async fn capture_screen(&self) -> Result<Screenshot, CapabilityError> {
        let timestamp = Utc::now().timestamp_millis();
        Ok(Screenshot {
            uri: format!("file:///sdcard/Pictures/Screenshots/screen-{timestamp}.png"),
            width: 1080,
            height: 2340,
        })
    }

    fn get_device_info(&self) -> DeviceInfo {
        device_info()
    }

    fn get_app_usage(&self) -> Vec<AppUsageEntry> {
        app_usage()
    }

    fn watch_location(&self) {
        let mut watch = lock(&self.watch);
        if watch.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        *watch = Some(cancel.clone());

        let events = self.events.clone();
        let home = self.config.home;
        let period = self.config.location_watch_interval;
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = events.send(CapabilityEvent::LocationUpdated(jittered_location(home)));
                    }
                }
            }
        });
        debug!("simulated location watch started");
    }

    fn unwatch_location(&self) {
        if let Some(cancel) = lock(&self.watch).take() {
            cancel.cancel();
            debug!("simulated location watch stopped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CapabilityEvent> {
        self.events.subscribe()
    }
}
