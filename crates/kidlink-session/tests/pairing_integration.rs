//! End-to-end pairing scenarios: a parent and a child device meeting through
//! the in-process loopback transport, with the simulated device behind the
//! child.  All timers run on Tokio's paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kidlink_core::{ConnectionState, PermissionKind, Role, TelemetryMessage};
use kidlink_session::infrastructure::capability::simulated::{
    SimulatedCapabilityProvider, SimulatedConfig,
};
use kidlink_session::infrastructure::transport::loopback::{LoopbackConfig, LoopbackTransport};
use kidlink_session::{Device, SessionConfig, SessionError};
use serde_json::Map;
use tokio::time::sleep;

struct Pair {
    parent: Device,
    child: Device,
    child_provider: Arc<SimulatedCapabilityProvider>,
    parent_states: Arc<Mutex<Vec<ConnectionState>>>,
}

fn pair() -> Pair {
    let transport = LoopbackTransport::new(LoopbackConfig::default());
    let parent = Device::new(
        Arc::new(transport.clone()),
        Arc::new(SimulatedCapabilityProvider::new(SimulatedConfig::default())),
        SessionConfig::default(),
    );
    let child_provider = Arc::new(SimulatedCapabilityProvider::new(SimulatedConfig::default()));
    let child = Device::new(
        Arc::new(transport),
        child_provider.clone(),
        SessionConfig::default(),
    );

    let parent_states = Arc::new(Mutex::new(Vec::new()));
    let recorded = parent_states.clone();
    parent
        .session()
        .on_connection_state_changed(move |state| recorded.lock().unwrap().push(state));

    Pair {
        parent,
        child,
        child_provider,
        parent_states,
    }
}

async fn paired() -> Pair {
    let pair = pair();
    pair.parent.begin(Role::Parent, "482913").unwrap();
    pair.child.begin(Role::Child, "482913").unwrap();
    sleep(Duration::from_millis(2001)).await;
    pair
}

fn tags(messages: &[TelemetryMessage]) -> Vec<&'static str> {
    messages.iter().map(TelemetryMessage::type_tag).collect()
}

#[tokio::test(start_paused = true)]
async fn test_both_sides_connect_after_the_handshake_delay() {
    let pair = pair();
    pair.parent.begin(Role::Parent, "482913").unwrap();
    pair.child.begin(Role::Child, "482913").unwrap();

    sleep(Duration::from_millis(1000)).await;
    assert_eq!(pair.parent.connection_status().state, ConnectionState::Connecting);
    assert_eq!(pair.child.connection_status().state, ConnectionState::Connecting);

    sleep(Duration::from_millis(1001)).await;
    let parent = pair.parent.connection_status();
    assert_eq!(parent.state, ConnectionState::Connected);
    assert_eq!(parent.role, Some(Role::Parent));
    assert_eq!(
        parent.pairing_code.map(|c| c.as_str().to_string()),
        Some("482913".to_string())
    );
    assert!(pair.child.session().is_connected());
    assert_eq!(
        *pair.parent_states.lock().unwrap(),
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn test_child_streams_comprehensive_updates_to_the_parent() {
    let pair = paired().await;

    let received = pair.parent.received();
    assert_eq!(tags(&received), vec!["comprehensive_update"]);
    match &received[0] {
        TelemetryMessage::ComprehensiveUpdate(update) => {
            assert!(update.location.is_none());
            assert!(update.recent_photos.is_none());
            assert!(!update.app_usage.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }

    sleep(Duration::from_millis(5000)).await;
    assert_eq!(
        tags(&pair.parent.received()),
        vec!["comprehensive_update", "comprehensive_update"]
    );

    // The buffer keeps only the ten most recent messages.
    sleep(Duration::from_millis(60_000)).await;
    assert_eq!(pair.parent.received().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_parent_permission_request_is_granted_after_the_prompt() {
    let pair = paired().await;

    let started = tokio::time::Instant::now();
    let granted = pair.parent.request_permission("location").await.unwrap();

    assert!(granted);
    assert!(started.elapsed() >= Duration::from_millis(1500));
    settle().await;
    let received = pair.parent.received();
    assert!(tags(&received).contains(&"permission_granted"));
    assert!(tags(&received).contains(&"permission_update"));
    assert!(pair.parent.permission_status().location);
    assert!(pair.child.permission_status().location);
    assert!(pair.child_provider.is_watching_location());

    // The next snapshot carries a location.  `received()` is newest first.
    sleep(Duration::from_millis(5000)).await;
    let latest_snapshot = pair
        .parent
        .received()
        .into_iter()
        .find_map(|m| match m {
            TelemetryMessage::ComprehensiveUpdate(u) => Some(u),
            _ => None,
        })
        .unwrap();
    assert!(latest_snapshot.location.is_some());
    assert!(latest_snapshot.permissions.location);
}

#[tokio::test(start_paused = true)]
async fn test_denied_prompt_resolves_false() {
    let pair = paired().await;
    pair.child_provider
        .set_prompt_answer(PermissionKind::Camera, false);

    let granted = pair.parent.request_permission("camera").await.unwrap();

    assert!(!granted);
    assert!(!pair.parent.permission_status().camera);
    assert!(!tags(&pair.parent.received()).contains(&"permission_granted"));
}

#[tokio::test(start_paused = true)]
async fn test_get_app_usage_command_returns_one_sorted_response() {
    let pair = paired().await;

    pair.parent.send_command("get_app_usage", Map::new()).unwrap();
    settle().await;

    let responses: Vec<_> = pair
        .parent
        .received()
        .into_iter()
        .filter_map(|m| match m {
            TelemetryMessage::AppUsageResponse(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(responses.len(), 1);
    let spent: Vec<u32> = responses[0].app_usage.iter().map(|e| e.time_spent).collect();
    let mut sorted = spent.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(spent, sorted);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_command_is_ignored_and_session_survives() {
    let pair = paired().await;
    let before = pair.parent.received().len();

    pair.parent.send_command("self_destruct", Map::new()).unwrap();
    settle().await;

    assert_eq!(pair.parent.received().len(), before);
    assert!(pair.child.session().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_twice_reports_disconnected_once_and_stops_the_child() {
    let pair = paired().await;

    pair.parent.disconnect();
    pair.parent.disconnect();
    settle().await;

    let disconnects = pair
        .parent_states
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == ConnectionState::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
    assert_eq!(pair.child.connection_status().state, ConnectionState::Disconnected);
    assert!(!pair.child.streamer().status().is_streaming);
    assert!(pair.parent.send_command("get_location", Map::new()).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_pairing_code_is_rejected_without_side_effects() {
    let pair = pair();

    let err = pair.parent.begin(Role::Parent, "12ab56").unwrap_err();

    assert!(matches!(err, SessionError::InvalidCodeFormat(_)));
    assert_eq!(pair.parent.connection_status().state, ConnectionState::Idle);
    assert!(pair.parent_states.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_permission_kind_is_rejected_before_sending() {
    let pair = paired().await;

    let err = pair.parent.request_permission("microphone").await.unwrap_err();

    assert!(matches!(err, SessionError::UnknownPermissionKind(_)));
    assert_eq!(pair.parent.negotiator().pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_codes_never_connect() {
    let pair = pair();
    pair.parent.begin(Role::Parent, "111111").unwrap();
    pair.child.begin(Role::Child, "222222").unwrap();

    sleep(Duration::from_secs(61)).await;

    assert_eq!(pair.parent.connection_status().state, ConnectionState::Disconnected);
    assert_eq!(pair.child.connection_status().state, ConnectionState::Disconnected);
    assert!(pair.parent.received().is_empty());
}

async fn settle() {
    sleep(Duration::from_millis(1)).await;
}
