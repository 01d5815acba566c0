//! PermissionNegotiator: the permission request/response exchange.
//!
//! # The exchange (for beginners)
//!
//! ```text
//!   parent                                   child
//!     │  permission_request {requestId, kind}  │
//!     │ ─────────────────────────────────────► │  wait negotiation delay
//!     │                                        │  CapabilityProvider::request_permission
//!     │                                        │  update PermissionSet
//!     │        permission_granted (if granted) │
//!     │ ◄───────────────────────────────────── │
//!     │  permission_response {requestId, ok}   │
//!     │ ◄───────────────────────────────────── │
//!   resolves                                   │
//! ```
//!
//! The parent correlates the answer by request id, so several requests may
//! be in flight at once, including two for the same kind.  A request that is
//! still unanswered when the session ends, or when the negotiation timeout
//! elapses, resolves to `false`; an answer arriving after that is dropped.
//!
//! The child keeps the authoritative [`PermissionSet`] for the device.  Every
//! flip of an entry, whether it came from a negotiation or from the provider
//! reporting a revocation, is broadcast as a [`PermissionChange`] so the
//! telemetry streamer can forward it as `permission_update`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use kidlink_core::{
    protocol::messages::PermissionChange, ControlMessage, PermissionKind, PermissionSet, Role,
    TelemetryMessage,
};
use tokio::sync::{broadcast, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::sync::lock;
use super::capability::{CapabilityEvent, CapabilityProvider};
use super::config::SessionConfig;
use super::pairing_session::{parse_permission, PairingSession, SessionError};

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Runs both halves of the permission exchange for one device.
pub struct PermissionNegotiator {
    session: PairingSession,
    provider: Arc<dyn CapabilityProvider>,
    negotiation_delay: Duration,
    negotiation_timeout: Duration,
    /// The device's own grants.  Authoritative on the child.
    permissions: Mutex<PermissionSet>,
    changes: broadcast::Sender<PermissionChange>,
    /// Parent-side requests waiting for a `permission_response`.
    pending: Mutex<HashMap<Uuid, oneshot::Sender<bool>>>,
}

impl PermissionNegotiator {
    pub fn new(
        session: PairingSession,
        provider: Arc<dyn CapabilityProvider>,
        config: &SessionConfig,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            session,
            provider,
            negotiation_delay: config.negotiation_delay,
            negotiation_timeout: config.negotiation_timeout,
            permissions: Mutex::new(PermissionSet::new()),
            changes,
            pending: Mutex::new(HashMap::new()),
        }
    }

    // ── Parent side ───────────────────────────────────────────────────────────

    /// Asks the child to grant `kind` and waits for the answer.
    ///
    /// Resolves to `false` if the child denies, the prompt fails, the session
    /// ends first, or the negotiation timeout elapses.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownPermissionKind`] if `kind` is not one of
    ///   `camera`, `location`, `notifications`, `gallery`, `screenProjection`.
    /// - [`SessionError::RoleViolation`] when called on the child.
    /// - [`SessionError::NotConnected`] when no channel is established.
    pub async fn request_permission(&self, kind: &str) -> Result<bool, SessionError> {
        let kind = parse_permission(kind)?;
        self.request(kind).await
    }

    /// Typed variant of [`request_permission`](Self::request_permission).
    pub async fn request(&self, kind: PermissionKind) -> Result<bool, SessionError> {
        match self.session.role() {
            Some(Role::Parent) => {}
            Some(role) => {
                return Err(SessionError::RoleViolation {
                    operation: "requesting a permission",
                    role,
                })
            }
            None => return Err(SessionError::NotConnected),
        }
        if !self.session.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let token = self.session.cycle_token().ok_or(SessionError::NotConnected)?;

        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, tx);
        let sent = self.session.send(ControlMessage::PermissionRequest {
            request_id,
            permission: kind,
        });
        if let Err(e) = sent {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }
        info!(%kind, %request_id, "permission requested from child");

        let granted = tokio::select! {
            answer = rx => answer.unwrap_or(false),
            _ = token.cancelled() => {
                info!(%kind, %request_id, "session ended before the child answered");
                false
            }
            _ = sleep(self.negotiation_timeout) => {
                warn!(%kind, %request_id, timeout = ?self.negotiation_timeout, "permission request timed out");
                false
            }
        };
        lock(&self.pending).remove(&request_id);
        info!(%kind, granted, "permission negotiation finished");
        Ok(granted)
    }

    // ── Inbound control messages ──────────────────────────────────────────────

    /// Routes an inbound control message to the half that owns it.
    pub fn handle_control(self: &Arc<Self>, message: ControlMessage) {
        match (self.session.role(), message) {
            (
                Some(Role::Child),
                ControlMessage::PermissionRequest {
                    request_id,
                    permission,
                },
            ) => self.respond(request_id, permission),
            (
                Some(Role::Parent),
                ControlMessage::PermissionResponse {
                    request_id,
                    permission,
                    granted,
                },
            ) => match lock(&self.pending).remove(&request_id) {
                Some(waiter) => {
                    let _ = waiter.send(granted);
                }
                None => {
                    debug!(%request_id, %permission, "answer for an abandoned request dropped")
                }
            },
            (role, message) => {
                warn!(?role, ?message, "control message not valid for this role, ignored");
            }
        }
    }

    /// Child side: prompts after the negotiation delay and reports back.
    fn respond(self: &Arc<Self>, request_id: Uuid, kind: PermissionKind) {
        let Some(token) = self.session.cycle_token() else {
            debug!(%request_id, "permission request arrived after teardown");
            return;
        };
        info!(%kind, %request_id, "parent requested permission");
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(%request_id, "session ended before the prompt was shown");
                    return;
                }
                _ = sleep(this.negotiation_delay) => {}
            }

            let granted = match this.provider.request_permission(kind).await {
                Ok(granted) => granted,
                Err(e) => {
                    warn!(%kind, error = %e, "permission prompt failed, treating as denied");
                    false
                }
            };
            this.apply(kind, granted);

            if token.is_cancelled() {
                debug!(%request_id, "session ended during the prompt, answer dropped");
                return;
            }
            if granted {
                if let Err(e) = this.session.send(TelemetryMessage::permission_granted(kind)) {
                    warn!(error = %e, "could not report granted permission");
                }
            }
            let response = ControlMessage::PermissionResponse {
                request_id,
                permission: kind,
                granted,
            };
            if let Err(e) = this.session.send(response) {
                warn!(error = %e, %request_id, "could not answer permission request");
            }
        });
    }

    // ── Child-side state ──────────────────────────────────────────────────────

    /// Records a grant or revocation and broadcasts it if it changed anything.
    pub fn apply(&self, kind: PermissionKind, granted: bool) -> bool {
        let changed = lock(&self.permissions).set(kind, granted);
        if changed {
            info!(%kind, granted, "permission changed");
            // No receivers just means nobody is streaming.
            let _ = self.changes.send(PermissionChange { kind, granted });
        }
        changed
    }

    /// Follows provider-reported permission changes (e.g. a revocation in
    /// system settings) until `shutdown` is cancelled.
    pub fn watch_provider(self: &Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.provider.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(CapabilityEvent::PermissionChanged { kind, granted }) => {
                        let Some(this) = weak.upgrade() else { break };
                        this.apply(kind, granted);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "permission watcher lagged behind provider events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("permission watcher stopped");
        });
    }

    /// New receiver for permission flips.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PermissionChange> {
        self.changes.subscribe()
    }

    /// The device's own grants.
    pub fn local_permissions(&self) -> PermissionSet {
        *lock(&self.permissions)
    }

    /// Snapshot for the UI: the child's own set on the child, the mirrored
    /// set on the parent.
    pub fn status(&self) -> PermissionSet {
        match self.session.role() {
            Some(Role::Parent) => self.session.remote_permissions(),
            _ => self.local_permissions(),
        }
    }

    /// Number of parent-side requests still waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::capability::{CapabilityError, MockCapabilityProvider};
    use crate::application::test_support::{connected, drain, settle, ScriptedTransport};
    use kidlink_core::Payload;
    use mockall::predicate::eq;

    fn negotiator(session: PairingSession, provider: MockCapabilityProvider) -> Arc<PermissionNegotiator> {
        Arc::new(PermissionNegotiator::new(
            session,
            Arc::new(provider),
            &SessionConfig::default(),
        ))
    }

    fn request_id_of(payload: &Payload) -> Uuid {
        match payload {
            Payload::Control(ControlMessage::PermissionRequest { request_id, .. }) => *request_id,
            other => panic!("expected a permission request, got {other:?}"),
        }
    }

    // ── Parent side ───────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_unknown_kind_is_rejected_without_sending() {
        let (session, mut peer) = connected(Role::Parent).await;
        let negotiator = negotiator(session, MockCapabilityProvider::new());

        let result = negotiator.request_permission("microphone").await;

        assert!(matches!(result, Err(SessionError::UnknownPermissionKind(_))));
        assert!(drain(&mut peer).is_empty());
        assert_eq!(negotiator.status(), PermissionSet::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_cannot_request() {
        let (session, _peer) = connected(Role::Child).await;
        let negotiator = negotiator(session, MockCapabilityProvider::new());

        let result = negotiator.request_permission("camera").await;

        assert!(matches!(
            result,
            Err(SessionError::RoleViolation { role: Role::Child, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_before_begin_is_not_connected() {
        let transport = Arc::new(ScriptedTransport::default());
        let session = PairingSession::new(transport);
        let negotiator = negotiator(session, MockCapabilityProvider::new());

        assert_eq!(
            negotiator.request_permission("camera").await,
            Err(SessionError::NotConnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_resolves_with_the_child_answer() {
        let (session, mut peer) = connected(Role::Parent).await;
        let negotiator = negotiator(session, MockCapabilityProvider::new());

        let task = tokio::spawn({
            let negotiator = Arc::clone(&negotiator);
            async move { negotiator.request_permission("location").await }
        });
        settle().await;
        let frames = drain(&mut peer);
        assert_eq!(frames.len(), 1);
        let request_id = request_id_of(&frames[0].payload);

        negotiator.handle_control(ControlMessage::PermissionResponse {
            request_id,
            permission: PermissionKind::Location,
            granted: true,
        });

        assert_eq!(task.await.unwrap(), Ok(true));
        assert_eq!(negotiator.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_request_resolves_false_on_disconnect() {
        let (session, _peer) = connected(Role::Parent).await;
        let negotiator = negotiator(session.clone(), MockCapabilityProvider::new());

        let task = tokio::spawn({
            let negotiator = Arc::clone(&negotiator);
            async move { negotiator.request_permission("gallery").await }
        });
        settle().await;
        session.disconnect();

        assert_eq!(task.await.unwrap(), Ok(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_request_times_out_and_drops_late_answer() {
        let (session, mut peer) = connected(Role::Parent).await;
        let negotiator = negotiator(session, MockCapabilityProvider::new());

        let task = tokio::spawn({
            let negotiator = Arc::clone(&negotiator);
            async move { negotiator.request_permission("camera").await }
        });
        settle().await;
        let request_id = request_id_of(&drain(&mut peer)[0].payload);

        sleep(Duration::from_secs(31)).await;
        assert_eq!(task.await.unwrap(), Ok(false));

        // Late answer must be ignored quietly.
        negotiator.handle_control(ControlMessage::PermissionResponse {
            request_id,
            permission: PermissionKind::Camera,
            granted: true,
        });
        assert_eq!(negotiator.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_for_same_kind_are_independent() {
        let (session, mut peer) = connected(Role::Parent).await;
        let negotiator = negotiator(session, MockCapabilityProvider::new());

        let first = tokio::spawn({
            let negotiator = Arc::clone(&negotiator);
            async move { negotiator.request_permission("camera").await }
        });
        let second = tokio::spawn({
            let negotiator = Arc::clone(&negotiator);
            async move { negotiator.request_permission("camera").await }
        });
        settle().await;
        let frames = drain(&mut peer);
        assert_eq!(frames.len(), 2);
        assert_eq!(negotiator.pending_requests(), 2);

        for (frame, granted) in frames.iter().zip([true, false]) {
            negotiator.handle_control(ControlMessage::PermissionResponse {
                request_id: request_id_of(&frame.payload),
                permission: PermissionKind::Camera,
                granted,
            });
        }

        let mut answers = vec![first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
        answers.sort();
        assert_eq!(answers, vec![false, true]);
    }

    // ── Child side ────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_child_grants_after_delay_and_reports_back() {
        let (session, mut peer) = connected(Role::Child).await;
        let mut provider = MockCapabilityProvider::new();
        provider
            .expect_request_permission()
            .with(eq(PermissionKind::Location))
            .times(1)
            .returning(|_| Ok(true));
        let negotiator = negotiator(session, provider);
        let mut changes = negotiator.subscribe_changes();
        let request_id = Uuid::new_v4();

        negotiator.handle_control(ControlMessage::PermissionRequest {
            request_id,
            permission: PermissionKind::Location,
        });
        sleep(Duration::from_millis(1400)).await;
        assert!(drain(&mut peer).is_empty(), "nothing before the negotiation delay");

        sleep(Duration::from_millis(200)).await;
        let frames = drain(&mut peer);
        assert_eq!(frames.len(), 2);
        assert!(matches!(
            &frames[0].payload,
            Payload::Telemetry(TelemetryMessage::PermissionGranted(m))
                if m.permission == PermissionKind::Location
        ));
        assert_eq!(
            frames[1].payload,
            Payload::Control(ControlMessage::PermissionResponse {
                request_id,
                permission: PermissionKind::Location,
                granted: true,
            })
        );
        assert!(negotiator.status().location);
        assert_eq!(
            changes.try_recv().unwrap(),
            PermissionChange {
                kind: PermissionKind::Location,
                granted: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_prompt_failure_answers_false() {
        let (session, mut peer) = connected(Role::Child).await;
        let mut provider = MockCapabilityProvider::new();
        provider
            .expect_request_permission()
            .returning(|_| Err(CapabilityError::Unavailable("prompt dismissed".to_string())));
        let negotiator = negotiator(session, provider);

        negotiator.handle_control(ControlMessage::PermissionRequest {
            request_id: Uuid::new_v4(),
            permission: PermissionKind::Camera,
        });
        sleep(Duration::from_millis(1600)).await;

        let frames = drain(&mut peer);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            frames[0].payload,
            Payload::Control(ControlMessage::PermissionResponse { granted: false, .. })
        ));
        assert!(!negotiator.status().camera);
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_disconnect_during_delay_skips_the_prompt() {
        let (session, _peer) = connected(Role::Child).await;
        let mut provider = MockCapabilityProvider::new();
        provider.expect_request_permission().times(0);
        let negotiator = negotiator(session.clone(), provider);

        negotiator.handle_control(ControlMessage::PermissionRequest {
            request_id: Uuid::new_v4(),
            permission: PermissionKind::Gallery,
        });
        settle().await;
        session.disconnect();
        sleep(Duration::from_secs(2)).await;

        assert!(!negotiator.status().gallery);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_revocation_is_applied_and_broadcast() {
        let (events_tx, _) = broadcast::channel(8);
        let subscribe_tx = events_tx.clone();
        let mut provider = MockCapabilityProvider::new();
        provider
            .expect_subscribe()
            .returning(move || subscribe_tx.subscribe());
        let (session, _peer) = connected(Role::Child).await;
        let negotiator = negotiator(session, provider);
        negotiator.apply(PermissionKind::Location, true);
        let mut changes = negotiator.subscribe_changes();
        let shutdown = CancellationToken::new();
        negotiator.watch_provider(shutdown.clone());

        events_tx
            .send(CapabilityEvent::PermissionChanged {
                kind: PermissionKind::Location,
                granted: false,
            })
            .unwrap();
        settle().await;

        assert!(!negotiator.status().location);
        assert_eq!(
            changes.try_recv().unwrap(),
            PermissionChange {
                kind: PermissionKind::Location,
                granted: false
            }
        );
        shutdown.cancel();
    }

    #[test]
    fn test_apply_reports_only_real_changes() {
        let session = PairingSession::new(Arc::new(
            ScriptedTransport::default(),
        ));
        let negotiator = negotiator(session, MockCapabilityProvider::new());
        let mut changes = negotiator.subscribe_changes();

        assert!(negotiator.apply(PermissionKind::Camera, true));
        assert!(!negotiator.apply(PermissionKind::Camera, true));

        assert!(changes.try_recv().is_ok());
        assert!(changes.try_recv().is_err());
    }
}
