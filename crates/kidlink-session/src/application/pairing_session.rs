//! PairingSession: the connection state machine shared by both roles.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//!           begin(role, code)            channel ready
//!   Idle ───────────────────► Connecting ─────────────► Connected
//!                                  │                        │
//!                                  │ transport error /      │ disconnect() /
//!                                  │ disconnect()           │ peer closed
//!                                  ▼                        ▼
//!                             Disconnected ◄────────────────┘
//!                                  │
//!                                  └── begin(role, code) starts a new cycle
//! ```
//!
//! Every `begin` starts a new *cycle*.  A cycle owns its channel, its outbound
//! sequence counter, and a [`CancellationToken`] that every timer and
//! background task of that cycle watches.  Tearing the cycle down cancels the
//! token, so nothing scheduled by an old cycle can act on a new one.
//!
//! # Callback ordering
//!
//! Observer callbacks (state changes and inbound messages) are never invoked
//! from the caller's stack.  They are queued on one event channel and drained
//! by a single dispatch task per session, so observers see events strictly in
//! the order they happened, one at a time.
//!
//! On the parent, inbound telemetry is pushed into the [`ReceiveBuffer`] and
//! the mirrored child permissions are updated *before* observers run, so an
//! observer reading [`PairingSession::received`] always sees the message it
//! was just handed.

use std::sync::{Arc, Mutex, Weak};

use kidlink_core::{
    decode_frame, encode_frame,
    protocol::{messages::Command, SequenceCheck, SequenceCounter, SequenceTracker},
    CodecError, ConnectionState, ControlMessage, Frame, PairingCode, PairingCodeError, Payload,
    PermissionKind, PermissionSet, ReceiveBuffer, Role, TelemetryMessage, UnknownPermissionKind,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::sync::lock;
use super::transport::{ChannelSender, ConnectedChannel, Transport, TransportError};

/// Error type for session operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The pairing code is not exactly six ASCII digits.
    #[error(transparent)]
    InvalidCodeFormat(#[from] PairingCodeError),

    /// The operation needs an established channel.
    #[error("session is not connected")]
    NotConnected,

    /// The operation is reserved for the other role.
    #[error("{operation} is not allowed on the {role} device")]
    RoleViolation { operation: &'static str, role: Role },

    /// The permission name is not one of the five known kinds.
    #[error(transparent)]
    UnknownPermissionKind(#[from] UnknownPermissionKind),

    /// The frame could not be serialised.
    #[error("frame encoding failed: {0}")]
    Codec(#[from] CodecError),

    /// The channel rejected the frame.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Snapshot of the session for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Role of the current (or most recent) cycle; `None` before the first `begin`.
    pub role: Option<Role>,
    pub pairing_code: Option<PairingCode>,
    /// Frames sent in the current cycle.
    pub frames_sent: u64,
}

type StateObserver = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type MessageObserver = Arc<dyn Fn(&Payload) + Send + Sync>;

#[derive(Default)]
struct Observers {
    state: Vec<StateObserver>,
    message: Vec<MessageObserver>,
}

enum SessionEvent {
    State(ConnectionState),
    Inbound { generation: u64, payload: Payload },
}

struct Cycle {
    role: Role,
    code: PairingCode,
    sender: Option<ChannelSender>,
    sequence: SequenceCounter,
    cancel: CancellationToken,
}

struct SessionState {
    state: ConnectionState,
    generation: u64,
    cycle: Option<Cycle>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    observers: Mutex<Observers>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Receiving half of `events`, taken by the dispatch task on first `begin`.
    pending_events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    received: Mutex<ReceiveBuffer>,
    remote_permissions: Mutex<PermissionSet>,
}

/// Handle to one device's pairing session.
///
/// Cloning the handle is cheap; all clones drive the same session.  Methods
/// that start background work (`begin`) must be called from inside a Tokio
/// runtime.
#[derive(Clone)]
pub struct PairingSession {
    inner: Arc<Inner>,
}

/// Non-owning handle, for callbacks that must not keep the session alive.
#[derive(Clone)]
pub struct WeakPairingSession {
    inner: Weak<Inner>,
}

impl WeakPairingSession {
    pub fn upgrade(&self) -> Option<PairingSession> {
        self.inner.upgrade().map(|inner| PairingSession { inner })
    }
}

impl PairingSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events, pending) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                transport,
                state: Mutex::new(SessionState {
                    state: ConnectionState::Idle,
                    generation: 0,
                    cycle: None,
                }),
                observers: Mutex::new(Observers::default()),
                events,
                pending_events: Mutex::new(Some(pending)),
                received: Mutex::new(ReceiveBuffer::new()),
                remote_permissions: Mutex::new(PermissionSet::new()),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakPairingSession {
        WeakPairingSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts a new cycle: validates `code`, moves to `Connecting`, and asks
    /// the transport for a channel in the background.
    ///
    /// Calling `begin` on an active session disconnects the current cycle
    /// first.  An invalid code is rejected before anything else happens, so
    /// an existing cycle is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidCodeFormat`] if `code` is not exactly six
    /// ASCII digits.
    pub fn begin(&self, role: Role, code: &str) -> Result<(), SessionError> {
        let code = PairingCode::parse(code)?;
        self.start_dispatcher();

        let (generation, cancel) = {
            let mut st = lock(&self.inner.state);
            if st.state.is_active() {
                info!("begin on an active session, closing the current cycle first");
                self.inner.teardown_locked(&mut st, "superseded by a new begin");
            }
            st.generation += 1;
            let cancel = CancellationToken::new();
            st.cycle = Some(Cycle {
                role,
                code: code.clone(),
                sender: None,
                sequence: SequenceCounter::new(),
                cancel: cancel.clone(),
            });
            lock(&self.inner.received).clear();
            *lock(&self.inner.remote_permissions) = PermissionSet::new();
            self.inner.transition_locked(&mut st, ConnectionState::Connecting);
            (st.generation, cancel)
        };

        info!(%role, %code, "pairing session connecting");

        let weak = Arc::downgrade(&self.inner);
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = transport.connect(&code, role) => result,
            };
            let Some(inner) = weak.upgrade() else { return };
            match result {
                Ok(channel) => inner.establish(generation, channel),
                Err(e) => {
                    warn!(error = %e, %code, "transport could not connect");
                    inner.fail(generation, "transport error");
                }
            }
        });

        Ok(())
    }

    /// Tears the current cycle down.
    ///
    /// Safe to call at any time: while connecting (the pending connection is
    /// abandoned), while connected, or repeatedly.  Observers hear
    /// `Disconnected` exactly once per cycle.
    pub fn disconnect(&self) {
        let mut st = lock(&self.inner.state);
        if st.state.is_active() {
            self.inner.teardown_locked(&mut st, "disconnect requested");
        } else {
            debug!(state = ?st.state, "disconnect on an inactive session ignored");
        }
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Frames `payload` with the next sequence number and hands it to the
    /// channel.
    ///
    /// # Errors
    ///
    /// - [`SessionError::RoleViolation`] if this role may not send that
    ///   kind of payload (telemetry is child-only, commands parent-only).
    /// - [`SessionError::NotConnected`] outside the `Connected` state.
    /// - [`SessionError::Transport`] if the peer already closed the channel.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<(), SessionError> {
        let payload = payload.into();
        let st = lock(&self.inner.state);
        let Some(cycle) = st.cycle.as_ref() else {
            return Err(SessionError::NotConnected);
        };
        check_direction(cycle.role, &payload)?;
        let sender = match (&st.state, cycle.sender.as_ref()) {
            (ConnectionState::Connected, Some(sender)) => sender,
            _ => return Err(SessionError::NotConnected),
        };

        let frame = Frame {
            sequence: cycle.sequence.next(),
            payload,
        };
        let bytes = encode_frame(&frame)?;
        sender.send(bytes)?;
        trace!(sequence = frame.sequence, payload = %frame.payload.describe(), "frame sent");
        Ok(())
    }

    /// Sends a command to the child.  Parent only.
    ///
    /// The command name is not validated here; the child ignores names it
    /// does not recognise.
    pub fn send_command(&self, command: &str, params: Map<String, Value>) -> Result<(), SessionError> {
        self.send(Command::new(command, params))
    }

    // ── Observers ─────────────────────────────────────────────────────────────

    /// Registers a callback invoked on every state transition.
    pub fn on_connection_state_changed<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        lock(&self.inner.observers).state.push(Arc::new(handler));
    }

    /// Registers a callback invoked for every accepted inbound payload.
    pub fn on_message_received<F>(&self, handler: F)
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        lock(&self.inner.observers).message.push(Arc::new(handler));
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.state).state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Role of the current (or most recent) cycle.
    pub fn role(&self) -> Option<Role> {
        lock(&self.inner.state).cycle.as_ref().map(|c| c.role)
    }

    pub fn pairing_code(&self) -> Option<PairingCode> {
        lock(&self.inner.state).cycle.as_ref().map(|c| c.code.clone())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let st = lock(&self.inner.state);
        ConnectionStatus {
            state: st.state,
            role: st.cycle.as_ref().map(|c| c.role),
            pairing_code: st.cycle.as_ref().map(|c| c.code.clone()),
            frames_sent: st.cycle.as_ref().map_or(0, |c| c.sequence.issued()),
        }
    }

    /// Telemetry received from the child, newest first (parent only; empty on
    /// the child).
    pub fn received(&self) -> Vec<TelemetryMessage> {
        lock(&self.inner.received).snapshot()
    }

    /// The child's permissions as last reported over the wire.
    pub fn remote_permissions(&self) -> PermissionSet {
        *lock(&self.inner.remote_permissions)
    }

    /// A token cancelled when the current cycle ends.  `None` if no cycle is
    /// active.  Timers owned by a cycle (negotiation waits, streaming ticks)
    /// select on this token.
    pub fn cycle_token(&self) -> Option<CancellationToken> {
        let st = lock(&self.inner.state);
        if !st.state.is_active() {
            return None;
        }
        st.cycle.as_ref().map(|c| c.cancel.child_token())
    }

    fn start_dispatcher(&self) {
        let Some(rx) = lock(&self.inner.pending_events).take() else {
            return;
        };
        tokio::spawn(dispatch_loop(Arc::downgrade(&self.inner), rx));
    }
}

impl Inner {
    fn transition_locked(&self, st: &mut SessionState, next: ConnectionState) -> bool {
        if !st.state.can_transition_to(next) {
            warn!(from = ?st.state, to = ?next, "illegal state transition ignored");
            return false;
        }
        debug!(from = ?st.state, to = ?next, generation = st.generation, "session state change");
        st.state = next;
        // Receiver outlives `self`.
        let _ = self.events.send(SessionEvent::State(next));
        true
    }

    fn teardown_locked(&self, st: &mut SessionState, reason: &str) {
        if let Some(cycle) = st.cycle.as_mut() {
            cycle.cancel.cancel();
            if let Some(sender) = cycle.sender.take() {
                sender.close();
            }
        }
        if self.transition_locked(st, ConnectionState::Disconnected) {
            info!(reason, "pairing session disconnected");
        }
    }

    fn establish(self: &Arc<Self>, generation: u64, channel: ConnectedChannel) {
        let mut st = lock(&self.state);
        if st.generation != generation || st.state != ConnectionState::Connecting {
            debug!(generation, "discarding channel for a superseded cycle");
            channel.close();
            return;
        }
        let (sender, receiver) = channel.into_parts();
        let Some(cycle) = st.cycle.as_mut() else {
            return;
        };
        cycle.sender = Some(sender);
        let cancel = cycle.cancel.clone();
        let role = cycle.role;
        self.transition_locked(&mut st, ConnectionState::Connected);
        drop(st);

        info!(%role, "pairing session connected");
        tokio::spawn(read_loop(Arc::downgrade(self), generation, receiver, cancel));
    }

    fn fail(&self, generation: u64, reason: &str) {
        let mut st = lock(&self.state);
        if st.generation == generation && st.state.is_active() {
            self.teardown_locked(&mut st, reason);
        }
    }

    fn deliver(&self, event: SessionEvent) {
        match event {
            SessionEvent::State(state) => {
                let observers = lock(&self.observers).state.clone();
                for observer in observers {
                    observer(state);
                }
            }
            SessionEvent::Inbound {
                generation,
                payload,
            } => {
                {
                    let st = lock(&self.state);
                    if st.generation != generation || !st.state.is_connected() {
                        debug!(payload = %payload.describe(), "dropping message that arrived after teardown");
                        return;
                    }
                    let is_parent = st.cycle.as_ref().map(|c| c.role) == Some(Role::Parent);
                    if let (true, Payload::Telemetry(message)) = (is_parent, &payload) {
                        mirror_permissions(&mut lock(&self.remote_permissions), message);
                        if let Some(evicted) = lock(&self.received).push(message.clone()) {
                            trace!(evicted = evicted.type_tag(), "receive buffer full, oldest message evicted");
                        }
                    }
                }
                let observers = lock(&self.observers).message.clone();
                for observer in observers {
                    observer(&payload);
                }
            }
        }
    }
}

async fn dispatch_loop(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        inner.deliver(event);
    }
    debug!("session dispatch task finished");
}

async fn read_loop(
    inner: Weak<Inner>,
    generation: u64,
    mut receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) {
    let mut tracker = SequenceTracker::new();
    loop {
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = receiver.recv() => match next {
                Some(bytes) => bytes,
                None => break,
            },
        };

        let frame = match decode_frame(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, len = bytes.len(), "dropping undecodable frame");
                continue;
            }
        };

        match tracker.observe(frame.sequence) {
            SequenceCheck::Duplicate => {
                debug!(sequence = frame.sequence, "dropping duplicate frame");
                continue;
            }
            SequenceCheck::Gap { missing } => {
                warn!(sequence = frame.sequence, missing, "sequence gap detected");
            }
            SequenceCheck::InOrder => {}
        }

        let Some(inner) = inner.upgrade() else { return };
        trace!(sequence = frame.sequence, payload = %frame.payload.describe(), "frame received");
        let _ = inner.events.send(SessionEvent::Inbound {
            generation,
            payload: frame.payload,
        });
    }

    if let Some(inner) = inner.upgrade() {
        inner.fail(generation, "peer closed the channel");
    }
}

/// Enforces who may send what: telemetry and permission responses flow from
/// the child, commands and permission requests from the parent.
fn check_direction(role: Role, payload: &Payload) -> Result<(), SessionError> {
    let operation = match (role, payload) {
        (Role::Parent, Payload::Telemetry(_)) => "sending telemetry",
        (Role::Parent, Payload::Control(ControlMessage::PermissionResponse { .. })) => {
            "answering a permission request"
        }
        (Role::Child, Payload::Command(_)) => "sending a command",
        (Role::Child, Payload::Control(ControlMessage::PermissionRequest { .. })) => {
            "requesting a permission"
        }
        _ => return Ok(()),
    };
    Err(SessionError::RoleViolation { operation, role })
}

fn mirror_permissions(set: &mut PermissionSet, message: &TelemetryMessage) {
    match message {
        TelemetryMessage::ComprehensiveUpdate(update) => *set = update.permissions,
        TelemetryMessage::PermissionUpdate(update) => {
            set.set(update.permission.kind, update.permission.granted);
        }
        TelemetryMessage::PermissionGranted(granted) => {
            set.set(granted.permission, true);
        }
        _ => {}
    }
}

/// Parses a permission name from the UI, for callers that accept strings.
pub(crate) fn parse_permission(name: &str) -> Result<PermissionKind, SessionError> {
    Ok(name.parse::<PermissionKind>()?)
}
