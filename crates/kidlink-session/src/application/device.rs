//! Device: one device's session plus the use cases wired to it.
//!
//! Each device owns its own session, negotiator, streamer and dispatcher;
//! there is no process-wide state, so a parent and a child can run side by
//! side in one process (the monitor demo and the integration tests do).
//!
//! # Wiring
//!
//! ```text
//!   PairingSession ── state: Connected (child) ──► TelemetryStreamer::start
//!                  ── state: Disconnected ──────► TelemetryStreamer::stop
//!                  ── message: control ─────────► PermissionNegotiator::handle_control
//!                  ── message: command ─────────► command queue ─► CommandDispatcher::handle
//! ```
//!
//! Commands are queued and executed one at a time, in arrival order.
//! Observers hold weak references only, so dropping the `Device` frees
//! everything.

use std::sync::{Arc, Weak};

use kidlink_core::{
    protocol::messages::Command, ConnectionState, Payload, PermissionSet, Role, TelemetryMessage,
};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::capability::CapabilityProvider;
use super::config::SessionConfig;
use super::dispatch_command::CommandDispatcher;
use super::negotiate_permission::PermissionNegotiator;
use super::pairing_session::{ConnectionStatus, PairingSession, SessionError, WeakPairingSession};
use super::stream_telemetry::{TelemetrySink, TelemetryStreamer};
use super::transport::Transport;

pub struct Device {
    session: PairingSession,
    provider: Arc<dyn CapabilityProvider>,
    negotiator: Arc<PermissionNegotiator>,
    streamer: Arc<TelemetryStreamer>,
    dispatcher: Arc<CommandDispatcher>,
    shutdown: CancellationToken,
}

impl Device {
    /// Builds and wires a device.  Must be called from inside a Tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        provider: Arc<dyn CapabilityProvider>,
        config: SessionConfig,
    ) -> Self {
        let session = PairingSession::new(transport);
        let negotiator = Arc::new(PermissionNegotiator::new(
            session.clone(),
            Arc::clone(&provider),
            &config,
        ));
        let streamer = Arc::new(TelemetryStreamer::new(
            Arc::clone(&provider),
            Arc::clone(&negotiator),
            &config,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(session.clone(), Arc::clone(&provider)));
        let shutdown = CancellationToken::new();

        negotiator.watch_provider(shutdown.clone());

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(command_loop(
            Arc::downgrade(&dispatcher),
            commands_rx,
            shutdown.clone(),
        ));

        let weak_streamer = Arc::downgrade(&streamer);
        let weak_session = session.downgrade();
        session.on_connection_state_changed(move |state| {
            let Some(streamer) = weak_streamer.upgrade() else {
                return;
            };
            match state {
                ConnectionState::Connected => {
                    let Some(session) = weak_session.upgrade() else {
                        return;
                    };
                    if session.role() == Some(Role::Child) {
                        streamer.start(telemetry_sink(session.downgrade()));
                    }
                }
                ConnectionState::Disconnected => streamer.stop(),
                ConnectionState::Idle | ConnectionState::Connecting => {}
            }
        });

        let weak_negotiator = Arc::downgrade(&negotiator);
        session.on_message_received(move |payload| match payload {
            Payload::Control(message) => {
                if let Some(negotiator) = weak_negotiator.upgrade() {
                    negotiator.handle_control(message.clone());
                }
            }
            Payload::Command(command) => {
                if commands_tx.send(command.clone()).is_err() {
                    debug!(command = %command.command, "command queue closed, command dropped");
                }
            }
            Payload::Telemetry(message) => {
                trace!(kind = message.type_tag(), "telemetry received");
            }
        });

        Self {
            session,
            provider,
            negotiator,
            streamer,
            dispatcher,
            shutdown,
        }
    }

    /// See [`PairingSession::begin`].
    pub fn begin(&self, role: Role, code: &str) -> Result<(), SessionError> {
        self.session.begin(role, code)
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Parent only.  See [`PermissionNegotiator::request_permission`].
    pub async fn request_permission(&self, kind: &str) -> Result<bool, SessionError> {
        self.negotiator.request_permission(kind).await
    }

    /// Parent only.  See [`PairingSession::send_command`].
    pub fn send_command(&self, command: &str, params: Map<String, Value>) -> Result<(), SessionError> {
        self.session.send_command(command, params)
    }

    pub fn permission_status(&self) -> PermissionSet {
        self.negotiator.status()
    }

    pub fn received(&self) -> Vec<TelemetryMessage> {
        self.session.received()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.session.connection_status()
    }

    pub fn session(&self) -> &PairingSession {
        &self.session
    }

    pub fn negotiator(&self) -> &Arc<PermissionNegotiator> {
        &self.negotiator
    }

    pub fn streamer(&self) -> &Arc<TelemetryStreamer> {
        &self.streamer
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Direct access to the device's capabilities.  Errors propagate.
    pub fn capabilities(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.streamer.stop();
        self.session.disconnect();
    }
}

fn telemetry_sink(session: WeakPairingSession) -> TelemetrySink {
    Arc::new(move |message: TelemetryMessage| {
        let Some(session) = session.upgrade() else {
            return;
        };
        let kind = message.type_tag();
        if let Err(e) = session.send(message) {
            debug!(kind, error = %e, "telemetry not sent");
        }
    })
}

async fn command_loop(
    dispatcher: Weak<CommandDispatcher>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = commands.recv() => match next {
                Some(command) => command,
                None => break,
            },
        };
        let Some(dispatcher) = dispatcher.upgrade() else {
            break;
        };
        let outcome = dispatcher.handle(&command).await;
        debug!(command = %command.command, ?outcome, "command handled");
    }
    debug!("command queue stopped");
}
