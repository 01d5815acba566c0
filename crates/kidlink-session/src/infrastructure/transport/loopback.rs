//! In-process loopback transport.
//!
//! Devices created with clones of the same [`LoopbackTransport`] meet through a
//! shared rendezvous table keyed by pairing code:
//!
//! 1. The first device to present a code waits in the table.
//! 2. When a device with the *other* role presents the same code, a channel
//!    pair is created and one end is handed to each side.
//! 3. Both sides then wait the handshake delay before reporting the channel,
//!    which models the latency of a real relay handshake.
//!
//! A second device with the *same* role on a waiting code is refused with
//! [`TransportError::PairingCodeMismatch`].  A device nobody joins within the
//! pairing timeout gets [`TransportError::PairingTimeout`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kidlink_core::{PairingCode, Role};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tracing::{debug, info};

use crate::application::transport::{ConnectedChannel, Transport, TransportError};
use crate::sync::lock;

/// Timing of the loopback rendezvous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackConfig {
    /// Delay between two peers meeting and each of them seeing the channel.
    pub handshake_delay: Duration,
    /// How long the first device waits for a peer.
    pub pairing_timeout: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::from_millis(2000),
            pairing_timeout: Duration::from_secs(60),
        }
    }
}

struct Waiter {
    role: Role,
    ticket: u64,
    reply: oneshot::Sender<ConnectedChannel>,
}

#[derive(Default)]
struct Rendezvous {
    waiting: HashMap<PairingCode, Waiter>,
    next_ticket: u64,
}

enum Joined {
    Paired(ConnectedChannel),
    Waiting {
        ticket: u64,
        reply: oneshot::Receiver<ConnectedChannel>,
    },
}

/// Shared in-memory rendezvous.  Clone it to give several devices access to
/// the same table.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    config: LoopbackConfig,
    rendezvous: Arc<Mutex<Rendezvous>>,
}

impl LoopbackTransport {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            rendezvous: Arc::default(),
        }
    }

    /// Number of devices currently waiting for a peer.
    pub fn waiting(&self) -> usize {
        lock(&self.rendezvous)
            .waiting
            .values()
            .filter(|w| !w.reply.is_closed())
            .count()
    }

    fn join(&self, code: &PairingCode, role: Role) -> Result<Joined, TransportError> {
        let mut rv = lock(&self.rendezvous);
        match rv.waiting.remove(code) {
            Some(waiter) if waiter.reply.is_closed() => {
                debug!(%code, "discarding abandoned waiter");
            }
            Some(waiter) if waiter.role == role => {
                rv.waiting.insert(code.clone(), waiter);
                return Err(TransportError::PairingCodeMismatch {
                    code: code.clone(),
                    role,
                });
            }
            Some(waiter) => {
                let (mine, theirs) = ConnectedChannel::pair();
                if waiter.reply.send(theirs).is_ok() {
                    info!(%code, %role, peer = %waiter.role, "loopback peers paired");
                    return Ok(Joined::Paired(mine));
                }
                debug!(%code, "waiter left while pairing");
            }
            None => {}
        }

        rv.next_ticket += 1;
        let ticket = rv.next_ticket;
        let (tx, rx) = oneshot::channel();
        rv.waiting.insert(
            code.clone(),
            Waiter {
                role,
                ticket,
                reply: tx,
            },
        );
        debug!(%code, %role, "waiting for peer");
        Ok(Joined::Waiting { ticket, reply: rx })
    }

    fn forget(&self, code: &PairingCode, ticket: u64) {
        let mut rv = lock(&self.rendezvous);
        if rv.waiting.get(code).map(|w| w.ticket) == Some(ticket) {
            rv.waiting.remove(code);
        }
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(
        &self,
        code: &PairingCode,
        role: Role,
    ) -> Result<ConnectedChannel, TransportError> {
        let channel = match self.join(code, role)? {
            Joined::Paired(channel) => channel,
            Joined::Waiting { ticket, reply } => {
                match timeout(self.config.pairing_timeout, reply).await {
                    Ok(Ok(channel)) => channel,
                    Ok(Err(_)) => return Err(TransportError::Closed),
                    Err(_) => {
                        self.forget(code, ticket);
                        return Err(TransportError::PairingTimeout { code: code.clone() });
                    }
                }
            }
        };
        sleep(self.config.handshake_delay).await;
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(s: &str) -> PairingCode {
        PairingCode::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_and_child_pair_after_handshake_delay() {
        let transport = LoopbackTransport::default();
        let start = tokio::time::Instant::now();

        let parent = tokio::spawn({
            let t = transport.clone();
            async move { t.connect(&code("123456"), Role::Parent).await }
        });
        let child = tokio::spawn({
            let t = transport.clone();
            async move { t.connect(&code("123456"), Role::Child).await }
        });

        let mut parent = parent.await.unwrap().unwrap();
        let mut child = child.await.unwrap().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(2000));

        parent.send(b"hello".to_vec()).unwrap();
        child.send(b"hi".to_vec()).unwrap();
        assert_eq!(child.recv().await, Some(b"hello".to_vec()));
        assert_eq!(parent.recv().await, Some(b"hi".to_vec()));
        assert_eq!(transport.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_role_on_same_code_is_refused() {
        let transport = LoopbackTransport::default();
        let first = tokio::spawn({
            let t = transport.clone();
            async move { t.connect(&code("111111"), Role::Parent).await }
        });
        tokio::task::yield_now().await;

        let second = transport.connect(&code("111111"), Role::Parent).await;

        assert!(matches!(
            second,
            Err(TransportError::PairingCodeMismatch { role: Role::Parent, .. })
        ));
        assert_eq!(transport.waiting(), 1);
        first.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lonely_device_times_out() {
        let transport = LoopbackTransport::new(LoopbackConfig {
            handshake_delay: Duration::from_millis(10),
            pairing_timeout: Duration::from_secs(5),
        });

        let result = transport.connect(&code("222222"), Role::Child).await;

        assert_eq!(
            result.unwrap_err(),
            TransportError::PairingTimeout {
                code: code("222222")
            }
        );
        assert_eq!(transport.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_codes_do_not_pair() {
        let transport = LoopbackTransport::new(LoopbackConfig {
            handshake_delay: Duration::ZERO,
            pairing_timeout: Duration::from_secs(1),
        });
        let parent = tokio::spawn({
            let t = transport.clone();
            async move { t.connect(&code("333333"), Role::Parent).await }
        });
        let child = transport.connect(&code("444444"), Role::Child).await;

        assert!(matches!(child, Err(TransportError::PairingTimeout { .. })));
        assert!(matches!(
            parent.await.unwrap(),
            Err(TransportError::PairingTimeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_waiter_is_replaced() {
        let transport = LoopbackTransport::default();
        let abandoned = tokio::spawn({
            let t = transport.clone();
            async move { t.connect(&code("555555"), Role::Parent).await }
        });
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        // The child takes the abandoned slot and waits; a fresh parent pairs.
        let child = tokio::spawn({
            let t = transport.clone();
            async move { t.connect(&code("555555"), Role::Child).await }
        });
        tokio::task::yield_now().await;
        let parent = transport.connect(&code("555555"), Role::Parent).await;

        assert!(parent.is_ok());
        assert!(child.await.unwrap().is_ok());
    }
}
