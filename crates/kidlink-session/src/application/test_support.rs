//! Shared test doubles for the application layer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kidlink_core::{decode_frame, encode_frame, Frame, PairingCode, Payload, Role};
use tokio::time::sleep;

use super::pairing_session::PairingSession;
use super::transport::{ConnectedChannel, Transport, TransportError};

/// Transport that connects after `delay` and keeps the far end of every
/// channel so tests can play the peer.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    pub delay: Duration,
    pub fail_with: Option<TransportError>,
    pub peers: Mutex<Vec<ConnectedChannel>>,
}

impl ScriptedTransport {
    pub fn take_peer(&self) -> ConnectedChannel {
        self.peers.lock().unwrap().remove(0)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(
        &self,
        _code: &PairingCode,
        _role: Role,
    ) -> Result<ConnectedChannel, TransportError> {
        sleep(self.delay).await;
        if let Some(e) = &self.fail_with {
            return Err(e.clone());
        }
        let (mine, theirs) = ConnectedChannel::pair();
        self.peers.lock().unwrap().push(theirs);
        Ok(mine)
    }
}

/// Lets spawned tasks run until they block, advancing the paused clock by 1 ms.
pub(crate) async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

/// A session already connected in `role`, plus the peer's end of the channel.
pub(crate) async fn connected(role: Role) -> (PairingSession, ConnectedChannel) {
    let transport = Arc::new(ScriptedTransport::default());
    let session = PairingSession::new(transport.clone());
    session.begin(role, "123456").unwrap();
    settle().await;
    assert!(session.is_connected());
    (session, transport.take_peer())
}

pub(crate) fn frame_bytes(sequence: u64, payload: impl Into<Payload>) -> Vec<u8> {
    encode_frame(&Frame {
        sequence,
        payload: payload.into(),
    })
    .unwrap()
}

/// Drains every frame currently queued on `peer`.
pub(crate) fn drain(peer: &mut ConnectedChannel) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(bytes) = peer.try_recv() {
        frames.push(decode_frame(&bytes).unwrap());
    }
    frames
}
