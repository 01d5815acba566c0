//! The transport seam.
//!
//! A [`Transport`] rendezvous two devices that present the same pairing code
//! with complementary roles and hands each of them one end of a reliable,
//! ordered, bidirectional byte channel.  The session core only ever sees a
//! [`ConnectedChannel`]; whether the bytes travel over a relay server, a LAN
//! socket, or an in-process queue is an infrastructure concern.
//!
//! # Channel model
//!
//! A channel end is a pair of unbounded Tokio `mpsc` queues: frames written
//! with [`ChannelSender::send`] appear, in order, on the peer's receiver.
//! Dropping (or [`ChannelSender::close`]-ing) the sender makes the peer's
//! receiver return `None`, which the peer treats as a disconnect.

use async_trait::async_trait;
use kidlink_core::{PairingCode, Role};
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for transport operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No peer with the complementary role joined within the pairing window.
    #[error("no peer joined pairing code {code} before the timeout")]
    PairingTimeout { code: PairingCode },

    /// Another device with the same role is already waiting on this code.
    #[error("pairing code {code} is already held by another {role} device")]
    PairingCodeMismatch { code: PairingCode, role: Role },

    /// The channel (or the transport itself) has been closed.
    #[error("channel closed")]
    Closed,
}

/// Writing half of a connected channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSender {
    /// Queues one frame for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the peer has dropped its end.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(bytes).map_err(|_| TransportError::Closed)
    }

    /// Closes the writing direction.  The peer sees end-of-stream.
    pub fn close(self) {
        drop(self);
    }
}

/// One end of a paired, bidirectional channel.
#[derive(Debug)]
pub struct ConnectedChannel {
    sender: ChannelSender,
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ConnectedChannel {
    /// Builds two channel ends wired to each other.
    pub fn pair() -> (ConnectedChannel, ConnectedChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            ConnectedChannel {
                sender: ChannelSender { tx: a_tx },
                receiver: b_rx,
            },
            ConnectedChannel {
                sender: ChannelSender { tx: b_tx },
                receiver: a_rx,
            },
        )
    }

    /// Queues one frame for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the peer has dropped its end.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.sender.send(bytes)
    }

    /// Waits for the next inbound frame.  `None` means the peer closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    /// Returns the next inbound frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.try_recv().ok()
    }

    /// Splits the channel so the writer and the reader can live in
    /// different tasks.
    pub fn into_parts(self) -> (ChannelSender, mpsc::UnboundedReceiver<Vec<u8>>) {
        (self.sender, self.receiver)
    }

    /// Closes both directions.
    pub fn close(self) {
        drop(self);
    }
}

/// Rendezvous service pairing a parent and a child on a shared code.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Waits until a peer with the complementary role presents `code`, then
    /// returns this side's end of the channel.
    ///
    /// # Errors
    ///
    /// - [`TransportError::PairingTimeout`] if no peer arrives in time.
    /// - [`TransportError::PairingCodeMismatch`] if the code is already held
    ///   by a device with the same role.
    /// - [`TransportError::Closed`] if the transport shut down while waiting.
    async fn connect(&self, code: &PairingCode, role: Role)
        -> Result<ConnectedChannel, TransportError>;
}
