//! In-memory connections.
//!
//! A [`MemoryConnection`] is the server half of a channel pair; the
//! [`MemoryPeer`] plays the remote dashboard or device.

use crate::traits::{Connection, TransportError};
use async_trait::async_trait;
use switchboard_protocol::{ConnectionId, WireMessage};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 64;

/// What the peer observes from the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFrame {
    Message(WireMessage),
    Close(Option<String>),
}

/// Server half of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    inbound: mpsc::Receiver<WireMessage>,
    outbound: mpsc::Sender<MemoryFrame>,
    is_open: bool,
}

/// Remote half of an in-memory connection.
pub struct MemoryPeer {
    outbound: Option<mpsc::Sender<WireMessage>>,
    inbound: mpsc::Receiver<MemoryFrame>,
}

impl MemoryConnection {
    /// Create a connected pair.
    #[must_use]
    pub fn pair(id: impl Into<ConnectionId>) -> (Self, MemoryPeer) {
        let (peer_tx, server_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (server_tx, peer_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                id: id.into(),
                inbound: server_rx,
                outbound: server_tx,
                is_open: true,
            },
            MemoryPeer {
                outbound: Some(peer_tx),
                inbound: peer_rx,
            },
        )
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }
        let message = self.inbound.recv().await;
        if message.is_none() {
            self.is_open = false;
        }
        Ok(message)
    }

    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }
        self.outbound
            .send(MemoryFrame::Message(message))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self, reason: Option<String>) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;
        self.inbound.close();
        // The peer may already be gone.
        let _ = self.outbound.send(MemoryFrame::Close(reason)).await;
        Ok(())
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

impl MemoryPeer {
    /// Send a message to the server.
    ///
    /// # Errors
    ///
    /// Returns an error once either side has closed.
    pub async fn send(&self, message: WireMessage) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::ConnectionClosed)?;
        outbound
            .send(message)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a JSON text message.
    ///
    /// # Errors
    ///
    /// Returns an error once either side has closed.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(WireMessage::Text(text.into())).await
    }

    /// Next frame from the server, `None` once the server side is dropped.
    pub async fn recv(&mut self) -> Option<MemoryFrame> {
        self.inbound.recv().await
    }

    /// Close the peer's sending half, as a client disconnect would.
    pub fn close(&mut self) {
        self.outbound = None;
    }
}
