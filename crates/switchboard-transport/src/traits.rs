//! Transport abstraction traits for Switchboard.

use async_trait::async_trait;
use switchboard_protocol::{ConnectionId, ProtocolError, WireMessage};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// An active connection over a transport.
///
/// Each received message is one complete event envelope. A text message
/// carries JSON and a binary message carries MessagePack.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Receive the next message from the peer.
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError>;

    /// Send a message to the peer.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Close the connection, optionally telling the peer why.
    async fn close(&mut self, reason: Option<String>) -> Result<(), TransportError>;

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }

    /// Check if the connection is still open.
    fn is_open(&self) -> bool;
}
