//! WebSocket connections accepted through axum.

use crate::traits::{Connection, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use bytes::Bytes;
use std::net::SocketAddr;
use switchboard_protocol::{ConnectionId, WireMessage};
use tracing::{debug, trace};

/// A WebSocket connection upgraded by axum.
pub struct AxumConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
}

impl AxumConnection {
    /// Wrap an upgraded socket under a freshly generated ID.
    #[must_use]
    pub fn new(socket: WebSocket, remote_addr: Option<SocketAddr>) -> Self {
        Self::with_id(ConnectionId::generate(), socket, remote_addr)
    }

    #[must_use]
    pub fn with_id(id: ConnectionId, socket: WebSocket, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            socket,
            remote_addr,
            is_open: true,
        }
    }
}

#[async_trait]
impl Connection for AxumConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv(&mut self) -> Result<Option<WireMessage>, TransportError> {
        if !self.is_open {
            return Ok(None);
        }

        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(WireMessage::Text(text))),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(WireMessage::Binary(Bytes::from(data))))
                }
                // tungstenite answers pings on the next write or flush.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    trace!(connection = %self.id, "Control frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(
                        connection = %self.id,
                        code = frame.as_ref().map(|f| f.code),
                        "Received close frame"
                    );
                    self.is_open = false;
                    return Ok(None);
                }
                Some(Err(e)) => {
                    self.is_open = false;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open = false;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let message = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.socket.send(message).await.map_err(|e| {
            self.is_open = false;
            TransportError::SendFailed(e.to_string())
        })
    }

    async fn close(&mut self, reason: Option<String>) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        let frame = reason.map(|reason| CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        });
        self.socket
            .send(Message::Close(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
