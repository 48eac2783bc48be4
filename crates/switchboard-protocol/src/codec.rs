//! Encoding and decoding of event envelopes.
//!
//! Text messages carry JSON. Binary messages carry MessagePack with named
//! fields, so both encodings describe the same envelope.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum encoded message size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encoding used on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    #[default]
    Json,
    MessagePack,
}

/// A single transport-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
}

impl WireMessage {
    /// The encoding this message uses.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        match self {
            WireMessage::Text(_) => Encoding::Json,
            WireMessage::Binary(_) => Encoding::MessagePack,
        }
    }

    /// Size of the message body in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireMessage::Text(text) => text.len(),
            WireMessage::Binary(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a value as a wire message.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode<T: Serialize>(value: &T, encoding: Encoding) -> Result<WireMessage, ProtocolError> {
    let message = match encoding {
        Encoding::Json => WireMessage::Text(serde_json::to_string(value)?),
        Encoding::MessagePack => WireMessage::Binary(Bytes::from(rmp_serde::to_vec_named(value)?)),
    };

    if message.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(message.len()));
    }

    Ok(message)
}

/// Decode a wire message.
///
/// # Errors
///
/// Returns an error if the message is too large or does not describe a `T`.
pub fn decode<T: DeserializeOwned>(message: &WireMessage) -> Result<T, ProtocolError> {
    if message.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(message.len()));
    }

    match message {
        WireMessage::Text(text) => Ok(serde_json::from_str(text)?),
        WireMessage::Binary(data) => Ok(rmp_serde::from_slice(data)?),
    }
}

#[derive(Deserialize)]
struct EnvelopeName {
    event: String,
}

/// Read just the event name of an envelope, ignoring its payload.
///
/// Useful when the full envelope failed to decode. Returns `None` if the
/// message is not an envelope at all.
#[must_use]
pub fn event_name(message: &WireMessage) -> Option<String> {
    decode::<EnvelopeName>(message).ok().map(|envelope| envelope.event)
}
