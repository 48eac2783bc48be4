//! Items placed on a connection's outbound queue.

use std::fmt;
use std::sync::Arc;
use switchboard_protocol::OutboundEvent;

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The device bound to this connection stopped sending heartbeats.
    LivenessTimeout,
    /// The same device announced itself on a newer connection.
    Superseded,
}

impl CloseReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::LivenessTimeout => "liveness timeout",
            CloseReason::Superseded => "superseded by a newer connection",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item for a single connection's outbound queue.
///
/// Events are shared between every recipient of a fan-out.
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Arc<OutboundEvent>),
    Close(CloseReason),
}

impl Delivery {
    /// The event carried by this delivery, if any.
    #[must_use]
    pub fn event(&self) -> Option<&OutboundEvent> {
        match self {
            Delivery::Event(event) => Some(event),
            Delivery::Close(_) => None,
        }
    }
}
