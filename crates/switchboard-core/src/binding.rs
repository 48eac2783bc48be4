//! Identity bindings.
//!
//! A binding ties a transport connection to the logical identity it
//! announced: an operator account, or a device owned by an account.

use crate::group::DeviceKey;
use std::time::Duration;
use switchboard_protocol::{ConnectionId, OpaqueId, PeerKind};
use tokio::time::Instant;

/// A dashboard session bound to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorBinding {
    pub account: OpaqueId,
    pub connection_id: ConnectionId,
}

/// Liveness of a device binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Stale,
}

/// A calling device bound to an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBinding {
    pub account: OpaqueId,
    pub device: OpaqueId,
    pub connection_id: ConnectionId,
    /// When the device announced itself.
    pub bound_at: Instant,
    /// Last announce or heartbeat.
    pub last_seen: Instant,
}

impl DeviceBinding {
    /// Create a binding seen at `now`.
    #[must_use]
    pub fn new(key: DeviceKey, connection_id: ConnectionId, now: Instant) -> Self {
        Self {
            account: key.account,
            device: key.device,
            connection_id,
            bound_at: now,
            last_seen: now,
        }
    }

    /// The identity this binding holds.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.account.clone(), self.device.clone())
    }

    /// Record a liveness signal.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// A binding is stale once strictly more than `timeout` has passed since
    /// it was last seen.
    #[must_use]
    pub fn liveness(&self, now: Instant, timeout: Duration) -> Liveness {
        if now.saturating_duration_since(self.last_seen) > timeout {
            Liveness::Stale
        } else {
            Liveness::Alive
        }
    }
}

/// The identity a connection holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Operator(OperatorBinding),
    Device(DeviceBinding),
}

impl Binding {
    #[must_use]
    pub fn kind(&self) -> PeerKind {
        match self {
            Binding::Operator(_) => PeerKind::Operator,
            Binding::Device(_) => PeerKind::Device,
        }
    }

    /// Account the connection belongs to.
    #[must_use]
    pub fn account(&self) -> &OpaqueId {
        match self {
            Binding::Operator(op) => &op.account,
            Binding::Device(dev) => &dev.account,
        }
    }

    #[must_use]
    pub fn as_device(&self) -> Option<&DeviceBinding> {
        match self {
            Binding::Device(dev) => Some(dev),
            Binding::Operator(_) => None,
        }
    }
}
