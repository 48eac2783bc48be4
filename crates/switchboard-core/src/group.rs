//! Broadcast groups.
//!
//! Groups are never stored. They name a set of connections that the
//! [`Registry`](crate::Registry) resolves from its indices at routing time.

use std::fmt;
use switchboard_protocol::OpaqueId;

/// A device identity. Device IDs are only unique within their account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub account: OpaqueId,
    pub device: OpaqueId,
}

impl DeviceKey {
    #[must_use]
    pub fn new(account: impl Into<OpaqueId>, device: impl Into<OpaqueId>) -> Self {
        Self {
            account: account.into(),
            device: device.into(),
        }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.device)
    }
}

/// A routing destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    /// Every operator connection bound to the account.
    Operators(OpaqueId),
    /// The connection bound to a device.
    Device(DeviceKey),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Operators(account) => write!(f, "operators:{account}"),
            Group::Device(key) => write!(f, "device:{key}"),
        }
    }
}
