//! Connection registry and identity binding.
//!
//! The registry owns every live connection, the binding each one holds, and
//! two derived indices used for routing:
//!
//! - account → operator connections
//! - (account, device) → device connection
//!
//! The indices are updated in the same step as the binding they derive from,
//! so a binding never outlives its connection and an index never names a
//! connection that is gone. The registry is plain data; the
//! [`Router`](crate::Router) serializes access to it.

use crate::binding::{Binding, DeviceBinding, Liveness, OperatorBinding};
use crate::group::{DeviceKey, Group};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use switchboard_protocol::{ConnectionId, OpaqueId, PeerKind};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// An identifier was empty.
    #[error("Blank {0} identifier")]
    BlankIdentity(&'static str),
}

/// Lifecycle state of a registered connection.
///
/// A closed connection is no longer in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Announced(PeerKind),
}

/// Result of binding a connection to an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindOutcome {
    /// The binding this connection held before, now replaced.
    pub previous: Option<Binding>,
    /// Another connection that held the same device identity. It stays
    /// registered but is no longer bound.
    pub superseded: Option<ConnectionId>,
}

#[derive(Debug)]
struct ConnectionEntry {
    opened_at: Instant,
    binding: Option<Binding>,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered connections, bound or not.
    pub connections: usize,
    /// Operator bindings.
    pub operators: usize,
    /// Device bindings.
    pub devices: usize,
    /// Accounts with at least one operator connection.
    pub accounts: usize,
}

/// In-memory registry of connections and their bindings.
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    operators: HashMap<OpaqueId, HashSet<ConnectionId>>,
    devices: HashMap<DeviceKey, ConnectionId>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an unbound connection.
    ///
    /// Returns `false` if the connection was already registered, in which
    /// case nothing changes.
    pub fn register(&mut self, connection_id: ConnectionId, now: Instant) -> bool {
        if self.connections.contains_key(&connection_id) {
            return false;
        }
        debug!(connection = %connection_id, "Connection registered");
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                opened_at: now,
                binding: None,
            },
        );
        true
    }

    /// Remove a connection together with its binding.
    ///
    /// Returns the removed binding. Unknown connections are ignored.
    pub fn unregister(&mut self, connection_id: &ConnectionId) -> Option<Binding> {
        let entry = self.connections.remove(connection_id)?;
        let binding = entry.binding?;
        self.unindex(&binding);
        debug!(connection = %connection_id, kind = ?binding.kind(), "Connection unregistered");
        Some(binding)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Check whether a connection is registered.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Lifecycle state of a connection, `None` once closed.
    #[must_use]
    pub fn state(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        self.connections.get(connection_id).map(|entry| match &entry.binding {
            Some(binding) => ConnectionState::Announced(binding.kind()),
            None => ConnectionState::Open,
        })
    }

    /// When a connection was registered.
    #[must_use]
    pub fn opened_at(&self, connection_id: &ConnectionId) -> Option<Instant> {
        self.connections.get(connection_id).map(|e| e.opened_at)
    }

    /// The binding a connection holds.
    #[must_use]
    pub fn binding(&self, connection_id: &ConnectionId) -> Option<&Binding> {
        self.connections.get(connection_id)?.binding.as_ref()
    }

    /// Bind a connection as an operator of `account`.
    ///
    /// Any earlier binding of this connection is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or the account is blank.
    pub fn bind_operator(
        &mut self,
        connection_id: &ConnectionId,
        account: OpaqueId,
    ) -> Result<BindOutcome, RegistryError> {
        self.ensure_bindable(connection_id, &account, "account")?;

        let previous = self.detach(connection_id);
        self.operators
            .entry(account.clone())
            .or_default()
            .insert(connection_id.clone());
        self.attach(
            connection_id,
            Binding::Operator(OperatorBinding {
                account,
                connection_id: connection_id.clone(),
            }),
        );

        Ok(BindOutcome {
            previous,
            superseded: None,
        })
    }

    /// Bind a connection as a device.
    ///
    /// Any earlier binding of this connection is replaced. If another
    /// connection currently holds the same device identity, that connection
    /// is unbound and reported in [`BindOutcome::superseded`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or an identifier is blank.
    pub fn bind_device(
        &mut self,
        connection_id: &ConnectionId,
        key: DeviceKey,
        now: Instant,
    ) -> Result<BindOutcome, RegistryError> {
        self.ensure_bindable(connection_id, &key.account, "account")?;
        if key.device.is_blank() {
            return Err(RegistryError::BlankIdentity("device"));
        }

        let previous = self.detach(connection_id);

        let superseded = self
            .devices
            .get(&key)
            .filter(|holder| *holder != connection_id)
            .cloned();
        if let Some(holder) = &superseded {
            self.detach(holder);
            debug!(connection = %holder, device = %key, "Device binding superseded");
        }

        self.devices.insert(key.clone(), connection_id.clone());
        self.attach(
            connection_id,
            Binding::Device(DeviceBinding::new(key, connection_id.clone(), now)),
        );

        Ok(BindOutcome {
            previous,
            superseded,
        })
    }

    /// Record a liveness signal for a device connection.
    ///
    /// Returns the updated binding, or `None` if the connection is not bound
    /// as a device.
    pub fn touch(&mut self, connection_id: &ConnectionId, now: Instant) -> Option<&DeviceBinding> {
        match self.connections.get_mut(connection_id)?.binding.as_mut()? {
            Binding::Device(device) => {
                device.touch(now);
                Some(&*device)
            }
            Binding::Operator(_) => None,
        }
    }

    /// Resolve a group to its member connections.
    #[must_use]
    pub fn members(&self, group: &Group) -> Vec<ConnectionId> {
        match group {
            Group::Operators(account) => self
                .operators
                .get(account)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            Group::Device(key) => self.devices.get(key).cloned().into_iter().collect(),
        }
    }

    /// Remove device bindings that have been silent for longer than
    /// `timeout`, at most `limit` per call.
    ///
    /// The connections stay registered but unbound. Returns the removed
    /// bindings.
    pub fn sweep_stale(
        &mut self,
        now: Instant,
        timeout: Duration,
        limit: usize,
    ) -> Vec<DeviceBinding> {
        let stale: Vec<ConnectionId> = self
            .devices
            .values()
            .filter(|id| {
                self.binding(id)
                    .and_then(Binding::as_device)
                    .is_some_and(|d| d.liveness(now, timeout) == Liveness::Stale)
            })
            .take(limit)
            .cloned()
            .collect();

        stale
            .iter()
            .filter_map(|id| match self.detach(id) {
                Some(Binding::Device(device)) => Some(device),
                _ => None,
            })
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            connections: self.connections.len(),
            operators: self.operators.values().map(HashSet::len).sum(),
            devices: self.devices.len(),
            accounts: self.operators.len(),
        }
    }

    fn ensure_bindable(
        &self,
        connection_id: &ConnectionId,
        account: &OpaqueId,
        what: &'static str,
    ) -> Result<(), RegistryError> {
        if !self.contains(connection_id) {
            return Err(RegistryError::UnknownConnection(connection_id.clone()));
        }
        if account.is_blank() {
            return Err(RegistryError::BlankIdentity(what));
        }
        Ok(())
    }

    fn attach(&mut self, connection_id: &ConnectionId, binding: Binding) {
        if let Some(entry) = self.connections.get_mut(connection_id) {
            debug!(
                connection = %connection_id,
                account = %binding.account(),
                kind = ?binding.kind(),
                "Connection bound"
            );
            entry.binding = Some(binding);
        }
    }

    /// Clear a connection's binding and its index entries.
    fn detach(&mut self, connection_id: &ConnectionId) -> Option<Binding> {
        let binding = self.connections.get_mut(connection_id)?.binding.take()?;
        self.unindex(&binding);
        Some(binding)
    }

    fn unindex(&mut self, binding: &Binding) {
        match binding {
            Binding::Operator(op) => {
                if let Some(set) = self.operators.get_mut(&op.account) {
                    set.remove(&op.connection_id);
                    if set.is_empty() {
                        self.operators.remove(&op.account);
                    }
                }
            }
            Binding::Device(dev) => {
                let key = dev.key();
                if self.devices.get(&key) == Some(&dev.connection_id) {
                    self.devices.remove(&key);
                }
            }
        }
    }
}
