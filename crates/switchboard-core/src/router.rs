//! Event router.
//!
//! The router owns the [`Registry`] and one bounded outbound queue per
//! connection. Inbound events are resolved against the registry under a
//! single lock, then delivered to their destinations after the lock is
//! released.
//!
//! Delivery is fire-and-forget: an event is offered once to each
//! destination queue, a full or closed queue drops it, and nothing is
//! retried.

use crate::binding::{Binding, DeviceBinding, OperatorBinding};
use crate::group::{DeviceKey, Group};
use crate::message::{CloseReason, Delivery};
use crate::registry::{BindOutcome, ConnectionState, Registry, RegistryError, RegistryStats};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_protocol::{
    unix_millis, Announce, AuthResult, CampaignAction, CampaignCommand, CampaignControl,
    CampaignSummary, ConnectionId, DeviceConnected, DeviceDisconnected, DisconnectReason,
    ErrorNotice, HeartbeatAck, InboundEvent, NotificationReceived, NotificationSend, OpaqueId,
    OutboundEvent, PeerKind, Stamped, UploadProgress, Welcome, PROTOCOL_VERSION,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Router errors.
///
/// Every error is scoped to the single event that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// A connection with this ID is already registered.
    #[error("Connection already registered: {0}")]
    DuplicateConnection(ConnectionId),

    /// The router already holds its maximum number of connections.
    #[error("Connection limit of {0} reached")]
    ConnectionLimit(usize),

    /// The connection is not registered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection sent an event before announcing itself.
    #[error("Connection {0} has not announced an identity")]
    Unbound(ConnectionId),

    /// The event may only be sent by an operator connection.
    #[error("{0} requires an operator connection")]
    OperatorRequired(&'static str),

    /// The event may only be sent by a device connection.
    #[error("{0} requires a device connection")]
    DeviceRequired(&'static str),

    /// The announce was refused; the peer was told why.
    #[error("Announce rejected: {0}")]
    AnnounceRejected(String),

    /// A payload field failed validation.
    #[error("Invalid {event} payload: {reason}")]
    InvalidPayload {
        event: &'static str,
        reason: &'static str,
    },
}

impl RouterError {
    /// Whether the sender is told about this error with an `error` event.
    ///
    /// Only bound senders breaking a role or field rule qualify. Unbound
    /// senders hear nothing, and a rejected announce has its own reply.
    #[must_use]
    pub fn notifies_sender(&self) -> bool {
        matches!(
            self,
            RouterError::OperatorRequired(_)
                | RouterError::DeviceRequired(_)
                | RouterError::InvalidPayload { .. }
        )
    }
}

impl From<RegistryError> for RouterError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownConnection(id) => RouterError::UnknownConnection(id),
            RegistryError::BlankIdentity(what) => {
                RouterError::AnnounceRejected(format!("{what} identifier is blank"))
            }
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Capacity of each connection's outbound queue.
    pub mailbox_capacity: usize,
    /// Heartbeat cadence advertised to devices in the `connected` event.
    pub heartbeat_interval: Duration,
    /// Connections accepted at once; further `connect` calls fail.
    pub max_connections: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            heartbeat_interval: Duration::from_secs(30),
            max_connections: 10_000,
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Registered connections.
    pub connection_count: usize,
    /// Operator bindings.
    pub operator_count: usize,
    /// Device bindings.
    pub device_count: usize,
    /// Deliveries dropped because a queue was full, since startup.
    pub dropped_deliveries: u64,
}

/// The central event router.
pub struct Router {
    registry: Mutex<Registry>,
    mailboxes: DashMap<ConnectionId, mpsc::Sender<Delivery>>,
    dropped: AtomicU64,
    config: RouterConfig,
}

impl Router {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            registry: Mutex::new(Registry::new()),
            mailboxes: DashMap::new(),
            dropped: AtomicU64::new(0),
            config,
        }
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let RegistryStats {
            connections,
            operators,
            devices,
            ..
        } = self.registry.lock().stats();
        RouterStats {
            connection_count: connections,
            operator_count: operators,
            device_count: devices,
            dropped_deliveries: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Lifecycle state of a connection, `None` once closed.
    #[must_use]
    pub fn connection_state(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        self.registry.lock().state(connection_id)
    }

    /// The binding a connection currently holds.
    #[must_use]
    pub fn binding(&self, connection_id: &ConnectionId) -> Option<Binding> {
        self.registry.lock().binding(connection_id).cloned()
    }

    /// Resolve a broadcast group to its current members.
    #[must_use]
    pub fn members(&self, group: &Group) -> Vec<ConnectionId> {
        self.registry.lock().members(group)
    }

    /// Register a new connection.
    ///
    /// Returns the connection's outbound queue. The first item on it is the
    /// `connected` welcome event.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection ID is already registered or the
    /// connection limit is reached.
    pub fn connect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<mpsc::Receiver<Delivery>, RouterError> {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        {
            let mut registry = self.registry.lock();
            if registry.len() >= self.config.max_connections {
                return Err(RouterError::ConnectionLimit(self.config.max_connections));
            }
            if !registry.register(connection_id.clone(), Instant::now()) {
                return Err(RouterError::DuplicateConnection(connection_id.clone()));
            }
            self.mailboxes.insert(connection_id.clone(), tx);
        }

        let welcome = OutboundEvent::Connected(Welcome {
            connection_id: connection_id.clone(),
            version: PROTOCOL_VERSION,
            heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u64,
        });
        self.send_to(connection_id, welcome);

        debug!(connection = %connection_id, "Connection opened");
        Ok(rx)
    }

    /// Remove a connection after its transport closed.
    ///
    /// If it was bound as a device, the owning account's operators receive
    /// `device:disconnected` without a reason. Unknown connections are
    /// ignored.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Option<Binding> {
        let (binding, operators, lifetime) = {
            let mut registry = self.registry.lock();
            self.mailboxes.remove(connection_id);
            let lifetime = registry
                .opened_at(connection_id)
                .map(|opened| Instant::now().saturating_duration_since(opened));
            let binding = registry.unregister(connection_id);
            let operators = match &binding {
                Some(Binding::Device(device)) => {
                    registry.members(&Group::Operators(device.account.clone()))
                }
                _ => Vec::new(),
            };
            (binding, operators, lifetime)
        };
        let connected_secs = lifetime.map_or(0, |d| d.as_secs());

        match &binding {
            Some(Binding::Device(device)) => {
                info!(
                    connection = %connection_id,
                    account = %device.account,
                    device = %device.device,
                    connected_secs,
                    "Device disconnected"
                );
                self.deliver(
                    &operators,
                    OutboundEvent::DeviceDisconnected(DeviceDisconnected {
                        device_id: device.device.clone(),
                        reason: None,
                    }),
                );
            }
            Some(Binding::Operator(op)) => {
                info!(
                    connection = %connection_id,
                    account = %op.account,
                    connected_secs,
                    "Operator disconnected"
                );
            }
            None => debug!(connection = %connection_id, "Connection closed"),
        }

        binding
    }

    /// Route one inbound event from a connection.
    ///
    /// Returns the number of deliveries queued.
    ///
    /// # Errors
    ///
    /// Returns an error describing why the event was dropped. Errors never
    /// affect the connection's later events or any other connection.
    pub fn dispatch(
        &self,
        connection_id: &ConnectionId,
        event: InboundEvent,
    ) -> Result<usize, RouterError> {
        trace!(connection = %connection_id, event = event.name(), "Dispatching event");

        let result = match event {
            InboundEvent::Authenticate(announce) => self.announce(connection_id, announce),
            InboundEvent::CampaignStart(control) => {
                self.campaign(connection_id, CampaignAction::Start, control)
            }
            InboundEvent::CampaignPause(control) => {
                self.campaign(connection_id, CampaignAction::Pause, control)
            }
            InboundEvent::CampaignStop(control) => {
                self.campaign(connection_id, CampaignAction::Stop, control)
            }
            InboundEvent::CallInitiated(call) => {
                debug!(connection = %connection_id, call = %call.call_id, "Call initiated");
                self.relay_from_device(
                    connection_id,
                    OutboundEvent::CallInitiated(Stamped::now(call)),
                )
            }
            InboundEvent::CallAnswered(call) => {
                debug!(connection = %connection_id, call = %call.call_id, "Call answered");
                self.relay_from_device(
                    connection_id,
                    OutboundEvent::CallAnswered(Stamped::now(call)),
                )
            }
            InboundEvent::CallEnded(call) => {
                debug!(
                    connection = %connection_id,
                    call = %call.call_id,
                    status = call.status.as_deref().unwrap_or("unknown"),
                    "Call ended"
                );
                self.relay_from_device(connection_id, OutboundEvent::CallEnded(Stamped::now(call)))
            }
            InboundEvent::DtmfInput(input) => {
                if !input.has_valid_digit() {
                    self.require_device(connection_id, "dtmf:input")?;
                    return Err(RouterError::InvalidPayload {
                        event: "dtmf:input",
                        reason: "digit must be one of 0-9, *, #, A-D",
                    });
                }
                self.relay_from_device(
                    connection_id,
                    OutboundEvent::DtmfReceived(Stamped::now(input)),
                )
            }
            InboundEvent::DeviceStatus(status) => self.relay_from_device(
                connection_id,
                OutboundEvent::DeviceStatusUpdate(Stamped::now(status)),
            ),
            InboundEvent::NotificationSend(notification) => {
                self.notify(connection_id, notification)
            }
            InboundEvent::Heartbeat(heartbeat) => {
                self.heartbeat(connection_id, heartbeat.device_id)
            }
            InboundEvent::UploadProgress(progress) => self.upload_progress(connection_id, progress),
        };

        if let Err(err) = &result {
            if err.notifies_sender() {
                self.send_to(
                    connection_id,
                    OutboundEvent::Error(ErrorNotice {
                        message: err.to_string(),
                    }),
                );
            }
        }
        result
    }

    /// Evict device bindings silent for longer than `timeout`, at most
    /// `limit` per call.
    ///
    /// Each evicted device's operators receive `device:disconnected` with
    /// reason `timeout`, and its connection is removed and told to close.
    /// Returns the number of evictions.
    pub fn sweep_stale(&self, now: Instant, timeout: Duration, limit: usize) -> usize {
        type Evicted = (DeviceBinding, Vec<ConnectionId>, Option<mpsc::Sender<Delivery>>);
        let evicted: Vec<Evicted> = {
            let mut registry = self.registry.lock();
            registry
                .sweep_stale(now, timeout, limit)
                .into_iter()
                .map(|device| {
                    let operators = registry.members(&Group::Operators(device.account.clone()));
                    let mailbox = self.detach(&mut registry, &device.connection_id);
                    (device, operators, mailbox)
                })
                .collect()
        };

        let count = evicted.len();
        for (device, operators, mailbox) in evicted {
            info!(
                connection = %device.connection_id,
                account = %device.account,
                device = %device.device,
                "Evicting stale device"
            );
            self.deliver(
                &operators,
                OutboundEvent::DeviceDisconnected(DeviceDisconnected {
                    device_id: device.device.clone(),
                    reason: Some(DisconnectReason::Timeout),
                }),
            );
            close(&device.connection_id, mailbox, CloseReason::LivenessTimeout);
        }

        count
    }

    /// Answer an `authenticate` whose payload could not be read.
    ///
    /// The connection receives `authenticated` with `success: false` and
    /// keeps whatever binding it had.
    ///
    /// # Errors
    ///
    /// Always returns the rejection, or `UnknownConnection` if the
    /// connection is not registered.
    pub fn reject_announce(
        &self,
        connection_id: &ConnectionId,
        reason: impl Into<String>,
    ) -> Result<usize, RouterError> {
        if !self.registry.lock().contains(connection_id) {
            return Err(RouterError::UnknownConnection(connection_id.clone()));
        }
        Err(self.refuse_announce(connection_id, reason.into()))
    }

    fn announce(
        &self,
        connection_id: &ConnectionId,
        announce: Announce,
    ) -> Result<usize, RouterError> {
        match self.bind(connection_id, announce) {
            Err(RouterError::AnnounceRejected(reason)) => {
                Err(self.refuse_announce(connection_id, reason))
            }
            other => other,
        }
    }

    fn refuse_announce(&self, connection_id: &ConnectionId, reason: String) -> RouterError {
        warn!(connection = %connection_id, reason = %reason, "Announce rejected");
        self.send_to(
            connection_id,
            OutboundEvent::authenticated(AuthResult::rejected(reason.clone())),
        );
        RouterError::AnnounceRejected(reason)
    }

    fn bind(&self, connection_id: &ConnectionId, announce: Announce) -> Result<usize, RouterError> {
        if let Some(version) = announce.protocol_version {
            if !version.is_compatible_with(&PROTOCOL_VERSION) {
                return Err(RouterError::AnnounceRejected(format!(
                    "unsupported protocol version {version}"
                )));
            }
        }

        let account = announce
            .user_id
            .filter(|id| !id.is_blank())
            .ok_or_else(|| RouterError::AnnounceRejected("userId is required".into()))?;

        match announce.user_type {
            PeerKind::Operator => {
                let departed = {
                    let mut registry = self.registry.lock();
                    let outcome = registry.bind_operator(connection_id, account.clone())?;
                    departure(&registry, &outcome, None)
                };
                info!(connection = %connection_id, account = %account, "Operator authenticated");

                let mut delivered = self.send_to(
                    connection_id,
                    OutboundEvent::authenticated(AuthResult::accepted()),
                ) as usize;
                delivered += self.announce_departure(departed);
                Ok(delivered)
            }
            PeerKind::Device => {
                let device = announce
                    .device_id
                    .filter(|id| !id.is_blank())
                    .ok_or_else(|| RouterError::AnnounceRejected("deviceId is required".into()))?;
                let key = DeviceKey::new(account.clone(), device.clone());

                let (superseded, departed, operators) = {
                    let mut registry = self.registry.lock();
                    let outcome = registry.bind_device(connection_id, key.clone(), Instant::now())?;
                    let departed = departure(&registry, &outcome, Some(&key));
                    let operators = registry.members(&Group::Operators(account.clone()));
                    let superseded = outcome.superseded.map(|old| {
                        let mailbox = self.detach(&mut registry, &old);
                        (old, mailbox)
                    });
                    (superseded, departed, operators)
                };
                info!(
                    connection = %connection_id,
                    account = %account,
                    device = %device,
                    "Device authenticated"
                );

                let mut delivered = self.send_to(
                    connection_id,
                    OutboundEvent::authenticated(AuthResult::accepted()),
                ) as usize;
                delivered += self.deliver(
                    &operators,
                    OutboundEvent::DeviceConnected(DeviceConnected { device_id: device }),
                );
                delivered += self.announce_departure(departed);
                if let Some((old, mailbox)) = superseded {
                    info!(connection = %old, device = %key, "Closing superseded device connection");
                    close(&old, mailbox, CloseReason::Superseded);
                }
                Ok(delivered)
            }
        }
    }

    fn announce_departure(&self, departed: Option<(OpaqueId, Vec<ConnectionId>)>) -> usize {
        match departed {
            Some((device_id, operators)) => self.deliver(
                &operators,
                OutboundEvent::DeviceDisconnected(DeviceDisconnected {
                    device_id,
                    reason: None,
                }),
            ),
            None => 0,
        }
    }

    fn campaign(
        &self,
        connection_id: &ConnectionId,
        action: CampaignAction,
        control: CampaignControl,
    ) -> Result<usize, RouterError> {
        let event = match action {
            CampaignAction::Start => "campaign:start",
            CampaignAction::Pause => "campaign:pause",
            CampaignAction::Stop => "campaign:stop",
        };
        let (account, devices, operators) = {
            let registry = self.registry.lock();
            let operator = operator_binding(&registry, connection_id, event)?;
            let account = operator.account.clone();

            let mut seen = HashSet::new();
            let devices: Vec<ConnectionId> = control
                .device_ids
                .iter()
                .filter(|id| seen.insert(*id))
                .filter_map(|id| {
                    let key = DeviceKey::new(account.clone(), id.clone());
                    let target = registry.members(&Group::Device(key)).pop();
                    if target.is_none() {
                        debug!(campaign = %control.campaign_id, device = %id, "Campaign target offline");
                    }
                    target
                })
                .collect();
            let operators = registry.members(&Group::Operators(account.clone()));
            (account, devices, operators)
        };

        let timestamp = unix_millis();
        let mut delivered = self.deliver(
            &devices,
            OutboundEvent::campaign_command(
                action,
                CampaignCommand {
                    campaign_id: control.campaign_id.clone(),
                    timestamp,
                },
            ),
        );
        delivered += self.deliver(
            &operators,
            OutboundEvent::campaign_summary(
                action,
                CampaignSummary {
                    campaign_id: control.campaign_id.clone(),
                    device_ids: control.device_ids.clone(),
                    timestamp,
                },
            ),
        );

        info!(
            account = %account,
            campaign = %control.campaign_id,
            devices = control.device_ids.len(),
            reached = devices.len(),
            "Campaign {}",
            action.past_tense()
        );
        Ok(delivered)
    }

    fn relay_from_device(
        &self,
        connection_id: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<usize, RouterError> {
        let operators = {
            let registry = self.registry.lock();
            let device = device_binding(&registry, connection_id, event.name())?;
            registry.members(&Group::Operators(device.account.clone()))
        };
        Ok(self.deliver(&operators, event))
    }

    fn notify(
        &self,
        connection_id: &ConnectionId,
        notification: NotificationSend,
    ) -> Result<usize, RouterError> {
        let operators = {
            let registry = self.registry.lock();
            bound(&registry, connection_id)?;
            registry.members(&Group::Operators(notification.user_id.clone()))
        };
        debug!(
            connection = %connection_id,
            account = %notification.user_id,
            recipients = operators.len(),
            "Notification sent"
        );
        Ok(self.deliver(
            &operators,
            OutboundEvent::NotificationReceived(NotificationReceived {
                message: notification.message,
                kind: notification.kind,
                timestamp: unix_millis(),
            }),
        ))
    }

    fn heartbeat(
        &self,
        connection_id: &ConnectionId,
        device_id: Option<OpaqueId>,
    ) -> Result<usize, RouterError> {
        {
            let mut registry = self.registry.lock();
            device_binding(&registry, connection_id, "heartbeat")?;
            registry.touch(connection_id, Instant::now());
        }
        trace!(connection = %connection_id, "Heartbeat");
        let ack = OutboundEvent::HeartbeatAck(HeartbeatAck {
            server_time: unix_millis(),
            device_id,
        });
        Ok(self.send_to(connection_id, ack) as usize)
    }

    fn upload_progress(
        &self,
        connection_id: &ConnectionId,
        progress: UploadProgress,
    ) -> Result<usize, RouterError> {
        {
            let registry = self.registry.lock();
            operator_binding(&registry, connection_id, "upload:progress")?;
        }
        Ok(self.send_to(
            connection_id,
            OutboundEvent::UploadProgressUpdate(Stamped::now(progress)),
        ) as usize)
    }

    fn require_device(
        &self,
        connection_id: &ConnectionId,
        event: &'static str,
    ) -> Result<(), RouterError> {
        let registry = self.registry.lock();
        device_binding(&registry, connection_id, event).map(|_| ())
    }

    /// Offer an event to every target. Returns the number of queues that
    /// accepted it.
    fn deliver(&self, targets: &[ConnectionId], event: OutboundEvent) -> usize {
        if targets.is_empty() {
            trace!(event = event.name(), "No recipients");
            return 0;
        }
        let event = Arc::new(event);
        targets
            .iter()
            .filter(|target| self.push(target, Delivery::Event(Arc::clone(&event))))
            .count()
    }

    fn send_to(&self, connection_id: &ConnectionId, event: OutboundEvent) -> bool {
        self.push(connection_id, Delivery::Event(Arc::new(event)))
    }

    /// Remove a connection and take its queue. Must run under the registry
    /// lock, so the connection cannot announce again between its removal
    /// and the close.
    fn detach(
        &self,
        registry: &mut Registry,
        connection_id: &ConnectionId,
    ) -> Option<mpsc::Sender<Delivery>> {
        registry.unregister(connection_id);
        self.mailboxes.remove(connection_id).map(|(_, mailbox)| mailbox)
    }

    fn push(&self, connection_id: &ConnectionId, delivery: Delivery) -> bool {
        let Some(mailbox) = self.mailboxes.get(connection_id) else {
            trace!(connection = %connection_id, "Recipient already gone");
            return false;
        };
        match mailbox.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection = %connection_id, "Outbound queue full, dropping delivery");
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Ask a detached connection's transport to close.
///
/// Dropping the queue's sender ends the session even if the close item
/// itself did not fit.
fn close(
    connection_id: &ConnectionId,
    mailbox: Option<mpsc::Sender<Delivery>>,
    reason: CloseReason,
) {
    let Some(mailbox) = mailbox else {
        trace!(connection = %connection_id, "Connection already gone");
        return;
    };
    if let Err(TrySendError::Full(_)) = mailbox.try_send(Delivery::Close(reason)) {
        debug!(connection = %connection_id, "Outbound queue full, closing by dropping it");
    }
}

fn bound<'a>(
    registry: &'a Registry,
    connection_id: &ConnectionId,
) -> Result<&'a Binding, RouterError> {
    match registry.binding(connection_id) {
        Some(binding) => Ok(binding),
        None if registry.contains(connection_id) => {
            Err(RouterError::Unbound(connection_id.clone()))
        }
        None => Err(RouterError::UnknownConnection(connection_id.clone())),
    }
}

fn operator_binding<'a>(
    registry: &'a Registry,
    connection_id: &ConnectionId,
    event: &'static str,
) -> Result<&'a OperatorBinding, RouterError> {
    match bound(registry, connection_id)? {
        Binding::Operator(op) => Ok(op),
        Binding::Device(_) => Err(RouterError::OperatorRequired(event)),
    }
}

fn device_binding<'a>(
    registry: &'a Registry,
    connection_id: &ConnectionId,
    event: &'static str,
) -> Result<&'a DeviceBinding, RouterError> {
    match bound(registry, connection_id)? {
        Binding::Device(device) => Ok(device),
        Binding::Operator(_) => Err(RouterError::DeviceRequired(event)),
    }
}

/// If a re-announce moved this connection off a device identity, the device
/// it used to be and the operators that should hear it left.
fn departure(
    registry: &Registry,
    outcome: &BindOutcome,
    new_key: Option<&DeviceKey>,
) -> Option<(OpaqueId, Vec<ConnectionId>)> {
    let previous = outcome.previous.as_ref()?.as_device()?;
    if new_key == Some(&previous.key()) {
        return None;
    }
    Some((
        previous.device.clone(),
        registry.members(&Group::Operators(previous.account.clone())),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchboard_protocol::{
        CallEnded, CallEvent, DeviceStatus, DtmfInput, Heartbeat, NotificationKind,
    };

    type Mailbox = mpsc::Receiver<Delivery>;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::new(id)
    }

    /// Connect and drain the welcome event.
    fn open(router: &Router, id: &str) -> Mailbox {
        let mut rx = router.connect(&conn(id)).unwrap();
        match drain(&mut rx).as_slice() {
            [OutboundEvent::Connected(_)] => rx,
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    fn operator(router: &Router, id: &str, account: &str) -> Mailbox {
        let mut rx = open(router, id);
        router
            .dispatch(&conn(id), InboundEvent::Authenticate(Announce::operator(account)))
            .unwrap();
        drain(&mut rx);
        rx
    }

    fn device(router: &Router, id: &str, account: &str, device_id: &str) -> Mailbox {
        let mut rx = open(router, id);
        router
            .dispatch(
                &conn(id),
                InboundEvent::Authenticate(Announce::device(account, device_id)),
            )
            .unwrap();
        drain(&mut rx);
        rx
    }

    fn drain(rx: &mut Mailbox) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            if let Some(event) = delivery.event() {
                events.push(event.clone());
            }
        }
        events
    }

    fn names(events: &[OutboundEvent]) -> Vec<&'static str> {
        events.iter().map(OutboundEvent::name).collect()
    }

    fn campaign_start(campaign: i64, devices: &[&str]) -> InboundEvent {
        InboundEvent::CampaignStart(CampaignControl {
            campaign_id: OpaqueId::int(campaign),
            device_ids: devices.iter().map(|d| OpaqueId::text(*d)).collect(),
        })
    }

    fn call(device: &str) -> CallEvent {
        CallEvent {
            call_id: OpaqueId::text("call-1"),
            campaign_id: Some(OpaqueId::int(7)),
            contact_id: Some(OpaqueId::int(99)),
            device_id: Some(OpaqueId::text(device)),
        }
    }

    #[tokio::test]
    async fn test_connect_sends_welcome() {
        let router = Router::new();
        let mut rx = router.connect(&conn("c1")).unwrap();

        match drain(&mut rx).as_slice() {
            [OutboundEvent::Connected(welcome)] => {
                assert_eq!(welcome.connection_id, conn("c1"));
                assert_eq!(welcome.version, PROTOCOL_VERSION);
                assert_eq!(welcome.heartbeat_interval_ms, 30_000);
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
        assert_eq!(router.connection_state(&conn("c1")), Some(ConnectionState::Open));
    }

    #[tokio::test]
    async fn test_duplicate_connect() {
        let router = Router::new();
        let _rx = router.connect(&conn("c1")).unwrap();
        assert_eq!(
            router.connect(&conn("c1")).unwrap_err(),
            RouterError::DuplicateConnection(conn("c1"))
        );
    }

    #[tokio::test]
    async fn test_operator_announce_acknowledged() {
        let router = Router::new();
        let mut rx = open(&router, "op");

        let delivered = router
            .dispatch(&conn("op"), InboundEvent::Authenticate(Announce::operator("A")))
            .unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(
            drain(&mut rx),
            vec![OutboundEvent::authenticated(AuthResult::accepted())]
        );
        assert_eq!(
            router.connection_state(&conn("op")),
            Some(ConnectionState::Announced(PeerKind::Operator))
        );
    }

    #[tokio::test]
    async fn test_malformed_announce_rejected() {
        let router = Router::new();
        let mut rx = open(&router, "c1");

        let missing_device = Announce {
            device_id: None,
            ..Announce::device("A", "unused")
        };
        let err = router
            .dispatch(&conn("c1"), InboundEvent::Authenticate(missing_device))
            .unwrap_err();
        assert!(matches!(err, RouterError::AnnounceRejected(_)));

        let err = router
            .dispatch(&conn("c1"), InboundEvent::Authenticate(Announce::default()))
            .unwrap_err();
        assert!(matches!(err, RouterError::AnnounceRejected(_)));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        for event in events {
            match event {
                OutboundEvent::Authenticated(result) => {
                    assert!(!result.success);
                    assert!(result.error.is_some());
                }
                other => panic!("Expected authenticated, got {:?}", other),
            }
        }

        assert_eq!(router.connection_state(&conn("c1")), Some(ConnectionState::Open));
        assert_eq!(router.stats().device_count, 0);

        // The connection may try again.
        router
            .dispatch(&conn("c1"), InboundEvent::Authenticate(Announce::operator("A")))
            .unwrap();
        assert_eq!(router.stats().operator_count, 1);
    }

    #[tokio::test]
    async fn test_reject_unreadable_announce() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");

        assert_eq!(
            router.reject_announce(&conn("op"), "invalid authenticate payload"),
            Err(RouterError::AnnounceRejected("invalid authenticate payload".into()))
        );
        assert_eq!(
            drain(&mut op),
            vec![OutboundEvent::authenticated(AuthResult::rejected(
                "invalid authenticate payload"
            ))]
        );
        assert_eq!(router.stats().operator_count, 1);

        assert_eq!(
            router.reject_announce(&conn("ghost"), "invalid authenticate payload"),
            Err(RouterError::UnknownConnection(conn("ghost")))
        );
    }

    #[tokio::test]
    async fn test_incompatible_protocol_version_rejected() {
        let router = Router::new();
        let mut rx = open(&router, "c1");
        let announce = Announce {
            protocol_version: Some(switchboard_protocol::Version::new(2, 0)),
            ..Announce::operator("A")
        };

        assert!(router
            .dispatch(&conn("c1"), InboundEvent::Authenticate(announce))
            .is_err());
        assert_eq!(names(&drain(&mut rx)), vec!["authenticated"]);
        assert_eq!(router.stats().operator_count, 0);
    }

    #[tokio::test]
    async fn test_device_announce_notifies_account_operators() {
        let router = Router::new();
        let mut op_a1 = operator(&router, "op-a1", "A");
        let mut op_a2 = operator(&router, "op-a2", "A");
        let mut op_b = operator(&router, "op-b", "B");
        let mut dev = open(&router, "dev");

        router
            .dispatch(&conn("dev"), InboundEvent::Authenticate(Announce::device("A", "D1")))
            .unwrap();

        let expected = vec![OutboundEvent::DeviceConnected(DeviceConnected {
            device_id: OpaqueId::text("D1"),
        })];
        assert_eq!(drain(&mut op_a1), expected);
        assert_eq!(drain(&mut op_a2), expected);
        assert!(drain(&mut op_b).is_empty());
        assert_eq!(names(&drain(&mut dev)), vec!["authenticated"]);
    }

    #[tokio::test]
    async fn test_heartbeat_acks_sender_only() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut dev = device(&router, "dev", "A", "D1");
        let before = match router.binding(&conn("dev")) {
            Some(Binding::Device(d)) => d.last_seen,
            other => panic!("Expected device binding, got {:?}", other),
        };

        tokio::time::pause();
        tokio::time::advance(Duration::from_secs(5)).await;

        let delivered = router
            .dispatch(
                &conn("dev"),
                InboundEvent::Heartbeat(Heartbeat {
                    device_id: Some(OpaqueId::text("D1")),
                }),
            )
            .unwrap();
        assert_eq!(delivered, 1);

        match drain(&mut dev).as_slice() {
            [OutboundEvent::HeartbeatAck(ack)] => {
                assert_eq!(ack.device_id, Some(OpaqueId::text("D1")));
                assert!(ack.server_time > 0);
            }
            other => panic!("Expected heartbeat:ack, got {:?}", other),
        }
        assert!(drain(&mut op).is_empty());

        match router.binding(&conn("dev")) {
            Some(Binding::Device(d)) => assert!(d.last_seen > before),
            other => panic!("Expected device binding, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_campaign_start_fans_out_within_account() {
        let router = Router::new();
        let mut op_a = operator(&router, "op-a", "A");
        let mut op_b = operator(&router, "op-b", "B");
        let mut d1 = device(&router, "d1", "A", "D1");
        let mut d2 = device(&router, "d2", "A", "D2");
        let mut d3 = device(&router, "d3", "A", "D3");
        let mut foreign = device(&router, "foreign", "B", "D1");
        drain(&mut op_a);
        drain(&mut op_b);

        let delivered = router
            .dispatch(&conn("op-a"), campaign_start(7, &["D1", "D2"]))
            .unwrap();
        assert_eq!(delivered, 3);

        for rx in [&mut d1, &mut d2] {
            match drain(rx).as_slice() {
                [OutboundEvent::CampaignStart(cmd)] => {
                    assert_eq!(cmd.campaign_id, OpaqueId::int(7));
                }
                other => panic!("Expected campaign:start, got {:?}", other),
            }
        }
        assert!(drain(&mut d3).is_empty());
        assert!(drain(&mut foreign).is_empty());
        assert!(drain(&mut op_b).is_empty());

        match drain(&mut op_a).as_slice() {
            [OutboundEvent::CampaignStarted(summary)] => {
                assert_eq!(summary.campaign_id, OpaqueId::int(7));
                assert_eq!(summary.device_ids.len(), 2);
            }
            other => panic!("Expected campaign:started, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_campaign_pause_and_stop() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut dev = device(&router, "dev", "A", "D1");
        drain(&mut op);

        let control = CampaignControl {
            campaign_id: OpaqueId::text("spring"),
            device_ids: vec![OpaqueId::text("D1"), OpaqueId::text("D1")],
        };
        router
            .dispatch(&conn("op"), InboundEvent::CampaignPause(control.clone()))
            .unwrap();
        router
            .dispatch(&conn("op"), InboundEvent::CampaignStop(control))
            .unwrap();

        assert_eq!(names(&drain(&mut dev)), vec!["campaign:pause", "campaign:stop"]);
        assert_eq!(
            names(&drain(&mut op)),
            vec!["campaign:paused", "campaign:stopped"]
        );
    }

    #[tokio::test]
    async fn test_campaign_requires_operator() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut dev = device(&router, "dev", "A", "D1");
        drain(&mut op);

        assert_eq!(
            router.dispatch(&conn("dev"), campaign_start(1, &["D1"])),
            Err(RouterError::OperatorRequired("campaign:start"))
        );
        match drain(&mut dev).as_slice() {
            [OutboundEvent::Error(notice)] => {
                assert_eq!(notice.message, "campaign:start requires an operator connection");
            }
            other => panic!("Expected error, got {:?}", other),
        }
        assert!(drain(&mut op).is_empty());
    }

    #[tokio::test]
    async fn test_call_events_relayed_to_operators_only() {
        let router = Router::new();
        let mut op_a = operator(&router, "op-a", "A");
        let mut op_b = operator(&router, "op-b", "B");
        let mut d1 = device(&router, "d1", "A", "D1");
        let mut d2 = device(&router, "d2", "A", "D2");
        drain(&mut op_a);

        router
            .dispatch(&conn("d1"), InboundEvent::CallInitiated(call("D1")))
            .unwrap();
        router
            .dispatch(&conn("d1"), InboundEvent::CallAnswered(call("D1")))
            .unwrap();
        router
            .dispatch(
                &conn("d1"),
                InboundEvent::CallEnded(CallEnded {
                    call_id: OpaqueId::text("call-1"),
                    campaign_id: Some(OpaqueId::int(7)),
                    contact_id: Some(OpaqueId::int(99)),
                    device_id: Some(OpaqueId::text("D1")),
                    duration: Some(42.into()),
                    status: Some("completed".into()),
                    dtmf_response: Some("1".into()),
                }),
            )
            .unwrap();

        let events = drain(&mut op_a);
        assert_eq!(
            names(&events),
            vec!["call:initiated", "call:answered", "call:ended"]
        );
        match &events[0] {
            OutboundEvent::CallInitiated(stamped) => {
                assert_eq!(stamped.payload, call("D1"));
                assert!(stamped.timestamp > 0);
            }
            other => panic!("Expected call:initiated, got {:?}", other),
        }
        let ended = serde_json::to_value(&events[2]).unwrap();
        assert_eq!(ended["data"]["duration"], json!(42));
        assert_eq!(ended["data"]["dtmfResponse"], json!("1"));

        assert!(drain(&mut op_b).is_empty());
        assert!(drain(&mut d1).is_empty());
        assert!(drain(&mut d2).is_empty());
    }

    #[tokio::test]
    async fn test_call_event_from_operator_is_refused() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut other = operator(&router, "other", "A");

        assert_eq!(
            router.dispatch(&conn("op"), InboundEvent::CallInitiated(call("D1"))),
            Err(RouterError::DeviceRequired("call:initiated"))
        );
        assert_eq!(names(&drain(&mut op)), vec!["error"]);
        assert!(drain(&mut other).is_empty());
    }

    #[tokio::test]
    async fn test_dtmf_and_status_relay() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut dev = device(&router, "dev", "A", "D1");
        drain(&mut op);

        let input = DtmfInput {
            call_id: OpaqueId::text("call-1"),
            digit: "5".into(),
            device_id: Some(OpaqueId::text("D1")),
        };
        router
            .dispatch(&conn("dev"), InboundEvent::DtmfInput(input.clone()))
            .unwrap();

        let invalid = DtmfInput {
            digit: "55".into(),
            ..input
        };
        assert!(matches!(
            router.dispatch(&conn("dev"), InboundEvent::DtmfInput(invalid)),
            Err(RouterError::InvalidPayload { .. })
        ));
        assert_eq!(names(&drain(&mut dev)), vec!["error"]);

        router
            .dispatch(
                &conn("dev"),
                InboundEvent::DeviceStatus(DeviceStatus {
                    device_id: Some(OpaqueId::text("D1")),
                    status: Some("idle".into()),
                    battery_level: Some(81.0),
                    signal_strength: Some(-67.0),
                }),
            )
            .unwrap();

        assert_eq!(
            names(&drain(&mut op)),
            vec!["dtmf:received", "device:statusUpdate"]
        );
    }

    #[tokio::test]
    async fn test_notification_to_named_account() {
        let router = Router::new();
        let mut op_a = operator(&router, "op-a", "A");
        let mut op_b = operator(&router, "op-b", "B");

        let delivered = router
            .dispatch(
                &conn("op-a"),
                InboundEvent::NotificationSend(NotificationSend {
                    user_id: "B".into(),
                    message: "Campaign finished".into(),
                    kind: NotificationKind::Success,
                }),
            )
            .unwrap();
        assert_eq!(delivered, 1);

        assert!(drain(&mut op_a).is_empty());
        match drain(&mut op_b).as_slice() {
            [OutboundEvent::NotificationReceived(n)] => {
                assert_eq!(n.message, "Campaign finished");
                assert_eq!(n.kind, NotificationKind::Success);
            }
            other => panic!("Expected notification:received, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_progress_echoes_to_sender() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut other = operator(&router, "other", "A");
        let mut dev = device(&router, "dev", "A", "D1");

        let progress = UploadProgress {
            upload_id: OpaqueId::text("u1"),
            progress: 42.5,
            filename: Some("greeting.mp3".into()),
        };
        router
            .dispatch(&conn("op"), InboundEvent::UploadProgress(progress.clone()))
            .unwrap();

        match drain(&mut op).as_slice() {
            [OutboundEvent::UploadProgressUpdate(stamped)] => assert_eq!(stamped.payload, progress),
            other => panic!("Expected upload:progressUpdate, got {:?}", other),
        }
        assert!(drain(&mut other).iter().all(|e| e.name() != "upload:progressUpdate"));

        assert_eq!(
            router.dispatch(&conn("dev"), InboundEvent::UploadProgress(progress)),
            Err(RouterError::OperatorRequired("upload:progress"))
        );
        assert_eq!(names(&drain(&mut dev)), vec!["error"]);
    }

    #[tokio::test]
    async fn test_unbound_events_are_dropped() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut stranger = open(&router, "stranger");
        let before = router.stats();

        let events = vec![
            campaign_start(7, &["D1"]),
            InboundEvent::CallInitiated(call("D1")),
            InboundEvent::Heartbeat(Heartbeat::default()),
            InboundEvent::NotificationSend(NotificationSend {
                user_id: "A".into(),
                message: "hi".into(),
                kind: NotificationKind::Info,
            }),
            InboundEvent::UploadProgress(UploadProgress {
                upload_id: OpaqueId::int(1),
                progress: 1.0,
                filename: None,
            }),
        ];
        for event in events {
            assert_eq!(
                router.dispatch(&conn("stranger"), event),
                Err(RouterError::Unbound(conn("stranger")))
            );
        }

        assert!(drain(&mut stranger).is_empty());
        assert!(drain(&mut op).is_empty());
        assert_eq!(router.stats(), before);
        assert_eq!(
            router.connection_state(&conn("stranger")),
            Some(ConnectionState::Open)
        );
    }

    #[tokio::test]
    async fn test_events_from_unknown_connection() {
        let router = Router::new();
        assert_eq!(
            router.dispatch(&conn("ghost"), InboundEvent::Heartbeat(Heartbeat::default())),
            Err(RouterError::UnknownConnection(conn("ghost")))
        );
        assert_eq!(
            router.dispatch(&conn("ghost"), InboundEvent::Authenticate(Announce::operator("A"))),
            Err(RouterError::UnknownConnection(conn("ghost")))
        );
    }

    #[tokio::test]
    async fn test_device_disconnect_notifies_without_reason() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let _dev = device(&router, "dev", "A", "D1");
        drain(&mut op);

        let removed = router.disconnect(&conn("dev"));
        assert!(matches!(removed, Some(Binding::Device(_))));
        assert_eq!(
            drain(&mut op),
            vec![OutboundEvent::DeviceDisconnected(DeviceDisconnected {
                device_id: OpaqueId::text("D1"),
                reason: None,
            })]
        );
        assert_eq!(router.connection_state(&conn("dev")), None);
        assert!(router
            .members(&Group::Device(DeviceKey::new("A", "D1")))
            .is_empty());

        // A second close is a no-op.
        assert_eq!(router.disconnect(&conn("dev")), None);
        assert!(drain(&mut op).is_empty());
    }

    #[tokio::test]
    async fn test_operator_disconnect_is_silent() {
        let router = Router::new();
        let mut op1 = operator(&router, "op1", "A");
        let _op2 = operator(&router, "op2", "A");

        assert!(matches!(
            router.disconnect(&conn("op2")),
            Some(Binding::Operator(_))
        ));
        assert!(drain(&mut op1).is_empty());
        assert_eq!(router.members(&Group::Operators("A".into())), vec![conn("op1")]);
    }

    #[tokio::test]
    async fn test_device_reannounce_replaces_identity() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut dev = device(&router, "dev", "A", "D1");
        drain(&mut op);

        router
            .dispatch(&conn("dev"), InboundEvent::Authenticate(Announce::device("A", "D2")))
            .unwrap();

        assert_eq!(
            names(&drain(&mut op)),
            vec!["device:connected", "device:disconnected"]
        );
        assert!(router
            .members(&Group::Device(DeviceKey::new("A", "D1")))
            .is_empty());
        assert_eq!(
            router.members(&Group::Device(DeviceKey::new("A", "D2"))),
            vec![conn("dev")]
        );

        // Campaign commands for the old identity no longer reach it.
        drain(&mut dev);
        router
            .dispatch(&conn("op"), campaign_start(3, &["D1"]))
            .unwrap();
        assert!(drain(&mut dev).is_empty());
    }

    #[tokio::test]
    async fn test_device_reconnect_closes_old_connection() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut old = device(&router, "old", "A", "D1");
        let _new = device(&router, "new", "A", "D1");

        assert_eq!(names(&drain(&mut op)), vec!["device:connected", "device:connected"]);

        match old.try_recv() {
            Ok(Delivery::Close(reason)) => assert_eq!(reason, CloseReason::Superseded),
            other => panic!("Expected close, got {:?}", other),
        }
        assert!(old.recv().await.is_none());

        // The old transport closing afterwards reports nothing.
        assert_eq!(router.disconnect(&conn("old")), None);
        assert!(drain(&mut op).is_empty());
        assert_eq!(router.stats().device_count, 1);
    }

    #[tokio::test]
    async fn test_superseded_connection_cannot_announce_again() {
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let _old = device(&router, "old", "A", "D1");
        let _new = device(&router, "new", "A", "D1");
        drain(&mut op);

        assert_eq!(router.connection_state(&conn("old")), None);
        assert_eq!(
            router.dispatch(
                &conn("old"),
                InboundEvent::Authenticate(Announce::device("A", "D1"))
            ),
            Err(RouterError::UnknownConnection(conn("old")))
        );
        assert!(drain(&mut op).is_empty());
        assert_eq!(
            router.members(&Group::Device(DeviceKey::new("A", "D1"))),
            vec![conn("new")]
        );
    }

    #[tokio::test]
    async fn test_evicted_connection_cannot_announce_again() {
        tokio::time::pause();
        let router = Router::new();
        let mut op = operator(&router, "op", "A");
        let mut quiet = device(&router, "quiet", "A", "D1");
        drain(&mut op);

        tokio::time::advance(Duration::from_secs(301)).await;
        let timeout = Duration::from_secs(300);
        assert_eq!(router.sweep_stale(Instant::now(), timeout, 100), 1);
        assert_eq!(names(&drain(&mut op)), vec!["device:disconnected"]);

        // The transport has not closed yet when the device re-announces.
        assert_eq!(
            router.dispatch(
                &conn("quiet"),
                InboundEvent::Authenticate(Announce::device("A", "D1"))
            ),
            Err(RouterError::UnknownConnection(conn("quiet")))
        );
        assert!(drain(&mut op).is_empty());

        assert!(matches!(
            quiet.recv().await,
            Some(Delivery::Close(CloseReason::LivenessTimeout))
        ));
        assert!(quiet.recv().await.is_none());
        assert_eq!(router.disconnect(&conn("quiet")), None);
        assert!(drain(&mut op).is_empty());
    }

    #[tokio::test]
    async fn test_connect_enforces_connection_limit() {
        let router = Router::with_config(RouterConfig {
            max_connections: 2,
            ..RouterConfig::default()
        });
        let _a = open(&router, "a");
        let _b = open(&router, "b");

        assert_eq!(
            router.connect(&conn("c")).unwrap_err(),
            RouterError::ConnectionLimit(2)
        );
        assert_eq!(router.stats().connection_count, 2);

        router.disconnect(&conn("a"));
        assert!(router.connect(&conn("c")).is_ok());
    }

    #[tokio::test]
    async fn test_sweep_evicts_stale_devices() {
        tokio::time::pause();
        let router = Router::new();
        let mut op_a = operator(&router, "op-a", "A");
        let mut op_b = operator(&router, "op-b", "B");
        let mut quiet = device(&router, "quiet", "A", "D1");
        let _chatty = device(&router, "chatty", "A", "D2");
        drain(&mut op_a);

        let timeout = Duration::from_secs(300);
        tokio::time::advance(Duration::from_secs(200)).await;
        router
            .dispatch(&conn("chatty"), InboundEvent::Heartbeat(Heartbeat::default()))
            .unwrap();
        assert_eq!(router.sweep_stale(Instant::now(), timeout, 100), 0);

        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(router.sweep_stale(Instant::now(), timeout, 100), 1);

        assert_eq!(
            drain(&mut op_a),
            vec![OutboundEvent::DeviceDisconnected(DeviceDisconnected {
                device_id: OpaqueId::text("D1"),
                reason: Some(DisconnectReason::Timeout),
            })]
        );
        assert!(drain(&mut op_b).is_empty());

        match quiet.try_recv() {
            Ok(Delivery::Close(reason)) => assert_eq!(reason, CloseReason::LivenessTimeout),
            other => panic!("Expected close, got {:?}", other),
        }

        // The transport closing after eviction does not notify twice.
        assert_eq!(router.disconnect(&conn("quiet")), None);
        assert!(drain(&mut op_a).is_empty());
        assert_eq!(router.sweep_stale(Instant::now(), timeout, 100), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_affecting_others() {
        let router = Router::with_config(RouterConfig {
            mailbox_capacity: 2,
            ..RouterConfig::default()
        });
        let slow = router.connect(&conn("slow")).unwrap();
        router
            .dispatch(&conn("slow"), InboundEvent::Authenticate(Announce::operator("A")))
            .unwrap();
        let mut fast = operator(&router, "fast", "A");
        let _dev = device(&router, "dev", "A", "D1");
        drain(&mut fast);

        // The slow operator's queue already holds its welcome and ack.
        let delivered = router
            .dispatch(&conn("dev"), InboundEvent::CallInitiated(call("D1")))
            .unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(names(&drain(&mut fast)), vec!["call:initiated"]);
        assert_eq!(router.stats().dropped_deliveries, 2);
        drop(slow);
    }

    #[tokio::test]
    async fn test_no_dangling_bindings_after_disconnects() {
        let router = Router::new();
        let _op = operator(&router, "op", "A");
        let _d1 = device(&router, "d1", "A", "D1");
        let _d2 = device(&router, "d2", "B", "D2");

        for id in ["d1", "op", "d2"] {
            router.disconnect(&conn(id));
            assert_eq!(router.binding(&conn(id)), None);
        }
        assert_eq!(router.stats(), RouterStats::default());
    }
}
