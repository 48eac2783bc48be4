//! Event types for the Switchboard protocol.
//!
//! Every transport message carries exactly one event envelope:
//!
//! ```json
//! {"event": "heartbeat", "data": {"deviceId": "D1"}}
//! ```
//!
//! Inbound events are what dashboards and devices send; outbound events are
//! what the server emits. Payload field names are camelCase on the wire.

use crate::ids::{ConnectionId, OpaqueId};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The role a connection claims when it announces itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerKind {
    /// A dashboard session.
    #[default]
    #[serde(rename = "web", alias = "operator")]
    Operator,
    /// A calling device.
    #[serde(rename = "device")]
    Device,
}

/// Campaign lifecycle actions an operator can signal to devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignAction {
    Start,
    Pause,
    Stop,
}

impl CampaignAction {
    /// Past-tense label used in logs.
    #[must_use]
    pub fn past_tense(self) -> &'static str {
        match self {
            CampaignAction::Start => "started",
            CampaignAction::Pause => "paused",
            CampaignAction::Stop => "stopped",
        }
    }
}

/// Notification severity shown by the dashboard.
///
/// Unrecognized kinds are passed through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Other(String),
}

impl NotificationKind {
    /// Wire form of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
            NotificationKind::Other(kind) => kind,
        }
    }
}

impl From<String> for NotificationKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "info" => NotificationKind::Info,
            "success" => NotificationKind::Success,
            "warning" => NotificationKind::Warning,
            "error" => NotificationKind::Error,
            _ => NotificationKind::Other(kind),
        }
    }
}

impl From<NotificationKind> for String {
    fn from(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

/// Why a device disappeared, when it was not a clean transport close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectReason {
    /// The device stopped sending heartbeats.
    Timeout,
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// Identity announcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announce {
    /// Owning account.
    #[serde(default, alias = "accountId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<OpaqueId>,
    #[serde(default)]
    pub user_type: PeerKind,
    /// Required when `user_type` is `device`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
    /// Protocol version the peer speaks, if it declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<Version>,
}

impl Announce {
    /// Announce as an operator of `account`.
    #[must_use]
    pub fn operator(account: impl Into<OpaqueId>) -> Self {
        Self {
            user_id: Some(account.into()),
            ..Self::default()
        }
    }

    /// Announce as `device` owned by `account`.
    #[must_use]
    pub fn device(account: impl Into<OpaqueId>, device: impl Into<OpaqueId>) -> Self {
        Self {
            user_id: Some(account.into()),
            user_type: PeerKind::Device,
            device_id: Some(device.into()),
            protocol_version: None,
        }
    }
}

/// Campaign control request from an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignControl {
    pub campaign_id: OpaqueId,
    #[serde(default)]
    pub device_ids: Vec<OpaqueId>,
}

/// Call initiation or answer reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub call_id: OpaqueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<OpaqueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<OpaqueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
}

/// Call completion reported by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEnded {
    pub call_id: OpaqueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<OpaqueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<OpaqueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
    /// Call duration in seconds, integral or fractional as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<serde_json::Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtmf_response: Option<String>,
}

/// A keypad digit pressed by the callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtmfInput {
    pub call_id: OpaqueId,
    /// Sent as a one-character string or a bare integer.
    pub digit: OpaqueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
}

impl DtmfInput {
    /// DTMF has sixteen tones: 0-9, `*`, `#` and A-D.
    #[must_use]
    pub fn has_valid_digit(&self) -> bool {
        let mut chars = self.digit.as_str().chars();
        matches!(
            (chars.next(), chars.next()),
            (Some('0'..='9' | '*' | '#' | 'A'..='D'), None)
        )
    }
}

/// Device health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
}

/// Notification addressed to an account's dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSend {
    #[serde(alias = "accountId")]
    pub user_id: OpaqueId,
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: NotificationKind,
}

/// Device liveness signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
}

/// Upload progress tick from a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: OpaqueId,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Events sent by dashboards and devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "authenticate")]
    Authenticate(Announce),
    #[serde(rename = "campaign:start")]
    CampaignStart(CampaignControl),
    #[serde(rename = "campaign:pause")]
    CampaignPause(CampaignControl),
    #[serde(rename = "campaign:stop")]
    CampaignStop(CampaignControl),
    #[serde(rename = "call:initiated")]
    CallInitiated(CallEvent),
    #[serde(rename = "call:answered")]
    CallAnswered(CallEvent),
    #[serde(rename = "call:ended")]
    CallEnded(CallEnded),
    #[serde(rename = "dtmf:input")]
    DtmfInput(DtmfInput),
    #[serde(rename = "device:status")]
    DeviceStatus(DeviceStatus),
    #[serde(rename = "notification:send")]
    NotificationSend(NotificationSend),
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),
    #[serde(rename = "upload:progress")]
    UploadProgress(UploadProgress),
}

impl InboundEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Authenticate(_) => "authenticate",
            InboundEvent::CampaignStart(_) => "campaign:start",
            InboundEvent::CampaignPause(_) => "campaign:pause",
            InboundEvent::CampaignStop(_) => "campaign:stop",
            InboundEvent::CallInitiated(_) => "call:initiated",
            InboundEvent::CallAnswered(_) => "call:answered",
            InboundEvent::CallEnded(_) => "call:ended",
            InboundEvent::DtmfInput(_) => "dtmf:input",
            InboundEvent::DeviceStatus(_) => "device:status",
            InboundEvent::NotificationSend(_) => "notification:send",
            InboundEvent::Heartbeat(_) => "heartbeat",
            InboundEvent::UploadProgress(_) => "upload:progress",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

/// First event on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: ConnectionId,
    pub version: Version,
    /// How often devices are expected to send `heartbeat`.
    pub heartbeat_interval_ms: u64,
}

/// Outcome of an announce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthResult {
    #[must_use]
    pub fn accepted() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConnected {
    pub device_id: OpaqueId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDisconnected {
    pub device_id: OpaqueId,
    /// Absent for a clean transport close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DisconnectReason>,
}

/// Campaign command delivered to a single device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignCommand {
    pub campaign_id: OpaqueId,
    pub timestamp: u64,
}

/// Campaign confirmation delivered to the operator's account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub campaign_id: OpaqueId,
    pub device_ids: Vec<OpaqueId>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReceived {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub timestamp: u64,
}

/// Tells a bound sender why its event was refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub server_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<OpaqueId>,
}

/// A relayed payload with the server's receive time attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    #[serde(flatten)]
    pub payload: T,
    pub timestamp: u64,
}

impl<T> Stamped<T> {
    /// Stamp `payload` with the current time.
    #[must_use]
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            timestamp: unix_millis(),
        }
    }
}

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "connected")]
    Connected(Welcome),
    #[serde(rename = "authenticated")]
    Authenticated(AuthResult),
    #[serde(rename = "device:connected")]
    DeviceConnected(DeviceConnected),
    #[serde(rename = "device:disconnected")]
    DeviceDisconnected(DeviceDisconnected),
    #[serde(rename = "campaign:start")]
    CampaignStart(CampaignCommand),
    #[serde(rename = "campaign:pause")]
    CampaignPause(CampaignCommand),
    #[serde(rename = "campaign:stop")]
    CampaignStop(CampaignCommand),
    #[serde(rename = "campaign:started")]
    CampaignStarted(CampaignSummary),
    #[serde(rename = "campaign:paused")]
    CampaignPaused(CampaignSummary),
    #[serde(rename = "campaign:stopped")]
    CampaignStopped(CampaignSummary),
    #[serde(rename = "call:initiated")]
    CallInitiated(Stamped<CallEvent>),
    #[serde(rename = "call:answered")]
    CallAnswered(Stamped<CallEvent>),
    #[serde(rename = "call:ended")]
    CallEnded(Stamped<CallEnded>),
    #[serde(rename = "dtmf:received")]
    DtmfReceived(Stamped<DtmfInput>),
    #[serde(rename = "device:statusUpdate")]
    DeviceStatusUpdate(Stamped<DeviceStatus>),
    #[serde(rename = "notification:received")]
    NotificationReceived(NotificationReceived),
    #[serde(rename = "heartbeat:ack")]
    HeartbeatAck(HeartbeatAck),
    #[serde(rename = "upload:progressUpdate")]
    UploadProgressUpdate(Stamped<UploadProgress>),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl OutboundEvent {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Connected(_) => "connected",
            OutboundEvent::Authenticated(_) => "authenticated",
            OutboundEvent::DeviceConnected(_) => "device:connected",
            OutboundEvent::DeviceDisconnected(_) => "device:disconnected",
            OutboundEvent::CampaignStart(_) => "campaign:start",
            OutboundEvent::CampaignPause(_) => "campaign:pause",
            OutboundEvent::CampaignStop(_) => "campaign:stop",
            OutboundEvent::CampaignStarted(_) => "campaign:started",
            OutboundEvent::CampaignPaused(_) => "campaign:paused",
            OutboundEvent::CampaignStopped(_) => "campaign:stopped",
            OutboundEvent::CallInitiated(_) => "call:initiated",
            OutboundEvent::CallAnswered(_) => "call:answered",
            OutboundEvent::CallEnded(_) => "call:ended",
            OutboundEvent::DtmfReceived(_) => "dtmf:received",
            OutboundEvent::DeviceStatusUpdate(_) => "device:statusUpdate",
            OutboundEvent::NotificationReceived(_) => "notification:received",
            OutboundEvent::HeartbeatAck(_) => "heartbeat:ack",
            OutboundEvent::UploadProgressUpdate(_) => "upload:progressUpdate",
            OutboundEvent::Error(_) => "error",
        }
    }

    /// Per-device campaign command for `action`.
    #[must_use]
    pub fn campaign_command(action: CampaignAction, command: CampaignCommand) -> Self {
        match action {
            CampaignAction::Start => OutboundEvent::CampaignStart(command),
            CampaignAction::Pause => OutboundEvent::CampaignPause(command),
            CampaignAction::Stop => OutboundEvent::CampaignStop(command),
        }
    }

    /// Operator-side confirmation for `action`.
    #[must_use]
    pub fn campaign_summary(action: CampaignAction, summary: CampaignSummary) -> Self {
        match action {
            CampaignAction::Start => OutboundEvent::CampaignStarted(summary),
            CampaignAction::Pause => OutboundEvent::CampaignPaused(summary),
            CampaignAction::Stop => OutboundEvent::CampaignStopped(summary),
        }
    }

    /// Create an `authenticated` event.
    #[must_use]
    pub fn authenticated(result: AuthResult) -> Self {
        OutboundEvent::Authenticated(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inbound_envelope_shape() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "campaign:start",
            "data": {"campaignId": 7, "deviceIds": ["D1", "D2"]}
        }))
        .unwrap();

        match event {
            InboundEvent::CampaignStart(control) => {
                assert_eq!(control.campaign_id, OpaqueId::int(7));
                assert_eq!(control.device_ids.len(), 2);
            }
            other => panic!("Expected CampaignStart, got {:?}", other),
        }
    }

    #[test]
    fn test_announce_defaults_to_operator() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "authenticate",
            "data": {"userId": "A"}
        }))
        .unwrap();
        assert_eq!(event, InboundEvent::Authenticate(Announce::operator("A")));
    }

    #[test]
    fn test_announce_accepts_account_id_alias() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "authenticate",
            "data": {"accountId": 12, "userType": "device", "deviceId": "D1"}
        }))
        .unwrap();
        assert_eq!(event, InboundEvent::Authenticate(Announce::device(12_i64, "D1")));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_value::<InboundEvent>(json!({
            "event": "campaign:explode",
            "data": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_notification_type_field() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "notification:send",
            "data": {"userId": "A", "message": "done"}
        }))
        .unwrap();
        match event {
            InboundEvent::NotificationSend(n) => assert_eq!(n.kind, NotificationKind::Info),
            other => panic!("Expected NotificationSend, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_notification_kind_passes_through() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "notification:send",
            "data": {"userId": "A", "message": "check D4", "type": "alert"}
        }))
        .unwrap();
        let n = match event {
            InboundEvent::NotificationSend(n) => n,
            other => panic!("Expected NotificationSend, got {:?}", other),
        };
        assert_eq!(n.kind, NotificationKind::Other("alert".into()));

        let received = OutboundEvent::NotificationReceived(NotificationReceived {
            message: n.message,
            kind: n.kind,
            timestamp: 1,
        });
        let value = serde_json::to_value(&received).unwrap();
        assert_eq!(value["data"]["type"], "alert");

        let warning: NotificationKind = serde_json::from_value(json!("warning")).unwrap();
        assert_eq!(warning, NotificationKind::Warning);
    }

    #[test]
    fn test_device_payloads_keep_loose_values() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "dtmf:input",
            "data": {"callId": "c1", "digit": 5}
        }))
        .unwrap();
        let input = match event {
            InboundEvent::DtmfInput(input) => input,
            other => panic!("Expected DtmfInput, got {:?}", other),
        };
        assert!(input.has_valid_digit());
        assert_eq!(serde_json::to_value(&input).unwrap()["digit"], json!(5));

        let event: InboundEvent = serde_json::from_value(json!({
            "event": "call:ended",
            "data": {"callId": "c1", "duration": 12.5}
        }))
        .unwrap();
        let ended = match event {
            InboundEvent::CallEnded(ended) => ended,
            other => panic!("Expected CallEnded, got {:?}", other),
        };
        assert_eq!(serde_json::to_value(&ended).unwrap()["duration"], json!(12.5));

        let event: InboundEvent = serde_json::from_value(json!({
            "event": "device:status",
            "data": {"deviceId": "D1", "batteryLevel": 40}
        }))
        .unwrap();
        let status = match event {
            InboundEvent::DeviceStatus(status) => status,
            other => panic!("Expected DeviceStatus, got {:?}", other),
        };
        assert_eq!(status.status, None);
        assert_eq!(status.battery_level, Some(40.0));
    }

    #[test]
    fn test_stamped_payload_is_flat() {
        let event = OutboundEvent::DtmfReceived(Stamped {
            payload: DtmfInput {
                call_id: OpaqueId::text("c1"),
                digit: "5".into(),
                device_id: Some(OpaqueId::text("D1")),
            },
            timestamp: 1000,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "dtmf:received",
                "data": {"callId": "c1", "digit": "5", "deviceId": "D1", "timestamp": 1000}
            })
        );
    }

    #[test]
    fn test_clean_disconnect_omits_reason() {
        let event = OutboundEvent::DeviceDisconnected(DeviceDisconnected {
            device_id: OpaqueId::text("D1"),
            reason: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"], json!({"deviceId": "D1"}));
    }

    #[test]
    fn test_dtmf_digit_validation() {
        let mut input = DtmfInput {
            call_id: OpaqueId::int(1),
            digit: "#".into(),
            device_id: None,
        };
        assert!(input.has_valid_digit());
        input.digit = "12".into();
        assert!(!input.has_valid_digit());
        input.digit = "E".into();
        assert!(!input.has_valid_digit());
    }

    #[test]
    fn test_event_names_match_wire() {
        let event = OutboundEvent::HeartbeatAck(HeartbeatAck {
            server_time: 1,
            device_id: None,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
    }
}
