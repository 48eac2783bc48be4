//! # switchboard-protocol
//!
//! Wire protocol definitions for Switchboard, the coordination server between
//! operator dashboards and outbound-calling devices.
//!
//! ## Events
//!
//! - `authenticate` / `authenticated` - Identity announcement
//! - `campaign:*` - Campaign lifecycle signaling to devices
//! - `call:*`, `dtmf:*` - Per-call telemetry from devices
//! - `heartbeat` / `heartbeat:ack` - Device liveness
//!
//! ## Example
//!
//! ```rust
//! use switchboard_protocol::{codec, Encoding, InboundEvent, WireMessage};
//!
//! let message = WireMessage::Text(r#"{"event":"heartbeat","data":{"deviceId":"D1"}}"#.into());
//! let event: InboundEvent = codec::decode(&message).unwrap();
//! assert_eq!(event.name(), "heartbeat");
//!
//! let reply = codec::encode(&event, Encoding::MessagePack).unwrap();
//! assert_eq!(reply.encoding(), Encoding::MessagePack);
//! ```

pub mod codec;
pub mod events;
pub mod ids;
pub mod version;

pub use codec::{decode, encode, event_name, Encoding, ProtocolError, WireMessage};
pub use events::{
    unix_millis, Announce, AuthResult, CallEnded, CallEvent, CampaignAction, CampaignCommand,
    CampaignControl, CampaignSummary, DeviceConnected, DeviceDisconnected, DeviceStatus,
    DisconnectReason, DtmfInput, ErrorNotice, Heartbeat, HeartbeatAck, InboundEvent,
    NotificationKind, NotificationReceived, NotificationSend, OutboundEvent, PeerKind, Stamped,
    UploadProgress, Welcome,
};
pub use ids::{ConnectionId, OpaqueId};
pub use version::{Version, PROTOCOL_VERSION};
