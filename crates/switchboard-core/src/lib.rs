//! # switchboard-core
//!
//! Connection registry, identity binding and event routing for Switchboard.
//!
//! - **Registry** - Live connections, their bindings and routing indices
//! - **Router** - Resolves each inbound event to its destinations
//! - **Liveness** - Evicts devices that stop sending heartbeats
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   ▲
//!        │  mailbox          │                   │ sweep
//!        └───────────────────┘            ┌─────────────┐
//!                                         │  Liveness   │
//!                                         └─────────────┘
//! ```

pub mod binding;
pub mod group;
pub mod liveness;
pub mod message;
pub mod registry;
pub mod router;

pub use binding::{Binding, DeviceBinding, Liveness, OperatorBinding};
pub use group::{DeviceKey, Group};
pub use liveness::{LivenessConfig, LivenessMonitor};
pub use message::{CloseReason, Delivery};
pub use registry::{BindOutcome, ConnectionState, Registry, RegistryError, RegistryStats};
pub use router::{Router, RouterConfig, RouterError, RouterStats};
