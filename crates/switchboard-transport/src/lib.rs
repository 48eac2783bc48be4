//! # switchboard-transport
//!
//! Transport abstraction layer for Switchboard.
//!
//! - **WebSocket** - Dashboards and devices connect through axum's upgrade
//! - **Memory** - Channel-backed connections for tests and embedding
//!
//! ## Transport Abstraction
//!
//! Every transport implements [`Connection`], so the session driver never
//! sees the underlying protocol.
//!
//! ```rust,ignore
//! use switchboard_transport::Connection;
//!
//! async fn handle_connection(mut conn: impl Connection) {
//!     while let Ok(Some(message)) = conn.recv().await {
//!         // Decode and dispatch
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;
pub mod websocket;

pub use memory::{MemoryConnection, MemoryFrame, MemoryPeer};
pub use traits::{Connection, TransportError};
pub use websocket::AxumConnection;
