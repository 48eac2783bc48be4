//! Identifier types shared by the protocol, the router and the transports.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let seq = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{millis:x}_{seq:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An identifier owned by an external system (account, device, campaign,
/// contact, call, upload).
///
/// Peers may send these as strings or integers. The original form is kept so
/// the value is echoed back exactly as received, while equality and hashing
/// use the canonical string form: `7` and `"7"` name the same entity.
#[derive(Debug, Clone)]
pub struct OpaqueId {
    key: String,
    numeric: bool,
}

impl OpaqueId {
    /// Create a string identifier.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            key: value.into(),
            numeric: false,
        }
    }

    /// Create an integer identifier.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self {
            key: value.to_string(),
            numeric: true,
        }
    }

    /// Canonical string form used for routing.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Whether the identifier was received as an integer.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        self.numeric
    }

    /// An empty or whitespace-only string does not identify anything.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.key.trim().is_empty()
    }
}

impl PartialEq for OpaqueId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for OpaqueId {}

impl Hash for OpaqueId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for OpaqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl From<&str> for OpaqueId {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for OpaqueId {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

impl From<i64> for OpaqueId {
    fn from(n: i64) -> Self {
        Self::int(n)
    }
}

impl Serialize for OpaqueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.numeric {
            if let Ok(n) = self.key.parse::<i64>() {
                return serializer.serialize_i64(n);
            }
            if let Ok(n) = self.key.parse::<u64>() {
                return serializer.serialize_u64(n);
            }
        }
        serializer.serialize_str(&self.key)
    }
}

struct OpaqueIdVisitor;

impl<'de> Visitor<'de> for OpaqueIdVisitor {
    type Value = OpaqueId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer identifier")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(OpaqueId::int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(OpaqueId {
            key: v.to_string(),
            numeric: true,
        })
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(OpaqueId::text(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(OpaqueId::text(v))
    }
}

impl<'de> Deserialize<'de> for OpaqueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OpaqueIdVisitor)
    }
}
