//! Protocol versioning.
//!
//! Versions travel as `"major.minor"` strings. A peer declaring a different
//! major version is refused at announce time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// Breaking changes increment this.
    pub major: u8,
    /// Backwards-compatible changes increment this.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.split_once('.').unwrap_or((s, "0"));
        let parse = |part: &str| {
            part.trim()
                .parse::<u8>()
                .map_err(|_| format!("invalid protocol version: {s}"))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
