//! Connection identifiers.
//!
//! A [`ConnectionId`] is the caller-chosen `u64` a client connects under. It
//! is both the registry key and the destination address of a relay frame.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address of a relay connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw `u64` value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Parse the identifier out of a request path such as `/42`.
    ///
    /// Exactly one leading slash is stripped; the remainder must be a plain
    /// decimal number.
    pub fn from_path(path: &str) -> Result<Self, InvalidConnectionId> {
        path.strip_prefix('/').unwrap_or(path).parse()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<ConnectionId> for u64 {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

/// A path segment that is not a decimal `u64`.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid connection id: {input:?}")]
pub struct InvalidConnectionId {
    /// The rejected input.
    pub input: String,
}

impl FromStr for ConnectionId {
    type Err = InvalidConnectionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidConnectionId {
            input: s.to_string(),
        };
        // u64::from_str would also take a leading '+'
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        s.parse::<u64>().map(Self).map_err(|_| invalid())
    }
}
