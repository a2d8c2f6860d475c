//! Basic type definitions for the hub
//!
//! Provides newtype wrappers for type safety:
//! - `UserId`: numeric user identifier assigned by persistence
//! - `ConnectionId`: UUID-based handle for one live connection
//! - `Frame`: a serialized envelope shared across fan-out targets

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric user identifier (newtype pattern)
///
/// Serialized transparently as a JSON integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// IDs issued by persistence are always positive
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-connection handle
///
/// Two connections of the same user never share a `ConnectionId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pre-serialized envelope
///
/// The wire format does not depend on the recipient, so one serialization
/// is shared by every queue it is pushed to.
pub type Frame = Arc<str>;
