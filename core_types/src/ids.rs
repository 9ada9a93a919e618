//! Unique identifiers for system entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an environment
///
/// An environment is the unit of isolation: one address space, one fault
/// handler entry point, one run state. Identifiers are never reused, so a
/// stale id can never name a newer environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvId(Uuid);

impl EnvId {
    /// Creates a new random environment ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an environment ID from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EnvId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env:{}", self.0)
    }
}
