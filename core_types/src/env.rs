//! Environment run state and environment-table entries

use crate::EnvId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of an environment
///
/// The kernel owns this state; user space only requests transitions
/// (`NotRunnable` <-> `Runnable`) through `env_set_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvStatus {
    /// Slot released, address space torn down
    Free,
    /// Being torn down
    Dying,
    /// Ready to be scheduled
    Runnable,
    /// Currently executing
    Running,
    /// Exists but must not be scheduled (e.g. a child still being built)
    NotRunnable,
}

impl EnvStatus {
    /// Whether the environment still exists in the table
    pub fn is_alive(&self) -> bool {
        !matches!(self, EnvStatus::Free | EnvStatus::Dying)
    }
}

impl fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvStatus::Free => write!(f, "Free"),
            EnvStatus::Dying => write!(f, "Dying"),
            EnvStatus::Runnable => write!(f, "Runnable"),
            EnvStatus::Running => write!(f, "Running"),
            EnvStatus::NotRunnable => write!(f, "NotRunnable"),
        }
    }
}

/// Read-only snapshot of one environment-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvInfo {
    pub env_id: EnvId,
    /// Creator of this environment, `None` for the boot environment
    pub parent_id: Option<EnvId>,
    pub status: EnvStatus,
}
