//! Environment table entries for SimulatedKernel

use crate::address_space::AddressSpace;
use core_types::{EnvId, EnvInfo, EnvStatus, FaultCause, VirtAddr};
use kernel_api::UpcallEntry;
use serde::{Deserialize, Serialize};

/// Why an environment was destroyed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Faulted with no handler registered
    UnhandledFault { fault_va: VirtAddr, err: FaultCause },
    /// Exception stack missing, read-only or copy-on-write
    ExceptionStackInvalid { fault_va: VirtAddr },
    /// Nested faults ran off the bottom of the exception stack
    ExceptionStackOverflow { fault_va: VirtAddr },
    /// The handler kept returning without fixing the fault
    FaultLoop { fault_va: VirtAddr },
    /// The handler reported a fatal diagnostic
    Panicked { message: String },
    /// Destroyed on request
    Destroyed,
}

/// Record left behind by a destroyed environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitNotification {
    pub env_id: EnvId,
    pub reason: ExitReason,
}

/// Simulated kernel configuration
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Maximum number of live environments
    pub max_envs: usize,
    /// Physical frames available (data pages and page-table pages)
    pub max_frames: usize,
    /// Deliveries of the same fault before the environment is killed
    pub max_fault_retries: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_envs: 1024,
            max_frames: 4096,
            max_fault_retries: 8,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Env {
    pub id: EnvId,
    pub parent: Option<EnvId>,
    pub status: EnvStatus,
    pub space: AddressSpace,
    pub upcall: Option<UpcallEntry>,
    /// Next `exofork` in this environment returns `IsChild`
    pub pending_child_return: bool,
    /// Fault records currently on the exception stack
    pub fault_depth: u32,
}

impl Env {
    pub fn new(parent: Option<EnvId>, status: EnvStatus) -> Self {
        Self {
            id: EnvId::new(),
            parent,
            status,
            space: AddressSpace::new(),
            upcall: None,
            pending_child_return: parent.is_some(),
            fault_depth: 0,
        }
    }

    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            env_id: self.id,
            parent_id: self.parent,
            status: self.status,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_starts_with_pending_return() {
        let parent = Env::new(None, EnvStatus::Running);
        let child = Env::new(Some(parent.id), EnvStatus::NotRunnable);

        assert!(!parent.pending_child_return);
        assert!(child.pending_child_return);
        assert_eq!(child.info().parent_id, Some(parent.id));
    }

    #[test]
    fn test_exit_notification_serialization() {
        let note = ExitNotification {
            env_id: EnvId::new(),
            reason: ExitReason::FaultLoop {
                fault_va: VirtAddr::new(0x0080_0000),
            },
        };

        let json = serde_json::to_string(&note).unwrap();
        let back: ExitNotification = serde_json::from_str(&json).unwrap();
        assert_eq!(back, note);
    }
}
