//! Kernel error types

use core_types::{EnvId, PteFlags, VirtAddr};
use thiserror::Error;

/// Errors returned by kernel primitives
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Environment does not exist, or the caller may not act on it
    #[error("Bad environment: {0}")]
    BadEnv(EnvId),

    /// Environment table is full
    #[error("No free environment")]
    NoFreeEnv,

    /// Out of physical frames
    #[error("Out of memory")]
    NoMemory,

    /// Address above UTOP or not page aligned
    #[error("Invalid address: {0}")]
    InvalidAddress(VirtAddr),

    /// Permission set rejected
    #[error("Invalid permissions: {0:?}")]
    InvalidPermissions(PteFlags),

    /// Source page of a mapping is not present
    #[error("No page mapped at {0}")]
    NotMapped(VirtAddr),

    /// Requested run-state transition is not allowed
    #[error("Invalid status transition")]
    InvalidStatus,

    /// The environment was destroyed while performing the operation
    #[error("Environment destroyed: {0}")]
    EnvDestroyed(EnvId),
}
