//! Error types for fork and the copy-on-write handler

use core_types::{EnvId, FaultCause, PteFlags, VirtAddr};
use kernel_api::{EnvPanic, KernelError};
use thiserror::Error;

/// Errors returned to the parent by `fork`
///
/// A failure after `exofork` leaves the child allocated but never runnable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForkError {
    #[error("Failed to install page fault handler: {0}")]
    InstallHandler(#[source] KernelError),

    #[error("Failed to create child environment: {0}")]
    Exofork(#[source] KernelError),

    #[error("Failed to duplicate page at {va}: {source}")]
    DuplicatePage {
        va: VirtAddr,
        #[source]
        source: KernelError,
    },

    #[error("Failed to set up child exception stack: {0}")]
    ExceptionStack(#[source] KernelError),

    #[error("Failed to register child fault upcall: {0}")]
    SetUpcall(#[source] KernelError),

    #[error("Failed to mark child runnable: {0}")]
    SetStatus(#[source] KernelError),
}

/// Fatal conditions detected by the page fault handler
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PgFaultError {
    /// Only write faults are ever repaired
    #[error("pgfault: not a write fault at {va} (err {err:?})")]
    NotAWrite { va: VirtAddr, err: FaultCause },

    /// Written page was never shared copy-on-write
    #[error("pgfault: write to non-copy-on-write page at {va} (perm {perm:?})")]
    NotCopyOnWrite { va: VirtAddr, perm: PteFlags },

    /// A kernel primitive failed mid-repair
    #[error("pgfault: {op} failed at {va}: {source}")]
    Kernel {
        op: &'static str,
        va: VirtAddr,
        #[source]
        source: KernelError,
    },
}

impl PgFaultError {
    /// Converts into the diagnostic the trap trampoline reports
    pub fn into_panic(self, env: EnvId) -> EnvPanic {
        EnvPanic::new(env, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fork_error_display() {
        let err = ForkError::DuplicatePage {
            va: VirtAddr::new(0x0080_3000),
            source: KernelError::NoMemory,
        };
        assert_eq!(
            err.to_string(),
            "Failed to duplicate page at 0x00803000: Out of memory"
        );
    }

    #[test]
    fn test_pgfault_error_names_address() {
        let env = EnvId::new();
        let err = PgFaultError::NotAWrite {
            va: VirtAddr::new(0x0080_0004),
            err: FaultCause::USER,
        };

        let panic = err.into_panic(env);
        assert_eq!(panic.env, env);
        assert!(panic.message.contains("0x00800004"));
        assert!(panic.message.contains("not a write"));
    }
}
