//! Kernel API traits and upcall types

use crate::KernelError;
use core_types::{EnvId, EnvInfo, EnvStatus, PageNum, PteFlags, UTrapframe, VirtAddr};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result of asking the kernel for a new child environment
///
/// The creation call returns twice: once in the creator, once in the child
/// when it first runs. The two returns are distinguished by variant rather
/// than by comparing an integer against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exofork {
    /// Running in the creator; the new child has this id
    ParentOf(EnvId),
    /// Running in the freshly created child
    IsChild,
}

/// A user-level fatal diagnostic
///
/// A fault handler returns this when it meets a fault it must not repair.
/// The kernel destroys the faulting environment and keeps the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{env} panicked: {message}")]
pub struct EnvPanic {
    pub env: EnvId,
    pub message: String,
}

impl EnvPanic {
    pub fn new(env: EnvId, message: impl Into<String>) -> Self {
        Self {
            env,
            message: message.into(),
        }
    }
}

/// What a fault handler reports back to the trap trampoline
pub type UpcallResult = Result<(), EnvPanic>;

/// Signature of a user page-fault handler
///
/// Runs on the faulting environment's exception stack with the environment
/// itself as `sys`.
pub type UpcallFn = fn(&mut dyn UserEnv, &UTrapframe) -> UpcallResult;

/// Fault-handler entry point registered with the kernel
///
/// Two entries compare equal when they hold the same function address.
/// That is a best-effort identity: the compiler may merge handlers with
/// identical bodies, or give one handler different addresses in different
/// codegen units. Callers use equality only to skip redundant
/// re-registration, so a spurious mismatch costs one extra
/// `env_set_pgfault_upcall` and a spurious match needs handlers that
/// behave identically anyway.
#[derive(Clone, Copy)]
pub struct UpcallEntry(UpcallFn);

impl UpcallEntry {
    pub fn new(handler: UpcallFn) -> Self {
        Self(handler)
    }

    /// Invokes the handler for one fault
    pub fn call(&self, sys: &mut dyn UserEnv, utf: &UTrapframe) -> UpcallResult {
        (self.0)(sys, utf)
    }

    fn addr(&self) -> usize {
        self.0 as usize
    }
}

// Address comparison, see the type docs
impl PartialEq for UpcallEntry {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for UpcallEntry {}

impl fmt::Debug for UpcallEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpcallEntry({:#x})", self.addr())
    }
}

/// The kernel API trait
///
/// Every call acts as the current environment. Calls that name another
/// environment only succeed if that environment is the caller itself or a
/// direct child of the caller.
///
/// Multiple implementations are possible:
/// - Simulated kernel (for testing)
/// - Real kernel (traps)
///
/// # Example
///
/// ```
/// use core_types::{layout::UTEXT, PteFlags};
/// use kernel_api::{KernelApi, KernelError};
///
/// fn scratch_page<K: KernelApi>(kernel: &mut K) -> Result<(), KernelError> {
///     let me = kernel.getenvid();
///     kernel.page_alloc(me, UTEXT, PteFlags::user_rw())
/// }
/// ```
pub trait KernelApi {
    /// Returns the caller's own environment id
    fn getenvid(&self) -> EnvId;

    /// Allocates a zeroed physical page and maps it at `va` in `env`
    ///
    /// Any page already mapped at `va` is unmapped first.
    ///
    /// # Arguments
    ///
    /// * `env` - Target environment (caller or a child)
    /// * `va` - Page-aligned address below `UTOP`
    /// * `perm` - Must contain `PRESENT | USER` and be a subset of `SYSCALL`
    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PteFlags)
        -> Result<(), KernelError>;

    /// Maps the physical page behind `src_va` in `src_env` at `dst_va` in `dst_env`
    ///
    /// Replaces any mapping already present at the destination. Asking for
    /// `WRITABLE` when the source mapping is read-only is rejected.
    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError>;

    /// Unmaps `va` in `env`; succeeds silently if nothing is mapped there
    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), KernelError>;

    /// Creates a child with an empty address space, not runnable
    ///
    /// The creator gets [`Exofork::ParentOf`]; the child, when it first
    /// runs, gets [`Exofork::IsChild`].
    fn exofork(&mut self) -> Result<Exofork, KernelError>;

    /// Registers the page-fault entry point for `env`
    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: UpcallEntry)
        -> Result<(), KernelError>;

    /// Sets `env` to `Runnable` or `NotRunnable`
    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), KernelError>;
}

/// Read-only view of the caller's own page tables
///
/// Absent entries read as empty flags.
pub trait PageTableView {
    /// Page-directory entry `pdx`
    fn pde(&self, pdx: u32) -> PteFlags;

    /// Leaf entry for page `pn`; empty if its directory entry is absent
    fn pte(&self, pn: PageNum) -> PteFlags;
}

/// Read-only view of the environment table
pub trait EnvTableView {
    fn env_entry(&self, env: EnvId) -> Option<EnvInfo>;
}

/// User-mode memory accesses in the current environment
///
/// An access that violates the current mappings traps. The kernel delivers
/// the fault to the registered handler and retries the access; if the
/// environment is destroyed instead, the access fails with
/// [`KernelError::EnvDestroyed`].
pub trait UserMemory {
    fn load(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), KernelError>;

    fn store(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), KernelError>;
}

/// Everything user code running in an environment can reach
pub trait UserEnv: KernelApi + PageTableView + EnvTableView + UserMemory {}

impl<T: KernelApi + PageTableView + EnvTableView + UserMemory> UserEnv for T {}
