//! Fork Test Utilities
//!
//! This crate provides shared utilities for fork integration tests.
//!
//! ## Test Philosophy
//!
//! - **Isolation**: After a copy-on-write fork, no write by one side is ever
//!   visible to the other
//! - **Deterministic failures**: Kernel failures are reproduced via FaultPlan
//! - **Contained faults**: A broken handler kills its own environment only
//!
//! Tests drive both sides of a fork on one [`SimulatedKernel`]. A child is
//! entered by switching to it and calling fork again with a copy of the
//! parent's [`EnvContext`], which is how the child resumes at `exofork`.

use core_types::{EnvId, VirtAddr};
use kernel_api::{KernelApi, KernelError, UserMemory};
use sim_kernel::SimulatedKernel;
use user_fork::{fork, EnvContext, ForkError, ForkOutcome};

/// A heap address well inside the duplicated window
pub const HEAP: VirtAddr = VirtAddr::new(0x0100_0000);

/// Bootstrap helper for tests
///
/// Creates a kernel and the boot environment's context.
pub fn test_bootstrap() -> (SimulatedKernel, EnvContext) {
    let kernel = SimulatedKernel::new();
    let ctx = EnvContext::start(&kernel);
    (kernel, ctx)
}

/// Forks as the parent, returning the child and the context it inherits
pub fn fork_child(
    kernel: &mut SimulatedKernel,
    ctx: &mut EnvContext,
) -> Result<(EnvId, EnvContext), ForkError> {
    match fork(ctx, kernel)? {
        ForkOutcome::Parent(child) => Ok((child, ctx.clone())),
        ForkOutcome::Child => panic!("fork_child called from a child"),
    }
}

/// Switches to `child` and completes its side of the fork
pub fn enter_child(
    kernel: &mut SimulatedKernel,
    child: EnvId,
    mut inherited: EnvContext,
) -> EnvContext {
    kernel.run(child).unwrap();
    let outcome = fork(&mut inherited, kernel).unwrap();
    assert_eq!(outcome, ForkOutcome::Child);
    inherited
}

/// Stores `value` at `va` as the running environment
pub fn write_u32(kernel: &mut SimulatedKernel, va: VirtAddr, value: u32) -> Result<(), KernelError> {
    kernel.store(va, &value.to_le_bytes())
}

/// Loads a `u32` from `va` as the running environment
pub fn read_u32(kernel: &mut SimulatedKernel, va: VirtAddr) -> Result<u32, KernelError> {
    let mut buf = [0u8; 4];
    kernel.load(va, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Allocates a writable page at `va` for the running environment
pub fn alloc_rw(kernel: &mut SimulatedKernel, va: VirtAddr) -> Result<(), KernelError> {
    let me = kernel.getenvid();
    kernel.page_alloc(me, va.round_down(), core_types::PteFlags::user_rw())
}
