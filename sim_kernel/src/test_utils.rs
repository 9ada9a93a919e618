//! Test utilities for fork scenarios
//!
//! This module provides helper functions for setting up user address
//! spaces and checking their contents from tests.

use crate::fault_injection::FaultPlan;
use crate::SimulatedKernel;
use core_types::{EnvId, PteFlags, VirtAddr, PGSIZE};
use kernel_api::{KernelApi, KernelError};

/// Runs a test with a fault plan applied
///
/// This is a convenience helper that creates a kernel with the given
/// fault plan and passes it to the test closure.
///
/// # Example
///
/// ```
/// use sim_kernel::test_utils::with_fault_plan;
/// use sim_kernel::fault_injection::{FaultPlan, LifecycleFault};
/// use kernel_api::{KernelApi, KernelError};
///
/// with_fault_plan(
///     FaultPlan::new().with_lifecycle_fault(LifecycleFault::FailExofork),
///     |kernel| {
///         assert_eq!(kernel.exofork(), Err(KernelError::NoFreeEnv));
///     }
/// );
/// ```
pub fn with_fault_plan<F>(plan: FaultPlan, f: F)
where
    F: FnOnce(&mut SimulatedKernel),
{
    let mut kernel = SimulatedKernel::new().with_fault_plan(plan);
    f(&mut kernel);
}

/// Maps `count` consecutive fresh pages in the current environment
///
/// Each page is filled with its index within the run so that copies can
/// be told apart afterwards.
pub fn populate(
    kernel: &mut SimulatedKernel,
    start: VirtAddr,
    count: u32,
    perm: PteFlags,
) -> Result<(), KernelError> {
    let me = kernel.getenvid();
    for i in 0..count {
        let va = page_at(start, i)?;
        kernel.page_alloc(me, va, perm)?;
        kernel.poke(me, va, &[i as u8; 8])?;
    }
    Ok(())
}

/// Reads one byte of `env`'s memory through the kernel view
pub fn read_byte(kernel: &SimulatedKernel, env: EnvId, va: VirtAddr) -> Result<u8, KernelError> {
    let mut buf = [0u8; 1];
    kernel.peek(env, va, &mut buf)?;
    Ok(buf[0])
}

/// Whether `a` and `b` map the same frame at `va`
pub fn shares_frame(kernel: &SimulatedKernel, a: EnvId, b: EnvId, va: VirtAddr) -> bool {
    match (kernel.mapping(a, va), kernel.mapping(b, va)) {
        (Some(x), Some(y)) => x.frame == y.frame,
        _ => false,
    }
}

fn page_at(start: VirtAddr, index: u32) -> Result<VirtAddr, KernelError> {
    index
        .checked_mul(PGSIZE)
        .and_then(|off| start.checked_add(off))
        .ok_or(KernelError::InvalidAddress(start))
}
