//! Fork Failure Integration Tests
//!
//! These tests validate that kernel failures during fork:
//! - Surface as errors to the parent
//! - Leave the parent running and usable
//! - Leave a half-built child allocated but never runnable

use core_types::layout::UXSTACK;
use core_types::{EnvStatus, PteFlags, VirtAddr, PTSIZE};
use kernel_api::{KernelApi, KernelError};
use sim_kernel::fault_injection::{FaultPlan, LifecycleFault, MemoryFault};
use sim_kernel::test_utils::populate;
use sim_kernel::{KernelEvent, SimConfig, SimulatedKernel};
use tests_fork::{alloc_rw, fork_child, read_u32, test_bootstrap, write_u32, HEAP};
use user_fork::{fork, EnvContext, ForkError};

fn created_child(kernel: &SimulatedKernel) -> Option<core_types::EnvId> {
    kernel.audit_log().events().iter().find_map(|e| match e {
        KernelEvent::EnvCreated {
            env_id,
            parent_id: Some(_),
        } => Some(*env_id),
        _ => None,
    })
}

#[test]
fn test_out_of_memory_during_walk() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    let far = VirtAddr::new(HEAP.as_u32() + PTSIZE);
    alloc_rw(&mut kernel, HEAP).unwrap();
    alloc_rw(&mut kernel, far).unwrap();
    write_u32(&mut kernel, HEAP, 5).unwrap();
    ctx.set_pgfault_handler(&mut kernel, user_fork::pgfault_entry())
        .unwrap();
    kernel.clear_audit_log();

    // Enough for the child's first page table, not its second
    kernel.inject_faults(FaultPlan::new().with_memory_fault(MemoryFault::ExhaustAfter { count: 1 }));

    let err = fork(&mut ctx, &mut kernel).unwrap_err();
    assert_eq!(
        err,
        ForkError::DuplicatePage {
            va: far,
            source: KernelError::NoMemory,
        }
    );

    let child = created_child(&kernel).unwrap();
    assert_eq!(kernel.env_status(child), Some(EnvStatus::NotRunnable));
    assert_eq!(kernel.env_status(parent), Some(EnvStatus::Running));

    // Parent keeps working, including reads of pages already downgraded
    kernel.clear_faults();
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), 5);
    write_u32(&mut kernel, HEAP, 6).unwrap();
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), 6);
}

#[test]
fn test_exception_stack_allocation_failure() {
    let (mut kernel, mut ctx) = test_bootstrap();
    alloc_rw(&mut kernel, HEAP).unwrap();
    ctx.set_pgfault_handler(&mut kernel, user_fork::pgfault_entry())
        .unwrap();
    kernel.clear_audit_log();

    // The walk needs one table; the exception stack needs another
    kernel.inject_faults(FaultPlan::new().with_memory_fault(MemoryFault::ExhaustAfter { count: 1 }));

    assert_eq!(
        fork(&mut ctx, &mut kernel),
        Err(ForkError::ExceptionStack(KernelError::NoMemory))
    );
    let child = created_child(&kernel).unwrap();
    assert!(kernel.mapping(child, UXSTACK).is_none());
    assert_eq!(kernel.env_status(child), Some(EnvStatus::NotRunnable));
}

#[test]
fn test_exofork_failure_creates_nothing() {
    let (kernel, mut ctx) = test_bootstrap();
    let mut kernel =
        kernel.with_fault_plan(FaultPlan::new().with_lifecycle_fault(LifecycleFault::FailExofork));

    assert_eq!(
        fork(&mut ctx, &mut kernel),
        Err(ForkError::Exofork(KernelError::NoFreeEnv))
    );
    assert_eq!(kernel.live_env_count(), 1);
}

#[test]
fn test_env_table_exhaustion() {
    let mut kernel = SimulatedKernel::with_config(SimConfig {
        max_envs: 3,
        ..SimConfig::default()
    });
    let mut ctx = EnvContext::start(&kernel);

    fork_child(&mut kernel, &mut ctx).unwrap();
    fork_child(&mut kernel, &mut ctx).unwrap();
    assert_eq!(
        fork_child(&mut kernel, &mut ctx).unwrap_err(),
        ForkError::Exofork(KernelError::NoFreeEnv)
    );
}

#[test]
fn test_frames_accounted_after_children_exit() {
    let (mut kernel, mut ctx) = test_bootstrap();
    populate(&mut kernel, HEAP, 8, PteFlags::user_rw()).unwrap();

    // The first fork also sets up the parent's exception stack and scratch table
    let (first, _) = fork_child(&mut kernel, &mut ctx).unwrap();
    kernel.destroy_env(first, sim_kernel::ExitReason::Destroyed);
    let before = kernel.free_frames();

    let (child, _) = fork_child(&mut kernel, &mut ctx).unwrap();
    assert!(kernel.free_frames() < before);

    kernel.destroy_env(child, sim_kernel::ExitReason::Destroyed);
    assert_eq!(kernel.free_frames(), before);
}
