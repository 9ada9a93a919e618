//! Copy-on-write Isolation Integration Tests
//!
//! These tests drive parent and child through a fork and check that:
//! - The child sees the parent's memory as of the fork
//! - Writes on either side stay private to that side
//! - The exception stack is never shared copy-on-write

use core_types::layout::{UTEXT, UXSTACK};
use core_types::{EnvStatus, PteFlags, VirtAddr, PGSIZE};
use kernel_api::{KernelApi, PageTableView, UserMemory};
use sim_kernel::test_utils::{read_byte, shares_frame};
use sim_kernel::KernelEvent;
use tests_fork::{
    alloc_rw, enter_child, fork_child, read_u32, test_bootstrap, write_u32, HEAP,
};
use user_fork::fork;

const V: u32 = 0x1234_5678;
const V2: u32 = 0xdead_beef;

#[test]
fn test_child_write_is_invisible_to_parent_and_later_children() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    alloc_rw(&mut kernel, HEAP).unwrap();
    write_u32(&mut kernel, HEAP, V).unwrap();

    let (child, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();
    enter_child(&mut kernel, child, inherited);

    // Child sees the parent's value without writing
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V);

    write_u32(&mut kernel, HEAP, V2).unwrap();
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V2);

    kernel.run(parent).unwrap();
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V);

    let (third, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();
    enter_child(&mut kernel, third, inherited);
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V);
}

#[test]
fn test_repair_leaves_other_side_cow() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    alloc_rw(&mut kernel, HEAP).unwrap();
    write_u32(&mut kernel, HEAP, V).unwrap();

    let (child, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();
    assert!(shares_frame(&kernel, parent, child, HEAP));
    let shared = kernel.mapping(parent, HEAP).unwrap().frame;

    // Parent writes first
    write_u32(&mut kernel, HEAP, V2).unwrap();
    let parent_copy = kernel.mapping(parent, HEAP).unwrap();
    assert_ne!(parent_copy.frame, shared);
    assert!(!shares_frame(&kernel, parent, child, HEAP));
    assert!(parent_copy.flags.contains(PteFlags::user_rw()));
    assert!(!parent_copy.flags.is_cow());

    let child_view = kernel.mapping(child, HEAP).unwrap();
    assert_eq!(child_view.frame, shared);
    assert!(child_view.flags.is_cow());

    // Child can still fault and repair on its own
    enter_child(&mut kernel, child, inherited);
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V);
    write_u32(&mut kernel, HEAP, V + 1).unwrap();

    let child_copy = kernel.mapping(child, HEAP).unwrap();
    assert_ne!(child_copy.frame, shared);
    assert_ne!(child_copy.frame, parent_copy.frame);
    assert_eq!(kernel.frame_refcount(shared), 0);

    kernel.run(parent).unwrap();
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V2);
}

#[test]
fn test_read_does_not_fault_on_cow_page() {
    let (mut kernel, mut ctx) = test_bootstrap();
    alloc_rw(&mut kernel, HEAP).unwrap();
    fork_child(&mut kernel, &mut ctx).unwrap();
    kernel.clear_audit_log();

    read_u32(&mut kernel, HEAP).unwrap();
    assert!(!kernel
        .audit_log()
        .has_event(|e| matches!(e, KernelEvent::FaultDelivered { .. })));

    write_u32(&mut kernel, HEAP, 1).unwrap();
    assert_eq!(
        kernel
            .audit_log()
            .count_events(|e| matches!(e, KernelEvent::FaultDelivered { .. })),
        1
    );
}

#[test]
fn test_read_only_pages_shared_without_cow() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    let text = UTEXT;
    kernel.page_alloc(parent, text, PteFlags::user_ro()).unwrap();
    kernel.poke(parent, text, b"code").unwrap();
    alloc_rw(&mut kernel, HEAP).unwrap();

    let (child, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();

    let ro = kernel.mapping(child, text).unwrap();
    assert_eq!(ro.flags, PteFlags::user_ro());
    assert!(shares_frame(&kernel, parent, child, text));
    assert_eq!(read_byte(&kernel, child, text).unwrap(), b'c');

    // Writing elsewhere does not disturb the shared read-only page
    write_u32(&mut kernel, HEAP, V).unwrap();
    enter_child(&mut kernel, child, inherited);
    write_u32(&mut kernel, HEAP, V2).unwrap();

    let mut buf = [0u8; 4];
    kernel.load(text, &mut buf).unwrap();
    assert_eq!(&buf, b"code");
}

#[test]
fn test_exception_stack_never_cow() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    for i in 0..4 {
        alloc_rw(&mut kernel, VirtAddr::new(HEAP.as_u32() + i * PGSIZE)).unwrap();
    }

    let (child, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();
    for env in [parent, child] {
        let stack = kernel.mapping(env, UXSTACK).unwrap();
        assert!(!stack.flags.is_cow());
        assert!(stack.flags.is_writable());
    }

    // Fault repeatedly on both sides
    for i in 0..4 {
        write_u32(&mut kernel, VirtAddr::new(HEAP.as_u32() + i * PGSIZE), i).unwrap();
    }
    enter_child(&mut kernel, child, inherited);
    for i in 0..4 {
        write_u32(&mut kernel, VirtAddr::new(HEAP.as_u32() + i * PGSIZE), i + 10).unwrap();
    }
    assert!(!kernel.pte(UXSTACK.page_number()).is_cow());
    assert!(!kernel.mapping(parent, UXSTACK).unwrap().flags.is_cow());
}

#[test]
fn test_degenerate_fork_of_empty_address_space() {
    let (mut kernel, mut ctx) = test_bootstrap();

    let (child, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();

    assert_eq!(kernel.env_status(child), Some(EnvStatus::Runnable));
    let pages = kernel.mapped_pages(child);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].0, UXSTACK.page_number());

    let child_ctx = enter_child(&mut kernel, child, inherited);
    assert_eq!(child_ctx.env_id(), child);
}

#[test]
fn test_grandchild_sees_child_writes() {
    let (mut kernel, mut ctx) = test_bootstrap();
    alloc_rw(&mut kernel, HEAP).unwrap();
    write_u32(&mut kernel, HEAP, V).unwrap();

    let (child, inherited) = fork_child(&mut kernel, &mut ctx).unwrap();
    let mut child_ctx = enter_child(&mut kernel, child, inherited);
    write_u32(&mut kernel, HEAP, V2).unwrap();

    let outcome = fork(&mut child_ctx, &mut kernel).unwrap();
    let grandchild = outcome.child_id().unwrap();
    let inherited = child_ctx.clone();
    let grandchild_ctx = enter_child(&mut kernel, grandchild, inherited);

    assert_eq!(grandchild_ctx.parent_id(), Some(child));
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), V2);
}

#[test]
fn test_fork_events_serialize() {
    let (mut kernel, mut ctx) = test_bootstrap();
    alloc_rw(&mut kernel, HEAP).unwrap();
    kernel.clear_audit_log();

    fork_child(&mut kernel, &mut ctx).unwrap();

    let json = serde_json::to_string(kernel.audit_log().events()).unwrap();
    let events: Vec<KernelEvent> = serde_json::from_str(&json).unwrap();
    assert_eq!(events, kernel.audit_log().events());
}
