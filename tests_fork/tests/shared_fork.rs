//! Shared Fork Integration Tests
//!
//! sfork shares every page with the child except the user stack, which
//! stays copy-on-write so each side keeps its own call frames.

use core_types::layout::USTACK;
use core_types::PteFlags;
use kernel_api::KernelApi;
use sim_kernel::test_utils::shares_frame;
use tests_fork::{alloc_rw, enter_child, read_u32, test_bootstrap, write_u32, HEAP};
use user_fork::{fork_with_policy, sfork, ForkOutcome, SharedExceptStack};

#[test]
fn test_heap_writes_visible_to_both_sides() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    alloc_rw(&mut kernel, HEAP).unwrap();
    alloc_rw(&mut kernel, USTACK).unwrap();

    let child = sfork(&mut ctx, &mut kernel).unwrap().child_id().unwrap();
    let inherited = ctx.clone();

    // Parent writes after the fork; the child sees it
    write_u32(&mut kernel, HEAP, 7).unwrap();
    enter_child(&mut kernel, child, inherited);
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), 7);

    // And the other way round
    write_u32(&mut kernel, HEAP, 8).unwrap();
    kernel.run(parent).unwrap();
    assert_eq!(read_u32(&mut kernel, HEAP).unwrap(), 8);
}

#[test]
fn test_stack_page_diverges() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    alloc_rw(&mut kernel, USTACK).unwrap();
    write_u32(&mut kernel, USTACK, 1).unwrap();

    let child = sfork(&mut ctx, &mut kernel).unwrap().child_id().unwrap();
    let inherited = ctx.clone();

    write_u32(&mut kernel, USTACK, 2).unwrap();

    enter_child(&mut kernel, child, inherited);
    assert_eq!(read_u32(&mut kernel, USTACK).unwrap(), 1);
    write_u32(&mut kernel, USTACK, 3).unwrap();

    kernel.run(parent).unwrap();
    assert_eq!(read_u32(&mut kernel, USTACK).unwrap(), 2);
}

#[test]
fn test_existing_cow_bit_preserved_when_sharing() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    alloc_rw(&mut kernel, HEAP).unwrap();

    // A plain fork first leaves HEAP copy-on-write in the parent
    let first = user_fork::fork(&mut ctx, &mut kernel).unwrap();
    assert!(matches!(first, ForkOutcome::Parent(_)));
    assert!(kernel.mapping(parent, HEAP).unwrap().flags.is_cow());

    let child = sfork(&mut ctx, &mut kernel).unwrap().child_id().unwrap();
    let shared = kernel.mapping(child, HEAP).unwrap();
    assert_eq!(shared.flags, PteFlags::user_cow());
    assert!(shares_frame(&kernel, parent, child, HEAP));
}

#[test]
fn test_custom_stack_page() {
    let (mut kernel, mut ctx) = test_bootstrap();
    let parent = kernel.getenvid();
    alloc_rw(&mut kernel, HEAP).unwrap();
    alloc_rw(&mut kernel, USTACK).unwrap();

    let policy = SharedExceptStack {
        stack_page: HEAP.page_number(),
    };
    let child = fork_with_policy(&mut ctx, &mut kernel, &policy)
        .unwrap()
        .child_id()
        .unwrap();

    assert!(kernel.mapping(child, HEAP).unwrap().flags.is_cow());
    assert!(kernel.mapping(parent, HEAP).unwrap().flags.is_cow());
    assert_eq!(kernel.mapping(child, USTACK).unwrap().flags, PteFlags::user_rw());
}
