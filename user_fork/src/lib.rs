//! # User-space Fork
//!
//! Copy-on-write process duplication built entirely on the kernel's page
//! mapping primitives. The kernel knows nothing about copy-on-write; the
//! policy lives here.
//!
//! ## Pieces
//!
//! - [`pgfault`]: the handler that gives a writer its own copy of a
//!   copy-on-write page
//! - [`duppage`]: shares one page with a child, downgrading writable pages
//!   to copy-on-write on both sides
//! - [`fork_with_policy`]: walks the address space, hands each present page
//!   to a [`SharingPolicy`], and sets up the child's exception stack
//!
//! [`fork`] uses [`CopyOnWrite`] for every page. [`sfork`] uses
//! [`SharedExceptStack`], so parent and child share writable memory
//! except for the user stack.
//!
//! ## Example
//!
//! ```
//! use core_types::layout::UTEXT;
//! use core_types::PteFlags;
//! use kernel_api::KernelApi;
//! use sim_kernel::SimulatedKernel;
//! use user_fork::{fork, EnvContext, ForkOutcome};
//!
//! let mut kernel = SimulatedKernel::new();
//! let mut ctx = EnvContext::start(&kernel);
//! let me = kernel.getenvid();
//! kernel.page_alloc(me, UTEXT, PteFlags::user_rw()).unwrap();
//!
//! match fork(&mut ctx, &mut kernel).unwrap() {
//!     ForkOutcome::Parent(child) => assert_ne!(child, me),
//!     ForkOutcome::Child => unreachable!(),
//! }
//! ```

pub mod context;
pub mod duppage;
pub mod error;
pub mod fork;
pub mod pgfault;
pub mod policy;

pub use context::EnvContext;
pub use duppage::{cow_permissions, duppage, share_page};
pub use error::{ForkError, PgFaultError};
pub use fork::{fork, fork_with_policy, sfork, ForkOutcome};
pub use pgfault::{pgfault, pgfault_entry};
pub use policy::{CopyOnWrite, SharedExceptStack, SharingPolicy};
