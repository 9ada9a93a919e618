//! # Core Types
//!
//! This crate defines the vocabulary shared by the kernel boundary, the
//! simulated kernel and the user-space fork library.
//!
//! ## Philosophy
//!
//! - **The kernel knows pages, not policy**: copy-on-write is a user-space
//!   convention carried in a user-available page-table bit.
//! - **Addresses are typed**: virtual addresses and page numbers cannot be
//!   confused with each other or with plain integers.
//! - **Identity is explicit**: environments are named by [`EnvId`], never by
//!   an overloaded integer.
//!
//! ## Key Types
//!
//! - [`EnvId`]: Unique identifier for an environment (execution context)
//! - [`EnvStatus`] / [`EnvInfo`]: Run state and environment-table entry
//! - [`VirtAddr`] / [`PageNum`]: Typed virtual addresses and page numbers
//! - [`PteFlags`]: Page-table entry permission bits, including [`PteFlags::COW`]
//! - [`UTrapframe`]: The fault record handed to a user page-fault handler

pub mod env;
pub mod ids;
pub mod memory;
pub mod trap;

pub use env::{EnvInfo, EnvStatus};
pub use ids::EnvId;
pub use memory::{
    layout, pdx, pgaddr, pgnum, ptx, PageNum, PteFlags, VirtAddr, NPDENTRIES, NPTENTRIES,
    PGSHIFT, PGSIZE, PTSIZE,
};
pub use trap::{FaultCause, UTrapframe, UTRAPFRAME_SIZE};
