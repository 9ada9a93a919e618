//! # Kernel API
//!
//! This crate defines the interface between user-space code and a minimal
//! page-table kernel.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Allocate a page, map a page between address spaces, unmap a page
//! - Create an empty child environment
//! - Register a fault-handler entry point, change a run state
//!
//! It does not know what copy-on-write is. Sharing, copying and fault
//! repair are decided in user space on top of these primitives.
//!
//! ## Design Goals
//!
//! 1. **Testability**: The entire API can be simulated in-process
//! 2. **Explicitness**: Creation returns a tagged [`Exofork`], not an overloaded integer
//! 3. **Type safety**: Addresses, permissions and environment ids are typed

pub mod error;
pub mod kernel;

pub use error::KernelError;
pub use kernel::{
    EnvPanic, EnvTableView, Exofork, KernelApi, PageTableView, UpcallEntry, UpcallFn,
    UpcallResult, UserEnv, UserMemory,
};
