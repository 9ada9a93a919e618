//! Per-page sharing policies for fork
//!
//! The fork walk is the same for every variant; only what happens to each
//! present page differs.

use crate::duppage::{duppage, share_page};
use core_types::layout::USTACK;
use core_types::{EnvId, PageNum};
use kernel_api::{KernelError, UserEnv};

/// Decides how one present page reaches the child
pub trait SharingPolicy {
    fn duplicate<S: UserEnv + ?Sized>(
        &self,
        sys: &mut S,
        child: EnvId,
        pn: PageNum,
    ) -> Result<(), KernelError>;
}

/// Every writable page becomes copy-on-write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOnWrite;

impl SharingPolicy for CopyOnWrite {
    fn duplicate<S: UserEnv + ?Sized>(
        &self,
        sys: &mut S,
        child: EnvId,
        pn: PageNum,
    ) -> Result<(), KernelError> {
        duppage(sys, child, pn)
    }
}

/// Pages are shared outright, except the user stack which is copy-on-write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedExceptStack {
    pub stack_page: PageNum,
}

impl Default for SharedExceptStack {
    fn default() -> Self {
        Self {
            stack_page: USTACK.page_number(),
        }
    }
}

impl SharingPolicy for SharedExceptStack {
    fn duplicate<S: UserEnv + ?Sized>(
        &self,
        sys: &mut S,
        child: EnvId,
        pn: PageNum,
    ) -> Result<(), KernelError> {
        if pn == self.stack_page {
            duppage(sys, child, pn)
        } else {
            share_page(sys, child, pn)
        }
    }
}
