//! Copy-on-write page fault handler
//!
//! Runs on the exception stack of the faulting environment. A write to a
//! page marked [`PteFlags::COW`] is repaired by giving the writer its own
//! copy of the page; every other fault is fatal.

use crate::error::PgFaultError;
use core_types::layout::PFTEMP;
use core_types::{pdx, PteFlags, UTrapframe, VirtAddr, PGSIZE};
use kernel_api::{KernelError, UpcallEntry, UpcallResult, UserEnv};

/// Upcall entry for [`pgfault`]
pub fn pgfault_entry() -> UpcallEntry {
    UpcallEntry::new(pgfault)
}

/// Replaces a copy-on-write page with a private writable copy
pub fn pgfault(sys: &mut dyn UserEnv, utf: &UTrapframe) -> UpcallResult {
    let me = sys.getenvid();
    repair(sys, utf).map_err(|err| {
        log::error!("{} at {}: {}", me, utf.fault_va, err);
        err.into_panic(me)
    })
}

fn repair(sys: &mut dyn UserEnv, utf: &UTrapframe) -> Result<(), PgFaultError> {
    let fault_va = utf.fault_va;
    if !utf.is_write() {
        return Err(PgFaultError::NotAWrite {
            va: fault_va,
            err: utf.err,
        });
    }

    let va = fault_va.round_down();
    let perm = if sys.pde(pdx(va)).is_present() {
        sys.pte(va.page_number())
    } else {
        PteFlags::empty()
    };
    if !perm.is_cow() {
        return Err(PgFaultError::NotCopyOnWrite { va: fault_va, perm });
    }

    let me = sys.getenvid();

    sys.page_alloc(me, PFTEMP, PteFlags::user_rw())
        .map_err(kernel("page_alloc", PFTEMP))?;

    let mut page = vec![0u8; PGSIZE as usize];
    sys.load(va, &mut page).map_err(kernel("load", va))?;
    sys.store(PFTEMP, &page).map_err(kernel("store", PFTEMP))?;

    sys.page_map(me, PFTEMP, me, va, PteFlags::user_rw())
        .map_err(kernel("page_map", va))?;
    sys.page_unmap(me, PFTEMP)
        .map_err(kernel("page_unmap", PFTEMP))?;

    log::debug!("{} copied page {} on write", me, va);
    Ok(())
}

fn kernel(op: &'static str, va: VirtAddr) -> impl FnOnce(KernelError) -> PgFaultError {
    move |source| PgFaultError::Kernel { op, va, source }
}
