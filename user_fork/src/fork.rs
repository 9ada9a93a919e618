//! Fork orchestration
//!
//! One walk over the caller's address space, parameterized by a
//! [`SharingPolicy`]. The exception stack is never part of the walk: the
//! child gets a private, pre-filled copy instead.

use crate::context::EnvContext;
use crate::error::ForkError;
use crate::pgfault::pgfault_entry;
use crate::policy::{CopyOnWrite, SharedExceptStack, SharingPolicy};
use core_types::layout::{PFTEMP, UTEXT, UXSTACK, UXSTACKTOP};
use core_types::{pdx, pgaddr, EnvId, EnvStatus, PteFlags, NPTENTRIES, PGSIZE};
use kernel_api::{Exofork, KernelError, UserEnv};

/// Which side of a fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Running as the parent of the new environment
    Parent(EnvId),
    /// Running as the new child
    Child,
}

impl ForkOutcome {
    pub fn child_id(&self) -> Option<EnvId> {
        match self {
            ForkOutcome::Parent(child) => Some(*child),
            ForkOutcome::Child => None,
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, ForkOutcome::Child)
    }
}

/// Duplicates the current environment with copy-on-write sharing
pub fn fork<S: UserEnv + ?Sized>(
    ctx: &mut EnvContext,
    sys: &mut S,
) -> Result<ForkOutcome, ForkError> {
    fork_with_policy(ctx, sys, &CopyOnWrite)
}

/// Duplicates the current environment, sharing everything but the user stack
///
/// Parent and child write to the same frames afterwards. Only the stack
/// page diverges.
pub fn sfork<S: UserEnv + ?Sized>(
    ctx: &mut EnvContext,
    sys: &mut S,
) -> Result<ForkOutcome, ForkError> {
    fork_with_policy(ctx, sys, &SharedExceptStack::default())
}

/// Duplicates the current environment using `policy` for each present page
///
/// A failure after the child exists leaves it allocated and not runnable.
/// Pages already duplicated are not rolled back.
pub fn fork_with_policy<S, P>(
    ctx: &mut EnvContext,
    sys: &mut S,
    policy: &P,
) -> Result<ForkOutcome, ForkError>
where
    S: UserEnv + ?Sized,
    P: SharingPolicy,
{
    let entry = pgfault_entry();
    ctx.set_pgfault_handler(sys, entry)
        .map_err(ForkError::InstallHandler)?;

    let child = match sys.exofork().map_err(ForkError::Exofork)? {
        Exofork::IsChild => {
            ctx.become_child(sys);
            log::debug!("fork: resumed as child {}", ctx.env_id());
            return Ok(ForkOutcome::Child);
        }
        Exofork::ParentOf(child) => child,
    };

    let pages = duplicate_address_space(sys, child, policy)?;

    clone_exception_stack(sys, ctx.env_id(), child).map_err(|err| {
        log::error!("fork: exception stack for {} failed: {}", child, err);
        ForkError::ExceptionStack(err)
    })?;

    sys.env_set_pgfault_upcall(child, entry)
        .map_err(ForkError::SetUpcall)?;
    sys.env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::SetStatus)?;

    log::debug!("fork: {} -> {} ({} pages)", ctx.env_id(), child, pages);
    Ok(ForkOutcome::Parent(child))
}

/// Hands every present page in `[UTEXT, UXSTACK)` to `policy`
fn duplicate_address_space<S, P>(sys: &mut S, child: EnvId, policy: &P) -> Result<usize, ForkError>
where
    S: UserEnv + ?Sized,
    P: SharingPolicy,
{
    let mut pages = 0;

    for dir in pdx(UTEXT)..pdx(UXSTACKTOP) {
        if !sys.pde(dir).is_present() {
            continue;
        }

        for table in 0..NPTENTRIES {
            let va = pgaddr(dir, table);
            if va < UTEXT {
                continue;
            }
            if va >= UXSTACK {
                break;
            }

            let pn = va.page_number();
            if !sys.pte(pn).is_present() {
                continue;
            }

            policy
                .duplicate(sys, child, pn)
                .map_err(|source| ForkError::DuplicatePage { va, source })?;
            pages += 1;
        }
    }

    Ok(pages)
}

/// Gives `child` a fresh exception stack holding a copy of the caller's
fn clone_exception_stack<S: UserEnv + ?Sized>(
    sys: &mut S,
    me: EnvId,
    child: EnvId,
) -> Result<(), KernelError> {
    sys.page_alloc(child, UXSTACK, PteFlags::user_rw())?;
    sys.page_map(child, UXSTACK, me, PFTEMP, PteFlags::user_rw())?;

    let mut stack = vec![0u8; PGSIZE as usize];
    sys.load(UXSTACK, &mut stack)?;
    sys.store(PFTEMP, &stack)?;

    sys.page_unmap(me, PFTEMP)
}
