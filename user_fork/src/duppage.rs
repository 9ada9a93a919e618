//! Single-page duplication into a child environment

use core_types::{EnvId, PageNum, PteFlags};
use kernel_api::{KernelError, UserEnv};

/// Permissions both sides get when `pte` is duplicated
///
/// Writable and copy-on-write pages become copy-on-write. Anything else
/// keeps its existing bits.
pub fn cow_permissions(pte: PteFlags) -> PteFlags {
    if pte.is_writable() || pte.is_cow() {
        PteFlags::user_cow()
    } else {
        pte.syscall_bits()
    }
}

/// Maps page `pn` of the caller into `child` at the same address
///
/// For a copy-on-write page the child is mapped first, then the caller's
/// own entry is downgraded. Reversing the two would leave the caller
/// writable while the child already shares the frame.
pub fn duppage<S: UserEnv + ?Sized>(
    sys: &mut S,
    child: EnvId,
    pn: PageNum,
) -> Result<(), KernelError> {
    let me = sys.getenvid();
    let va = pn.addr();
    let perm = cow_permissions(sys.pte(pn));

    sys.page_map(me, va, child, va, perm)?;
    if perm.is_cow() {
        sys.page_map(me, va, me, va, perm)?;
    }

    log::trace!("duppage {} -> {} {:?}", va, child, perm);
    Ok(())
}

/// Maps page `pn` into `child` with the caller's own bits, sharing it outright
pub fn share_page<S: UserEnv + ?Sized>(
    sys: &mut S,
    child: EnvId,
    pn: PageNum,
) -> Result<(), KernelError> {
    let me = sys.getenvid();
    let va = pn.addr();
    let perm = sys.pte(pn).syscall_bits();

    sys.page_map(me, va, child, va, perm)?;

    log::trace!("share {} -> {} {:?}", va, child, perm);
    Ok(())
}
