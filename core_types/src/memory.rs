//! # Memory Types
//!
//! Page-granular address-space vocabulary.
//!
//! ## Design Notes
//!
//! - The address space is 32-bit with a two-level page table: a 1024-entry
//!   directory whose entries each cover [`PTSIZE`] bytes through a 1024-entry
//!   leaf table.
//! - [`PteFlags::COW`] is one of the bits the hardware leaves to software.
//!   The kernel stores it but never interprets it.
//! - The accessed/dirty bits are written by the MMU. They are outside
//!   [`PteFlags::SYSCALL`] and must be masked off before an existing entry's
//!   bits are handed back to a mapping primitive.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes per page
pub const PGSIZE: u32 = 4096;
/// log2(PGSIZE)
pub const PGSHIFT: u32 = 12;
/// Entries per leaf page table
pub const NPTENTRIES: u32 = 1024;
/// Entries per page directory
pub const NPDENTRIES: u32 = 1024;
/// Bytes mapped by one page-directory entry
pub const PTSIZE: u32 = PGSIZE * NPTENTRIES;

const PDXSHIFT: u32 = 22;

/// Fixed virtual addresses of the user address space
pub mod layout {
    use super::{VirtAddr, PGSIZE, PTSIZE};

    /// Start of the scratch region used for temporary mappings
    pub const UTEMP: VirtAddr = VirtAddr::new(0x0040_0000);
    /// Scratch page used while copying a page
    pub const PFTEMP: VirtAddr = VirtAddr::new(UTEMP.as_u32() + PTSIZE - PGSIZE);
    /// Base of the code segment; fork duplicates from here upward
    pub const UTEXT: VirtAddr = VirtAddr::new(0x0080_0000);
    /// Top of user-mappable memory
    pub const UTOP: VirtAddr = VirtAddr::new(0xeec0_0000);
    /// Top of the one-page exception stack
    pub const UXSTACKTOP: VirtAddr = UTOP;
    /// The exception-stack page itself
    pub const UXSTACK: VirtAddr = VirtAddr::new(UXSTACKTOP.as_u32() - PGSIZE);
    /// Top of the normal user stack (one guard page below the exception stack)
    pub const USTACKTOP: VirtAddr = VirtAddr::new(UTOP.as_u32() - 2 * PGSIZE);
    /// The page holding the top of the normal user stack
    pub const USTACK: VirtAddr = VirtAddr::new(USTACKTOP.as_u32() - PGSIZE);
}

/// A user virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VirtAddr(u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Rounds down to the containing page boundary
    pub const fn round_down(&self) -> Self {
        Self(self.0 & !(PGSIZE - 1))
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PGSIZE == 0
    }

    /// Offset of this address within its page
    pub const fn page_offset(&self) -> u32 {
        self.0 & (PGSIZE - 1)
    }

    /// Page number of the containing page
    pub const fn page_number(&self) -> PageNum {
        PageNum(self.0 >> PGSHIFT)
    }

    /// Returns `self + offset`, or `None` on overflow
    pub fn checked_add(&self, offset: u32) -> Option<Self> {
        self.0.checked_add(offset).map(Self)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Index of a virtual page (`va >> PGSHIFT`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageNum(u32);

impl PageNum {
    pub const fn new(pn: u32) -> Self {
        Self(pn)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// First address of this page
    pub const fn addr(&self) -> VirtAddr {
        VirtAddr(self.0 << PGSHIFT)
    }
}

impl fmt::Display for PageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pn:{:#x}", self.0)
    }
}

/// Page-directory index of an address
pub const fn pdx(va: VirtAddr) -> u32 {
    va.as_u32() >> PDXSHIFT
}

/// Page-table index of an address
pub const fn ptx(va: VirtAddr) -> u32 {
    (va.as_u32() >> PGSHIFT) & (NPTENTRIES - 1)
}

/// Page number of an address
pub const fn pgnum(va: VirtAddr) -> PageNum {
    va.page_number()
}

/// Address formed from a directory index and a table index
pub const fn pgaddr(pdx: u32, ptx: u32) -> VirtAddr {
    VirtAddr((pdx << PDXSHIFT) | (ptx << PGSHIFT))
}

bitflags! {
    /// Page-table entry bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PteFlags: u32 {
        const PRESENT = 0x001;
        const WRITABLE = 0x002;
        const USER = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED = 0x020;
        const DIRTY = 0x040;
        const HUGE = 0x080;
        const GLOBAL = 0x100;
        /// Bits reserved for software
        const AVAIL = 0xe00;
        /// Copy-on-write marker (one of the AVAIL bits)
        const COW = 0x800;
        /// Bits a user may pass to a mapping primitive
        const SYSCALL = Self::AVAIL.bits() | Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
    }
}

impl PteFlags {
    /// Present, user-accessible, writable
    pub const fn user_rw() -> Self {
        Self::PRESENT.union(Self::USER).union(Self::WRITABLE)
    }

    /// Present, user-accessible, read-only
    pub const fn user_ro() -> Self {
        Self::PRESENT.union(Self::USER)
    }

    /// Present, user-accessible, copy-on-write
    pub const fn user_cow() -> Self {
        Self::PRESENT.union(Self::USER).union(Self::COW)
    }

    pub fn is_present(&self) -> bool {
        self.contains(Self::PRESENT)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(Self::WRITABLE)
    }

    pub fn is_cow(&self) -> bool {
        self.contains(Self::COW)
    }

    /// Drops hardware-maintained bits, keeping what a mapping call accepts
    pub fn syscall_bits(&self) -> Self {
        self.intersection(Self::SYSCALL)
    }
}
