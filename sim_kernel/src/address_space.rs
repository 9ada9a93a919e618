//! Address space management for SimulatedKernel
//!
//! Each environment owns a two-level page table: directory slots backed by
//! their own frames, and leaf entries pointing at data frames. The
//! simulation keeps both levels in ordered maps instead of real table pages.

use crate::env::ExitReason;
use crate::phys::FrameId;
use core_types::{EnvId, EnvStatus, PageNum, PteFlags, UTrapframe, VirtAddr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One leaf page-table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub frame: FrameId,
    pub flags: PteFlags,
}

/// Page tables of one environment
#[derive(Debug, Default)]
pub struct AddressSpace {
    /// Directory index -> frame holding that leaf table
    tables: BTreeMap<u32, FrameId>,
    entries: BTreeMap<PageNum, Mapping>,
}

impl AddressSpace {
    /// Creates an empty address space
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_table(&self, pdx: u32) -> bool {
        self.tables.contains_key(&pdx)
    }

    pub fn add_table(&mut self, pdx: u32, frame: FrameId) {
        self.tables.insert(pdx, frame);
    }

    pub fn lookup(&self, pn: PageNum) -> Option<Mapping> {
        self.entries.get(&pn).copied()
    }

    pub fn lookup_mut(&mut self, pn: PageNum) -> Option<&mut Mapping> {
        self.entries.get_mut(&pn)
    }

    /// Installs a mapping, returning the one it replaced
    pub fn insert(&mut self, pn: PageNum, mapping: Mapping) -> Option<Mapping> {
        self.entries.insert(pn, mapping)
    }

    pub fn remove(&mut self, pn: PageNum) -> Option<Mapping> {
        self.entries.remove(&pn)
    }

    pub fn page_count(&self) -> usize {
        self.entries.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Iterates over mapped pages in address order
    pub fn pages(&self) -> impl Iterator<Item = (PageNum, Mapping)> + '_ {
        self.entries.iter().map(|(pn, m)| (*pn, *m))
    }

    /// Empties the address space, returning every frame it referenced
    pub fn teardown(&mut self) -> Vec<FrameId> {
        let mut frames: Vec<FrameId> = self.entries.values().map(|m| m.frame).collect();
        frames.extend(self.tables.values().copied());
        self.entries.clear();
        self.tables.clear();
        frames
    }
}

/// Kernel audit events (test-only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelEvent {
    /// Environment created
    EnvCreated {
        env_id: EnvId,
        parent_id: Option<EnvId>,
    },
    /// Run state changed
    EnvStatusChanged { env_id: EnvId, status: EnvStatus },
    /// Environment torn down
    EnvDestroyed { env_id: EnvId, reason: ExitReason },
    /// Fresh page allocated and mapped
    PageAllocated {
        env_id: EnvId,
        va: VirtAddr,
        frame: FrameId,
        perm: PteFlags,
    },
    /// Existing frame mapped (possibly across address spaces)
    PageMapped {
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        frame: FrameId,
        perm: PteFlags,
    },
    /// Mapping removed
    PageUnmapped {
        env_id: EnvId,
        va: VirtAddr,
        frame: FrameId,
    },
    /// Page fault delivered to a user handler
    FaultDelivered {
        env_id: EnvId,
        utf: UTrapframe,
        depth: u32,
    },
}

/// Audit log for kernel operations
#[derive(Debug, Clone)]
pub struct KernelAuditLog {
    events: Vec<KernelEvent>,
}

impl KernelAuditLog {
    /// Creates a new empty audit log
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Records an event
    pub fn record(&mut self, event: KernelEvent) {
        self.events.push(event);
    }

    /// Returns all recorded events
    pub fn events(&self) -> &[KernelEvent] {
        &self.events
    }

    /// Clears all events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Checks if an event matching the predicate exists
    pub fn has_event<F>(&self, predicate: F) -> bool
    where
        F: Fn(&KernelEvent) -> bool,
    {
        self.events.iter().any(predicate)
    }

    /// Counts events matching the predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&KernelEvent) -> bool,
    {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

impl Default for KernelAuditLog {
    fn default() -> Self {
        Self::new()
    }
}
