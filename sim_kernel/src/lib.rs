//! # Simulated Kernel
//!
//! This crate provides a simulated implementation of the kernel API.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing user-space fork without hardware:
//! - Runs under `cargo test`
//! - Deterministic (one environment runs at a time, switched explicitly)
//! - Inspectable (page tables, frames and audit events are accessible)
//!
//! ## Model
//!
//! - Physical memory is a fixed pool of reference-counted frames. Page-table
//!   pages come out of the same pool.
//! - Every [`KernelApi`] call acts as the current environment. Tests switch
//!   environments with [`SimulatedKernel::run`].
//! - A child created by `exofork` resumes at the creation call: the first
//!   `exofork` it makes returns [`Exofork::IsChild`].
//! - User loads and stores go through [`UserMemory`]. A violating access is
//!   delivered to the registered upcall on the exception stack, then retried.
//!
//! The kernel never interprets [`PteFlags::COW`]; it only stores it.

pub mod address_space;
pub mod env;
pub mod fault_injection;
pub mod phys;
pub mod test_utils;
mod trap;

pub use address_space::{KernelAuditLog, KernelEvent, Mapping};
pub use env::{ExitNotification, ExitReason, SimConfig};
pub use phys::FrameId;

use core_types::layout::UTOP;
use core_types::{pdx, EnvId, EnvInfo, EnvStatus, PageNum, PteFlags, VirtAddr, PGSIZE};
use env::Env;
use fault_injection::{FaultInjector, FaultPlan};
use kernel_api::{
    EnvTableView, Exofork, KernelApi, KernelError, PageTableView, UpcallEntry, UserMemory,
};
use phys::PhysMemory;
use std::collections::HashMap;

/// Simulated kernel state
///
/// Unlike a real kernel, this state is directly accessible for testing.
pub struct SimulatedKernel {
    config: SimConfig,
    envs: HashMap<EnvId, Env>,
    /// Environment on whose behalf calls are made
    current: EnvId,
    boot_env: EnvId,
    phys: PhysMemory,
    fault_injector: Option<FaultInjector>,
    audit_log: KernelAuditLog,
    exit_notifications: Vec<ExitNotification>,
}

impl SimulatedKernel {
    /// Creates a kernel with the default configuration
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Creates a kernel with a boot environment already running
    pub fn with_config(config: SimConfig) -> Self {
        let boot = Env::new(None, EnvStatus::Running);
        let boot_id = boot.id;

        let mut audit_log = KernelAuditLog::new();
        audit_log.record(KernelEvent::EnvCreated {
            env_id: boot_id,
            parent_id: None,
        });

        let mut envs = HashMap::new();
        envs.insert(boot_id, boot);

        Self {
            phys: PhysMemory::new(config.max_frames),
            config,
            envs,
            current: boot_id,
            boot_env: boot_id,
            fault_injector: None,
            audit_log,
            exit_notifications: Vec::new(),
        }
    }

    /// Sets the fault plan for this kernel
    pub fn with_fault_plan(mut self, plan: FaultPlan) -> Self {
        self.inject_faults(plan);
        self
    }

    /// Replaces the active fault plan mid-run
    pub fn inject_faults(&mut self, plan: FaultPlan) {
        self.fault_injector = Some(FaultInjector::new(plan));
    }

    /// Removes any active fault plan
    pub fn clear_faults(&mut self) {
        self.fault_injector = None;
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The environment created at boot
    pub fn boot_env(&self) -> EnvId {
        self.boot_env
    }

    pub fn current_env(&self) -> EnvId {
        self.current
    }

    /// Switches to `env`, which must be runnable (or already current)
    pub fn run(&mut self, env: EnvId) -> Result<(), KernelError> {
        let status = self
            .envs
            .get(&env)
            .map(|e| e.status)
            .ok_or(KernelError::BadEnv(env))?;

        match status {
            EnvStatus::Running if env == self.current => return Ok(()),
            EnvStatus::Runnable => {}
            _ => return Err(KernelError::InvalidStatus),
        }

        if let Some(prev) = self.envs.get_mut(&self.current) {
            if prev.status == EnvStatus::Running {
                prev.status = EnvStatus::Runnable;
            }
        }

        self.set_status(env, EnvStatus::Running);
        self.current = env;
        log::debug!("switched to {}", env);
        Ok(())
    }

    pub fn env_status(&self, env: EnvId) -> Option<EnvStatus> {
        self.envs.get(&env).map(|e| e.status)
    }

    /// Number of environments that have not been destroyed
    pub fn live_env_count(&self) -> usize {
        self.envs.values().filter(|e| e.is_alive()).count()
    }

    /// The leaf entry for `va` in `env`, bypassing permission checks
    pub fn mapping(&self, env: EnvId, va: VirtAddr) -> Option<Mapping> {
        self.envs.get(&env)?.space.lookup(va.page_number())
    }

    /// Pages mapped in `env`, in address order
    pub fn mapped_pages(&self, env: EnvId) -> Vec<(PageNum, Mapping)> {
        self.envs
            .get(&env)
            .map(|e| e.space.pages().collect())
            .unwrap_or_default()
    }

    pub fn frame_refcount(&self, frame: FrameId) -> u32 {
        self.phys.refcount(frame)
    }

    pub fn free_frames(&self) -> usize {
        self.phys.free_frames()
    }

    /// Kernel-side read of `env`'s memory, ignoring permissions
    pub fn peek(&self, env: EnvId, va: VirtAddr, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = offset_addr(va, done)?;
            let chunk = chunk_len(addr, buf.len() - done);
            let mapping = self
                .mapping(env, addr)
                .ok_or(KernelError::NotMapped(addr.round_down()))?;
            let bytes = self
                .phys
                .bytes(mapping.frame)
                .ok_or(KernelError::NotMapped(addr.round_down()))?;
            let off = addr.page_offset() as usize;
            buf[done..done + chunk].copy_from_slice(&bytes[off..off + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Kernel-side write into `env`'s memory, ignoring permissions
    ///
    /// Writes land in whatever frame is mapped, shared or not. Used to set up
    /// read-only contents in tests.
    pub fn poke(&mut self, env: EnvId, va: VirtAddr, data: &[u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < data.len() {
            let addr = offset_addr(va, done)?;
            let chunk = chunk_len(addr, data.len() - done);
            let mapping = self
                .mapping(env, addr)
                .ok_or(KernelError::NotMapped(addr.round_down()))?;
            let bytes = self
                .phys
                .bytes_mut(mapping.frame)
                .ok_or(KernelError::NotMapped(addr.round_down()))?;
            let off = addr.page_offset() as usize;
            bytes[off..off + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Returns the audit log (test-only)
    pub fn audit_log(&self) -> &KernelAuditLog {
        &self.audit_log
    }

    /// Clears the audit log (test-only)
    pub fn clear_audit_log(&mut self) {
        self.audit_log.clear();
    }

    /// Exit records of destroyed environments
    pub fn get_exit_notifications(&self) -> &[ExitNotification] {
        &self.exit_notifications
    }

    /// Destroys `env`, releasing every frame it maps
    ///
    /// Destroying an environment that is already gone does nothing.
    pub fn destroy_env(&mut self, env: EnvId, reason: ExitReason) {
        let frames = match self.envs.get_mut(&env) {
            Some(e) if e.is_alive() => {
                e.status = EnvStatus::Free;
                e.upcall = None;
                e.fault_depth = 0;
                e.space.teardown()
            }
            _ => return,
        };

        for frame in frames {
            self.phys.decref(frame);
        }

        log::warn!("destroyed {}: {:?}", env, reason);
        self.audit_log.record(KernelEvent::EnvDestroyed {
            env_id: env,
            reason: reason.clone(),
        });
        self.exit_notifications.push(ExitNotification {
            env_id: env,
            reason,
        });
    }

    fn set_status(&mut self, env: EnvId, status: EnvStatus) {
        if let Some(e) = self.envs.get_mut(&env) {
            e.status = status;
            self.audit_log
                .record(KernelEvent::EnvStatusChanged { env_id: env, status });
        }
    }

    /// Resolves an environment argument of a system call
    ///
    /// With `checkperm`, the target must be the caller or a direct child.
    fn lookup_env(&self, env: EnvId, checkperm: bool) -> Result<&Env, KernelError> {
        let target = self
            .envs
            .get(&env)
            .filter(|e| e.is_alive())
            .ok_or(KernelError::BadEnv(env))?;

        if checkperm && env != self.current && target.parent != Some(self.current) {
            return Err(KernelError::BadEnv(env));
        }

        Ok(target)
    }

    fn caller(&self) -> Result<&Env, KernelError> {
        self.lookup_env(self.current, false)
    }

    fn alloc_frame(&mut self) -> Result<FrameId, KernelError> {
        if let Some(injector) = self.fault_injector.as_mut() {
            if injector.should_fail_alloc() {
                return Err(KernelError::NoMemory);
            }
        }
        self.phys.alloc().ok_or(KernelError::NoMemory)
    }

    /// Makes sure `env` has a leaf table covering `va`
    fn ensure_table(&mut self, env: EnvId, va: VirtAddr) -> Result<(), KernelError> {
        let index = pdx(va);
        let present = self
            .envs
            .get(&env)
            .map(|e| e.space.has_table(index))
            .ok_or(KernelError::BadEnv(env))?;
        if present {
            return Ok(());
        }

        let frame = self.alloc_frame()?;
        self.phys.incref(frame);
        if let Some(e) = self.envs.get_mut(&env) {
            e.space.add_table(index, frame);
        }
        Ok(())
    }

    /// Points `va` in `env` at `frame`, dropping whatever was mapped before
    ///
    /// The table covering `va` must already exist.
    fn install(&mut self, env: EnvId, va: VirtAddr, frame: FrameId, perm: PteFlags) {
        self.phys.incref(frame);
        let old = self.envs.get_mut(&env).and_then(|e| {
            e.space.insert(
                va.page_number(),
                Mapping {
                    frame,
                    flags: perm,
                },
            )
        });
        if let Some(old) = old {
            self.phys.decref(old.frame);
        }
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn check_va(va: VirtAddr) -> Result<(), KernelError> {
    if va >= UTOP || !va.is_page_aligned() {
        return Err(KernelError::InvalidAddress(va));
    }
    Ok(())
}

fn check_perm(perm: PteFlags) -> Result<(), KernelError> {
    if !perm.contains(PteFlags::PRESENT | PteFlags::USER) || !PteFlags::SYSCALL.contains(perm) {
        return Err(KernelError::InvalidPermissions(perm));
    }
    Ok(())
}

fn offset_addr(va: VirtAddr, offset: usize) -> Result<VirtAddr, KernelError> {
    u32::try_from(offset)
        .ok()
        .and_then(|off| va.checked_add(off))
        .ok_or(KernelError::InvalidAddress(va))
}

/// Bytes of a `remaining`-byte access that fit in the page holding `addr`
fn chunk_len(addr: VirtAddr, remaining: usize) -> usize {
    ((PGSIZE - addr.page_offset()) as usize).min(remaining)
}

impl KernelApi for SimulatedKernel {
    fn getenvid(&self) -> EnvId {
        self.current
    }

    fn page_alloc(
        &mut self,
        env: EnvId,
        va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        self.lookup_env(env, true)?;
        check_va(va)?;
        check_perm(perm)?;

        self.ensure_table(env, va)?;
        let frame = self.alloc_frame()?;
        self.install(env, va, frame, perm);

        log::trace!("page_alloc {} {} {:?} -> {}", env, va, perm, frame);
        self.audit_log.record(KernelEvent::PageAllocated {
            env_id: env,
            va,
            frame,
            perm,
        });
        Ok(())
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PteFlags,
    ) -> Result<(), KernelError> {
        let source = self
            .lookup_env(src_env, true)?
            .space
            .lookup(src_va.page_number());
        self.lookup_env(dst_env, true)?;
        check_va(src_va)?;
        check_va(dst_va)?;
        check_perm(perm)?;

        let source = source.ok_or(KernelError::NotMapped(src_va))?;
        if perm.is_writable() && !source.flags.is_writable() {
            return Err(KernelError::InvalidPermissions(perm));
        }

        if let Some(injector) = self.fault_injector.as_mut() {
            if injector.should_fail_map() {
                return Err(KernelError::NoMemory);
            }
        }

        self.ensure_table(dst_env, dst_va)?;
        self.install(dst_env, dst_va, source.frame, perm);

        log::trace!(
            "page_map {} {} -> {} {} {:?}",
            src_env,
            src_va,
            dst_env,
            dst_va,
            perm
        );
        self.audit_log.record(KernelEvent::PageMapped {
            src_env,
            src_va,
            dst_env,
            dst_va,
            frame: source.frame,
            perm,
        });
        Ok(())
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> Result<(), KernelError> {
        self.lookup_env(env, true)?;
        check_va(va)?;

        let removed = self
            .envs
            .get_mut(&env)
            .and_then(|e| e.space.remove(va.page_number()));

        if let Some(old) = removed {
            self.phys.decref(old.frame);
            self.audit_log.record(KernelEvent::PageUnmapped {
                env_id: env,
                va,
                frame: old.frame,
            });
        }
        Ok(())
    }

    fn exofork(&mut self) -> Result<Exofork, KernelError> {
        let parent = self.caller()?.id;

        if let Some(e) = self.envs.get_mut(&parent) {
            if e.pending_child_return {
                e.pending_child_return = false;
                return Ok(Exofork::IsChild);
            }
        }

        if let Some(injector) = self.fault_injector.as_mut() {
            if injector.should_fail_exofork() {
                return Err(KernelError::NoFreeEnv);
            }
        }

        if self.live_env_count() >= self.config.max_envs {
            return Err(KernelError::NoFreeEnv);
        }

        let child = Env::new(Some(parent), EnvStatus::NotRunnable);
        let child_id = child.id;
        self.envs.insert(child_id, child);

        log::debug!("exofork {} -> {}", parent, child_id);
        self.audit_log.record(KernelEvent::EnvCreated {
            env_id: child_id,
            parent_id: Some(parent),
        });
        Ok(Exofork::ParentOf(child_id))
    }

    fn env_set_pgfault_upcall(
        &mut self,
        env: EnvId,
        entry: UpcallEntry,
    ) -> Result<(), KernelError> {
        self.lookup_env(env, true)?;
        if let Some(e) = self.envs.get_mut(&env) {
            e.upcall = Some(entry);
        }
        Ok(())
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> Result<(), KernelError> {
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(KernelError::InvalidStatus);
        }
        self.lookup_env(env, true)?;
        self.set_status(env, status);
        Ok(())
    }
}

impl PageTableView for SimulatedKernel {
    fn pde(&self, pdx: u32) -> PteFlags {
        match self.envs.get(&self.current) {
            Some(e) if e.space.has_table(pdx) => PteFlags::user_rw(),
            _ => PteFlags::empty(),
        }
    }

    fn pte(&self, pn: PageNum) -> PteFlags {
        self.envs
            .get(&self.current)
            .and_then(|e| e.space.lookup(pn))
            .map(|m| m.flags)
            .unwrap_or(PteFlags::empty())
    }
}

impl EnvTableView for SimulatedKernel {
    fn env_entry(&self, env: EnvId) -> Option<EnvInfo> {
        self.envs.get(&env).map(|e| e.info())
    }
}

impl UserMemory for SimulatedKernel {
    fn load(&mut self, va: VirtAddr, buf: &mut [u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = offset_addr(va, done)?;
            let chunk = chunk_len(addr, buf.len() - done);
            let frame = self.translate(addr, false)?;
            let bytes = self
                .phys
                .bytes(frame)
                .ok_or(KernelError::NotMapped(addr.round_down()))?;
            let off = addr.page_offset() as usize;
            buf[done..done + chunk].copy_from_slice(&bytes[off..off + chunk]);
            done += chunk;
        }
        Ok(())
    }

    fn store(&mut self, va: VirtAddr, data: &[u8]) -> Result<(), KernelError> {
        let mut done = 0;
        while done < data.len() {
            let addr = offset_addr(va, done)?;
            let chunk = chunk_len(addr, data.len() - done);
            let frame = self.translate(addr, true)?;
            let bytes = self
                .phys
                .bytes_mut(frame)
                .ok_or(KernelError::NotMapped(addr.round_down()))?;
            let off = addr.page_offset() as usize;
            bytes[off..off + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }
}
