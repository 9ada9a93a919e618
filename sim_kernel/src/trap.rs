//! Page-fault delivery
//!
//! A user access that the page tables refuse is turned into a [`UTrapframe`]
//! pushed onto the environment's exception stack, and the registered upcall
//! runs on top of it. Nested faults stack further records below the first.
//! The access is retried once the upcall returns.

use crate::env::ExitReason;
use crate::phys::FrameId;
use crate::{KernelEvent, SimulatedKernel};
use core_types::layout::{UXSTACK, UXSTACKTOP};
use core_types::{FaultCause, PteFlags, UTrapframe, VirtAddr, PGSIZE, UTRAPFRAME_SIZE};
use kernel_api::KernelError;

impl SimulatedKernel {
    /// Resolves a user access to the frame backing `addr`
    ///
    /// Faults are delivered until the access succeeds, the environment dies,
    /// or the retry limit is hit.
    pub(crate) fn translate(&mut self, addr: VirtAddr, write: bool) -> Result<FrameId, KernelError> {
        let env_id = self.current;
        let mut attempts = 0;

        loop {
            let env = self
                .envs
                .get_mut(&env_id)
                .filter(|e| e.is_alive())
                .ok_or(KernelError::EnvDestroyed(env_id))?;

            let mapping = env.space.lookup_mut(addr.page_number());
            let cause = match mapping {
                Some(m) if m.flags.contains(PteFlags::PRESENT | PteFlags::USER) => {
                    if !write || m.flags.is_writable() {
                        m.flags |= PteFlags::ACCESSED;
                        if write {
                            m.flags |= PteFlags::DIRTY;
                        }
                        return Ok(m.frame);
                    }
                    FaultCause::PROTECTION
                }
                Some(_) => FaultCause::PROTECTION,
                None => FaultCause::empty(),
            };

            let mut err = cause | FaultCause::USER;
            if write {
                err |= FaultCause::WRITE;
            }

            if attempts >= self.config.max_fault_retries {
                self.destroy_env(env_id, ExitReason::FaultLoop { fault_va: addr });
                return Err(KernelError::EnvDestroyed(env_id));
            }
            attempts += 1;

            self.deliver_fault(UTrapframe::new(addr, err))?;
        }
    }

    /// Pushes a fault record and runs the current environment's upcall
    fn deliver_fault(&mut self, utf: UTrapframe) -> Result<(), KernelError> {
        let env_id = self.current;
        let fault_va = utf.fault_va;

        let (upcall, depth, stack) = match self.envs.get(&env_id) {
            Some(e) => (e.upcall, e.fault_depth, e.space.lookup(UXSTACK.page_number())),
            None => return Err(KernelError::EnvDestroyed(env_id)),
        };

        let Some(upcall) = upcall else {
            self.destroy_env(
                env_id,
                ExitReason::UnhandledFault {
                    fault_va,
                    err: utf.err,
                },
            );
            return Err(KernelError::EnvDestroyed(env_id));
        };

        let stack = match stack {
            Some(m) if m.flags.contains(PteFlags::user_rw()) => m,
            _ => {
                self.destroy_env(env_id, ExitReason::ExceptionStackInvalid { fault_va });
                return Err(KernelError::EnvDestroyed(env_id));
            }
        };

        let depth = depth + 1;
        if depth * UTRAPFRAME_SIZE > PGSIZE {
            self.destroy_env(env_id, ExitReason::ExceptionStackOverflow { fault_va });
            return Err(KernelError::EnvDestroyed(env_id));
        }

        let record_top = UXSTACKTOP.as_u32() - depth * UTRAPFRAME_SIZE;
        let offset = (record_top - UXSTACK.as_u32()) as usize;
        let header = utf.header_bytes();
        if let Some(bytes) = self.phys.bytes_mut(stack.frame) {
            bytes[offset..offset + header.len()].copy_from_slice(&header);
        }

        if let Some(e) = self.envs.get_mut(&env_id) {
            e.fault_depth = depth;
        }
        log::trace!("deliver fault {} err {:?} to {} depth {}", fault_va, utf.err, env_id, depth);
        self.audit_log.record(KernelEvent::FaultDelivered { env_id, utf, depth });

        let result = upcall.call(self, &utf);

        match self.envs.get_mut(&env_id) {
            Some(e) if e.is_alive() => e.fault_depth = depth - 1,
            _ => return Err(KernelError::EnvDestroyed(env_id)),
        }

        if let Err(panic) = result {
            log::error!("{}", panic);
            self.destroy_env(
                env_id,
                ExitReason::Panicked {
                    message: panic.message,
                },
            );
            return Err(KernelError::EnvDestroyed(env_id));
        }

        Ok(())
    }
}
