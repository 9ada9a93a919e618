//! Per-environment user-space state
//!
//! Every environment carries one [`EnvContext`]: its own identity and the
//! fault handler it has installed. A child starts with a copy of its
//! parent's context (the memory holding it is duplicated by fork) and fixes
//! up the identity on its first return from `exofork`.

use core_types::layout::UXSTACK;
use core_types::{EnvId, PteFlags};
use kernel_api::{KernelError, UpcallEntry, UserEnv};

/// Identity and fault-handler bookkeeping of the running environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvContext {
    env: EnvId,
    parent: Option<EnvId>,
    handler: Option<UpcallEntry>,
}

impl EnvContext {
    /// Builds the context of the environment `sys` is running as
    pub fn start<S: UserEnv + ?Sized>(sys: &S) -> Self {
        let env = sys.getenvid();
        Self {
            env,
            parent: sys.env_entry(env).and_then(|info| info.parent_id),
            handler: None,
        }
    }

    pub fn env_id(&self) -> EnvId {
        self.env
    }

    pub fn parent_id(&self) -> Option<EnvId> {
        self.parent
    }

    /// The fault handler currently installed, if any
    pub fn handler(&self) -> Option<UpcallEntry> {
        self.handler
    }

    /// Installs `entry` as this environment's page fault handler
    ///
    /// The first call allocates the exception stack. Installing the entry
    /// that is already active does nothing.
    pub fn set_pgfault_handler<S: UserEnv + ?Sized>(
        &mut self,
        sys: &mut S,
        entry: UpcallEntry,
    ) -> Result<(), KernelError> {
        match self.handler {
            Some(current) if current == entry => return Ok(()),
            Some(_) => {}
            None => sys.page_alloc(self.env, UXSTACK, PteFlags::user_rw())?,
        }

        sys.env_set_pgfault_upcall(self.env, entry)?;
        self.handler = Some(entry);
        Ok(())
    }

    /// Re-reads identity after resuming as a freshly forked child
    pub(crate) fn become_child<S: UserEnv + ?Sized>(&mut self, sys: &S) {
        self.env = sys.getenvid();
        self.parent = sys.env_entry(self.env).and_then(|info| info.parent_id);
    }
}
