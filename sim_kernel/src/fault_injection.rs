//! Deterministic fault injection for testing
//!
//! This module lets tests make kernel primitives fail on purpose, so the
//! error paths of user-space code can be exercised without building a
//! genuinely exhausted system.
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: Failures trigger after an exact number of calls
//! - **Composable**: Memory and lifecycle faults can be combined
//! - **Test-focused**: Not intended for production use
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{FaultPlan, LifecycleFault, MemoryFault};
//!
//! let plan = FaultPlan::new()
//!     .with_memory_fault(MemoryFault::FailMapAfter { count: 3 })
//!     .with_lifecycle_fault(LifecycleFault::FailExofork);
//! ```

/// A fault to inject into physical memory management
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFault {
    /// Hand out `count` more frames, then fail every allocation
    ExhaustAfter { count: usize },

    /// Let `count` more `page_map` calls succeed, then fail each with `NoMemory`
    FailMapAfter { count: usize },
}

/// A fault to inject into environment lifecycle calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleFault {
    /// Every `exofork` fails as if the environment table were full
    FailExofork,
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    memory_faults: Vec<MemoryFault>,
    lifecycle_faults: Vec<LifecycleFault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self {
            memory_faults: Vec::new(),
            lifecycle_faults: Vec::new(),
        }
    }

    /// Adds a memory fault to the plan
    pub fn with_memory_fault(mut self, fault: MemoryFault) -> Self {
        self.memory_faults.push(fault);
        self
    }

    /// Adds a lifecycle fault to the plan
    pub fn with_lifecycle_fault(mut self, fault: LifecycleFault) -> Self {
        self.lifecycle_faults.push(fault);
        self
    }

    pub fn memory_faults(&self) -> &[MemoryFault] {
        &self.memory_faults
    }

    pub fn lifecycle_faults(&self) -> &[LifecycleFault] {
        &self.lifecycle_faults
    }
}

/// Fault injector consulted by the kernel before each primitive
#[derive(Debug)]
pub struct FaultInjector {
    plan: FaultPlan,
    frames_remaining: Option<usize>,
    maps_remaining: Option<usize>,
    fail_exofork: bool,
    denied: usize,
}

impl FaultInjector {
    /// Creates a new fault injector with the given plan
    pub fn new(plan: FaultPlan) -> Self {
        let mut injector = Self {
            plan: plan.clone(),
            frames_remaining: None,
            maps_remaining: None,
            fail_exofork: false,
            denied: 0,
        };

        for fault in plan.memory_faults() {
            match fault {
                MemoryFault::ExhaustAfter { count } => {
                    injector.frames_remaining = Some(*count);
                }
                MemoryFault::FailMapAfter { count } => {
                    injector.maps_remaining = Some(*count);
                }
            }
        }

        for fault in plan.lifecycle_faults() {
            match fault {
                LifecycleFault::FailExofork => {
                    injector.fail_exofork = true;
                }
            }
        }

        injector
    }

    pub fn plan(&self) -> &FaultPlan {
        &self.plan
    }

    /// Checks whether the next frame allocation must fail
    pub fn should_fail_alloc(&mut self) -> bool {
        let fail = Self::consume(&mut self.frames_remaining);
        if fail {
            self.denied += 1;
        }
        fail
    }

    /// Checks whether the next `page_map` must fail
    pub fn should_fail_map(&mut self) -> bool {
        let fail = Self::consume(&mut self.maps_remaining);
        if fail {
            self.denied += 1;
        }
        fail
    }

    pub fn should_fail_exofork(&mut self) -> bool {
        if self.fail_exofork {
            self.denied += 1;
        }
        self.fail_exofork
    }

    /// Number of calls failed by this injector so far
    pub fn denied_count(&self) -> usize {
        self.denied
    }

    fn consume(remaining: &mut Option<usize>) -> bool {
        match remaining {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}
