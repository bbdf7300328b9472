//! Scheduler configuration
//!
//! Table and CPU limits are compile-time constants because the process table
//! is a fixed pool. Scheduling parameters are runtime values checked once by
//! [`SchedConfig::validate`] before the table is built.

use static_assertions::const_assert;

use crate::core::types::{Budget, Gid, Priority, Tick, Uid};
use crate::error::{Error, Result};

/// Maximum number of processes
pub const NPROC: usize = 64;

/// Maximum number of CPUs running a scheduler loop
pub const NCPU: usize = 8;

/// Number of ready lists available; `max_priority` must be below this
pub const PRIORITY_LEVELS: usize = 32;

/// Maximum length of a process name
pub const PROC_NAME_LEN: usize = 16;

/// Largest accepted uid/gid
pub const MAX_CREDENTIAL: u32 = 32767;

/// Default highest priority level
pub const DEFAULT_MAX_PRIORITY: Priority = 6;

/// Default CPU allowance before demotion, in ticks
pub const DEFAULT_BUDGET: Budget = 300;

/// Default period between promotion sweeps, in ticks
pub const DEFAULT_PROMOTION_INTERVAL: Tick = 3000;

const_assert!(NPROC > 0 && NPROC < u16::MAX as usize);
const_assert!(NCPU > 0);
const_assert!(PRIORITY_LEVELS > 0 && PRIORITY_LEVELS <= 64);
const_assert!((DEFAULT_MAX_PRIORITY as usize) < PRIORITY_LEVELS);

/// Runtime scheduler parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Highest priority level; `0` selects single-level round robin
    pub max_priority: Priority,
    /// Priority given to newly allocated processes
    pub default_priority: Priority,
    /// Budget given on allocation, demotion, promotion and priority change
    pub default_budget: Budget,
    /// Ticks between promotion sweeps
    pub promotion_interval: Tick,
    /// Credentials of the root process
    pub root_uid: Uid,
    pub root_gid: Gid,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            max_priority: DEFAULT_MAX_PRIORITY,
            default_priority: DEFAULT_MAX_PRIORITY,
            default_budget: DEFAULT_BUDGET,
            promotion_interval: DEFAULT_PROMOTION_INTERVAL,
            root_uid: 0,
            root_gid: 0,
        }
    }
}

impl SchedConfig {
    pub fn with_max_priority(mut self, max_priority: Priority) -> Self {
        self.max_priority = max_priority;
        self
    }

    pub fn with_default_priority(mut self, default_priority: Priority) -> Self {
        self.default_priority = default_priority;
        self
    }

    pub fn with_default_budget(mut self, default_budget: Budget) -> Self {
        self.default_budget = default_budget;
        self
    }

    pub fn with_promotion_interval(mut self, promotion_interval: Tick) -> Self {
        self.promotion_interval = promotion_interval;
        self
    }

    pub fn with_root_credentials(mut self, uid: Uid, gid: Gid) -> Self {
        self.root_uid = uid;
        self.root_gid = gid;
        self
    }

    /// Whether budgets and promotion are in effect
    pub const fn is_multilevel(&self) -> bool {
        self.max_priority > 0
    }

    /// Check the configuration, returning it unchanged when usable
    pub fn validate(self) -> Result<Self> {
        if self.max_priority as usize >= PRIORITY_LEVELS {
            return Err(Error::Config("max_priority exceeds available ready lists"));
        }
        if self.default_priority > self.max_priority {
            return Err(Error::Config("default_priority above max_priority"));
        }
        if self.default_budget <= 0 {
            return Err(Error::Config("default_budget must be positive"));
        }
        if self.promotion_interval == 0 {
            return Err(Error::Config("promotion_interval must be positive"));
        }
        if self.root_uid > MAX_CREDENTIAL || self.root_gid > MAX_CREDENTIAL {
            return Err(Error::Config("root credentials out of range"));
        }
        Ok(self)
    }
}
