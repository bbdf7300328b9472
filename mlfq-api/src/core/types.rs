//! Core types used throughout the process subsystem

use core::fmt;

/// Process identifier type. `0` never names a live process.
pub type Pid = u32;

/// Scheduling priority; larger values are serviced first.
pub type Priority = u32;

/// Value of the external, monotonically increasing tick counter
pub type Tick = u64;

/// Remaining CPU allowance at the current priority, in ticks.
/// Signed because a long run can overdraw it before settlement.
pub type Budget = i64;

/// User identifier type
pub type Uid = u32;

/// Group identifier type
pub type Gid = u32;

/// PID value meaning "no process"
pub const NO_PID: Pid = 0;

/// Process execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcState {
    /// Free table slot
    Unused,
    /// Allocated, still being initialized
    Embryo,
    /// Blocked on a channel
    Sleeping,
    /// Waiting in a ready list
    Runnable,
    /// Executing on a CPU
    Running,
    /// Terminated, waiting to be reaped by its parent
    Zombie,
}

impl ProcState {
    /// Short label used by listing tools
    pub const fn label(self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Embryo => "embryo",
            ProcState::Sleeping => "sleep",
            ProcState::Runnable => "runble",
            ProcState::Running => "run",
            ProcState::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Rendezvous value a sleeping process waits on.
///
/// Wakeup matches by equality only; the variants keep kernel-internal
/// channels from colliding with arbitrary caller-chosen addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A process slot; parents in `wait` sleep on their own slot
    Process(usize),
    /// The tick counter; woken on every timer tick
    Ticks,
    /// Any other kernel object, identified by address
    Address(usize),
}

impl Channel {
    /// Channel identified by the address of a kernel object
    pub fn of<T>(object: &T) -> Self {
        Channel::Address(object as *const T as usize)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Process(slot) => write!(f, "proc[{}]", slot),
            Channel::Ticks => f.write_str("ticks"),
            Channel::Address(addr) => write!(f, "{:#x}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_of_distinguishes_objects() {
        let a = 1u64;
        let b = 2u64;
        assert_eq!(Channel::of(&a), Channel::of(&a));
        assert_ne!(Channel::of(&a), Channel::of(&b));
        assert_ne!(Channel::Process(3), Channel::Address(3));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(ProcState::Runnable.label(), "runble");
        assert_eq!(ProcState::Sleeping.label(), "sleep");
        assert_eq!(ProcState::Zombie.label(), "zombie");
    }
}
