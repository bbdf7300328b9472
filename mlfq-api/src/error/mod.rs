//! Error handling module for the process subsystem
//!
//! Only recoverable failures are represented here. Internal consistency
//! violations (a process missing from the list its state names) are never
//! returned as values; the process subsystem halts on them.

use core::fmt;

use crate::core::types::{Pid, Priority};

/// Common error type returned by process subsystem operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No free slot in the process table
    ProcessTableFull,
    /// Kernel stack allocation failed
    OutOfStacks,
    /// Address space creation, copy or resize failed
    OutOfMemory,
    /// No live process has this pid
    NoSuchProcess(Pid),
    /// Priority outside `0..=max_priority`
    InvalidPriority(Priority),
    /// User or group id outside the accepted range
    InvalidCredential(u32),
    /// The caller has no children to wait for
    NoChildren,
    /// A blocking call was abandoned because the caller was killed
    Killed,
    /// The calling CPU is not running a process
    NoCurrentProcess,
    /// The root process already exists
    AlreadyInitialized,
    /// Configuration error
    Config(&'static str),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Out of slots, stacks or memory; the failed call left nothing behind
    ResourceExhaustion,
    /// Bad pid, bad argument, or a request that cannot be satisfied
    UserRequest,
    /// Rejected scheduler configuration
    Configuration,
}

impl Error {
    /// Classify this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::ProcessTableFull | Error::OutOfStacks | Error::OutOfMemory => {
                ErrorKind::ResourceExhaustion
            }
            Error::Config(_) => ErrorKind::Configuration,
            _ => ErrorKind::UserRequest,
        }
    }

    /// Value returned to user space by the system-call layer
    pub const fn errno(&self) -> isize {
        -1
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ProcessTableFull => write!(f, "Process table full"),
            Error::OutOfStacks => write!(f, "Out of kernel stacks"),
            Error::OutOfMemory => write!(f, "Out of memory"),
            Error::NoSuchProcess(pid) => write!(f, "No such process: {}", pid),
            Error::InvalidPriority(prio) => write!(f, "Invalid priority: {}", prio),
            Error::InvalidCredential(id) => write!(f, "Invalid credential: {}", id),
            Error::NoChildren => write!(f, "No children"),
            Error::Killed => write!(f, "Process killed"),
            Error::NoCurrentProcess => write!(f, "No current process"),
            Error::AlreadyInitialized => write!(f, "Root process already exists"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;
