//! Process records handed out to listing and debugging tools
//!
//! Everything here is a copy taken under the table lock; holding one never
//! pins a process slot.

use core::fmt;

use heapless::{String, Vec};

use crate::config::{NPROC, PROC_NAME_LEN};
use crate::core::types::{Budget, Gid, Pid, Priority, ProcState, Tick, Uid};
use crate::fmt_utils::{write_joined, TickSeconds};

/// Column header matching [`ProcInfo`]'s `Display` row
pub const PROC_INFO_HEADER: &str = "PID\tName\tUID\tGID\tPPID\tPrio\tElapsed\tCPU\tState\tSize";

/// One row of a process listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    /// Parent pid; the root process reports itself
    pub ppid: Pid,
    pub uid: Uid,
    pub gid: Gid,
    pub priority: Priority,
    /// Ticks since the process was created
    pub elapsed_ticks: Tick,
    /// Ticks spent running
    pub cpu_ticks: Tick,
    pub state: ProcState,
    /// Address-space size in bytes
    pub size: usize,
    pub name: String<PROC_NAME_LEN>,
}

impl fmt::Display for ProcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.pid,
            self.name,
            self.uid,
            self.gid,
            self.ppid,
            self.priority,
            TickSeconds(self.elapsed_ticks),
            TickSeconds(self.cpu_ticks),
            self.state,
            self.size
        )
    }
}

/// A ready-list entry: pid and remaining budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntry {
    pub priority: Priority,
    pub pid: Pid,
    pub budget: Budget,
}

impl fmt::Display for ReadyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pid, self.budget)
    }
}

/// Contents of every ready list, highest priority first, each in FIFO order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyListDump {
    pub max_priority: Priority,
    pub entries: Vec<ReadyEntry, NPROC>,
}

impl ReadyListDump {
    /// Entries queued at `priority`, in dispatch order
    pub fn level(&self, priority: Priority) -> impl Iterator<Item = &ReadyEntry> + '_ {
        self.entries.iter().filter(move |e| e.priority == priority)
    }

    /// Pids queued at `priority`, in dispatch order
    pub fn pids(&self, priority: Priority) -> Vec<Pid, NPROC> {
        self.level(priority).map(|e| e.pid).collect()
    }
}

impl fmt::Display for ReadyListDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ready List Processes:")?;
        for priority in (0..=self.max_priority).rev() {
            write!(f, "{}: ", priority)?;
            write_joined(f, self.level(priority), " -> ")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

/// A zombie awaiting its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZombieEntry {
    pub pid: Pid,
    pub ppid: Pid,
}

impl fmt::Display for ZombieEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pid, self.ppid)
    }
}
