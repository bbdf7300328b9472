//! Process record

use heapless::String;

use mlfq_api::config::PROC_NAME_LEN;
use mlfq_api::{Budget, Channel, Gid, NO_PID, Pid, Priority, ProcState, Tick, Uid};

use super::lists::SlotId;

/// One slot of the process table.
///
/// Fields are only written by the table while its lock is held; everything
/// outside the crate sees them through the read accessors.
#[derive(Debug, Clone)]
pub struct Proc {
    pub(crate) pid: Pid,
    /// Slot of the creating process; `None` for the root and free slots
    pub(crate) parent: Option<SlotId>,
    pub(crate) state: ProcState,
    pub(crate) priority: Priority,
    pub(crate) budget: Budget,
    /// Tick of the last dispatch
    pub(crate) cpu_ticks_in: Tick,
    pub(crate) cpu_ticks_total: Tick,
    /// Tick of allocation
    pub(crate) start_ticks: Tick,
    pub(crate) killed: bool,
    /// Set exactly while Sleeping
    pub(crate) chan: Option<Channel>,
    pub(crate) name: String<PROC_NAME_LEN>,
    pub(crate) uid: Uid,
    pub(crate) gid: Gid,
    /// Address-space size in bytes
    pub(crate) size: usize,
}

impl Proc {
    pub fn new() -> Self {
        Self {
            pid: NO_PID,
            parent: None,
            state: ProcState::Unused,
            priority: 0,
            budget: 0,
            cpu_ticks_in: 0,
            cpu_ticks_total: 0,
            start_ticks: 0,
            killed: false,
            chan: None,
            name: String::new(),
            uid: 0,
            gid: 0,
            size: 0,
        }
    }

    /// Clears identity and accounting, leaving a free slot
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Replaces the name, truncating to the fixed capacity
    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        for ch in name.chars() {
            if self.name.push(ch).is_err() {
                break;
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<SlotId> {
        self.parent
    }

    pub fn state(&self) -> ProcState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn budget(&self) -> Budget {
        self.budget
    }

    pub fn cpu_ticks_in(&self) -> Tick {
        self.cpu_ticks_in
    }

    pub fn cpu_ticks_total(&self) -> Tick {
        self.cpu_ticks_total
    }

    pub fn start_ticks(&self) -> Tick {
        self.start_ticks
    }

    pub fn killed(&self) -> bool {
        self.killed
    }

    pub fn chan(&self) -> Option<Channel> {
        self.chan
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn gid(&self) -> Gid {
        self.gid
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for Proc {
    fn default() -> Self {
        Self::new()
    }
}
