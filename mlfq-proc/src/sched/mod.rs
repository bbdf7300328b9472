//! Multi-level feedback queue scheduling
//!
//! Ready lists are serviced from the highest non-empty priority down, FIFO
//! within a level. A process that uses up its budget at a level drops one
//! level; the promotion sweep in [`promote`] lifts everything back up
//! periodically. With `max_priority == 0` there is a single level and budgets
//! are ignored.

pub mod promote;

use log::{debug, trace};

use mlfq_api::{Error, Pid, Priority, ProcState, Result, Tick};

use crate::process::lists::{ListId, SlotId};
use crate::process::table::ProcTable;

/// Counters updated under the table lock
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    pub dispatches: u64,
    pub preemptions: u64,
    pub sleeps: u64,
    pub wakeups: u64,
    pub demotions: u64,
    pub promotion_sweeps: u64,
    pub promotions: u64,
    pub reaped: u64,
}

impl ProcTable {
    /// Pick the head of the highest non-empty ready list and mark it Running
    pub fn dispatch(&mut self, now: Tick) -> Option<SlotId> {
        let priority = self.lists.highest_ready()?;
        let Some(slot) = self.lists.pop_front(ListId::Ready(priority)) else {
            self.invariant_failure(format_args!("ready bitmap set for empty level {}", priority));
        };
        if self.procs[slot].state != ProcState::Runnable || self.procs[slot].priority != priority {
            self.invariant_failure(format_args!(
                "slot {} on ready[{}] in state {} priority {}",
                slot, priority, self.procs[slot].state, self.procs[slot].priority
            ));
        }
        self.procs[slot].cpu_ticks_in = now;
        self.attach(slot, ProcState::Running);
        self.stats.dispatches += 1;
        trace!("dispatch pid {} at priority {}", self.procs[slot].pid, priority);
        Some(slot)
    }

    /// Charge the CPU time since dispatch and apply budget settlement.
    ///
    /// Only valid while `slot` is Running.
    fn settle(&mut self, slot: SlotId, now: Tick) {
        let multilevel = self.config.is_multilevel();
        let default_budget = self.config.default_budget;
        let proc = &mut self.procs[slot];
        let used = now.saturating_sub(proc.cpu_ticks_in);
        proc.cpu_ticks_total += used;
        if !multilevel {
            return;
        }
        proc.budget -= used as i64;
        if proc.budget <= 0 {
            proc.priority = proc.priority.saturating_sub(1);
            proc.budget = default_budget;
            self.stats.demotions += 1;
            debug!("pid {} demoted to priority {}", proc.pid, proc.priority);
        }
    }

    /// Take `slot` off the Running list and settle its budget; the caller
    /// attaches it to its next list
    #[track_caller]
    pub(crate) fn stop_running(&mut self, slot: SlotId, now: Tick) {
        self.detach(slot, ProcState::Running);
        self.settle(slot, now);
    }

    /// Running to Ready at the settled priority, queued behind its peers
    #[track_caller]
    pub fn preempt(&mut self, slot: SlotId, now: Tick) {
        self.stop_running(slot, now);
        self.attach(slot, ProcState::Runnable);
        self.stats.preemptions += 1;
        trace!("pid {} yields at priority {}", self.procs[slot].pid, self.procs[slot].priority);
    }

    /// Change the priority of `pid`, resetting its budget.
    ///
    /// A Ready process is moved to the tail of its new level; setting a Ready
    /// process to its current priority changes nothing.
    pub fn set_priority(&mut self, pid: Pid, priority: Priority) -> Result<()> {
        if priority > self.config.max_priority {
            return Err(Error::InvalidPriority(priority));
        }
        let slot = self.find(pid).ok_or(Error::NoSuchProcess(pid))?;
        let default_budget = self.config.default_budget;
        match self.procs[slot].state {
            ProcState::Runnable => {
                if self.procs[slot].priority == priority {
                    return Ok(());
                }
                self.detach(slot, ProcState::Runnable);
                self.procs[slot].priority = priority;
                self.procs[slot].budget = default_budget;
                self.attach(slot, ProcState::Runnable);
            }
            ProcState::Sleeping | ProcState::Running => {
                self.procs[slot].priority = priority;
                self.procs[slot].budget = default_budget;
            }
            _ => return Err(Error::NoSuchProcess(pid)),
        }
        debug!("pid {} priority set to {}", pid, priority);
        Ok(())
    }

    /// Priority of a Ready, Running or Sleeping process
    pub fn priority_of(&self, pid: Pid) -> Result<Priority> {
        let slot = self.find(pid).ok_or(Error::NoSuchProcess(pid))?;
        match self.procs[slot].state {
            ProcState::Runnable | ProcState::Running | ProcState::Sleeping => {
                Ok(self.procs[slot].priority)
            }
            _ => Err(Error::NoSuchProcess(pid)),
        }
    }
}
