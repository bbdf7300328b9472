//! Table side of exit, wait and kill
//!
//! These run with the table lock held. Resource release and the hand-off to
//! the scheduler are done by the caller around them.

use log::debug;

use mlfq_api::{Channel, Error, Pid, ProcState, Result, Tick};

use super::lists::{ListId, SlotId};
use super::table::ProcTable;

/// Outcome of one scan for a child to reap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitScan {
    /// A zombie child was reclaimed
    Reaped(Pid),
    /// Children exist but none has exited yet
    Pending,
    /// The caller has no children
    NoChildren,
}

impl ProcTable {
    /// Terminate the Running process in `slot`.
    ///
    /// Wakes the parent, hands every child to the root process, settles the
    /// budget and leaves the process a Zombie. The caller must switch away
    /// without returning to it.
    #[track_caller]
    pub fn exit(&mut self, slot: SlotId, now: Tick) {
        let Some(root) = self.root else {
            self.invariant_failure(format_args!("exit before root process exists"));
        };
        if slot == root {
            self.invariant_failure(format_args!("root process exiting"));
        }

        if let Some(parent) = self.procs[slot].parent {
            self.wakeup(Channel::Process(parent));
        }

        let mut root_has_zombie = false;
        for child in 0..self.procs.len() {
            let proc = &mut self.procs[child];
            if proc.state == ProcState::Unused || proc.parent != Some(slot) {
                continue;
            }
            proc.parent = Some(root);
            root_has_zombie |= proc.state == ProcState::Zombie;
        }
        if root_has_zombie {
            self.wakeup(Channel::Process(root));
        }

        self.stop_running(slot, now);
        self.attach(slot, ProcState::Zombie);
        debug!("pid {} exited", self.procs[slot].pid);
    }

    /// Reap one zombie child of `parent`.
    ///
    /// `release` is called with the zombie's slot and address-space size
    /// before the slot returns to Unused, so its resources are freed while
    /// nothing else can claim the slot.
    pub fn reap_child<F>(&mut self, parent: SlotId, release: F) -> WaitScan
    where
        F: FnOnce(SlotId, usize),
    {
        let zombie = self
            .lists
            .iter(ListId::Zombie)
            .find(|&s| self.procs[s].parent == Some(parent));

        if let Some(child) = zombie {
            let pid = self.procs[child].pid;
            release(child, self.procs[child].size);
            self.transition(child, ProcState::Zombie, ProcState::Unused);
            self.release_identity(child);
            self.stats.reaped += 1;
            debug!("reaped pid {}", pid);
            return WaitScan::Reaped(pid);
        }

        let has_children = self
            .procs
            .iter()
            .enumerate()
            .any(|(s, p)| s != parent && p.state != ProcState::Unused && p.parent == Some(parent));
        if has_children {
            WaitScan::Pending
        } else {
            WaitScan::NoChildren
        }
    }

    /// Mark `pid` killed, waking it if it sleeps.
    ///
    /// A zombie is left untouched.
    pub fn kill(&mut self, pid: Pid) -> Result<()> {
        let slot = self.find(pid).ok_or(Error::NoSuchProcess(pid))?;
        match self.procs[slot].state {
            ProcState::Zombie => {}
            ProcState::Sleeping => {
                self.procs[slot].killed = true;
                self.make_ready_from_sleep(slot);
            }
            _ => self.procs[slot].killed = true,
        }
        debug!("kill pid {}", pid);
        Ok(())
    }
}
