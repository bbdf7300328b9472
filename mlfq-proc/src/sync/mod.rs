//! Sleep and wakeup on channels
//!
//! Both halves run under the table lock. A sleeper records its channel and
//! joins the Sleeping list in the same critical section in which the waker
//! would look for it, so a wakeup issued after the channel is recorded is
//! never missed.

use heapless::Vec;
use log::trace;

use mlfq_api::config::NPROC;
use mlfq_api::{Channel, ProcState, Tick};

use crate::process::lists::{ListId, SlotId};
use crate::process::table::ProcTable;

impl ProcTable {
    /// Running to Sleeping on `chan`, settling the budget first
    #[track_caller]
    pub fn block(&mut self, slot: SlotId, chan: Channel, now: Tick) {
        self.stop_running(slot, now);
        self.procs[slot].chan = Some(chan);
        self.attach(slot, ProcState::Sleeping);
        self.stats.sleeps += 1;
        trace!("pid {} sleeps on {}", self.procs[slot].pid, chan);
    }

    /// Move every process sleeping on `chan` to the ready list of its
    /// priority, in Sleeping-list order. Returns how many were woken.
    pub fn wakeup(&mut self, chan: Channel) -> usize {
        let matches: Vec<SlotId, NPROC> = self
            .lists
            .iter(ListId::Sleeping)
            .filter(|&slot| self.procs[slot].chan == Some(chan))
            .collect();
        for &slot in matches.iter() {
            self.make_ready_from_sleep(slot);
        }
        if !matches.is_empty() {
            self.stats.wakeups += matches.len() as u64;
            trace!("wakeup {}: {} woken", chan, matches.len());
        }
        matches.len()
    }

    /// Sleeping to Ready at the current priority, clearing the channel
    #[track_caller]
    pub(crate) fn make_ready_from_sleep(&mut self, slot: SlotId) {
        self.detach(slot, ProcState::Sleeping);
        self.procs[slot].chan = None;
        self.attach(slot, ProcState::Runnable);
    }
}
