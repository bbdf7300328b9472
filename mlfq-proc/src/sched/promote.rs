//! Periodic priority promotion

use log::debug;

use mlfq_api::{Budget, Priority, Tick};

use crate::process::lists::ListId;
use crate::process::table::ProcTable;

impl ProcTable {
    /// Run the promotion sweep if `now` has reached the scheduled time.
    ///
    /// Every Sleeping, Running or Ready process below the top level gains one
    /// level and a fresh budget. Returns whether a sweep ran.
    pub fn promote_if_due(&mut self, now: Tick) -> bool {
        if !self.config.is_multilevel() || now < self.next_promotion {
            return false;
        }
        let max = self.config.max_priority;
        let budget = self.config.default_budget;
        let mut promoted = 0;

        for list in [ListId::Sleeping, ListId::Running] {
            for slot in self.lists.iter(list) {
                let proc = &mut self.procs[slot];
                if proc.priority < max {
                    proc.priority += 1;
                    proc.budget = budget;
                    promoted += 1;
                }
            }
        }

        // Top-down so a process lifted from level p is not lifted again from p + 1
        for priority in (0..max).rev() {
            promoted += self.lift_ready_level(priority, budget);
        }

        self.next_promotion = now + self.config.promotion_interval;
        self.stats.promotion_sweeps += 1;
        self.stats.promotions += promoted;
        debug!(
            "promotion sweep at tick {}: {} processes lifted, next at {}",
            now, promoted, self.next_promotion
        );
        true
    }

    /// Move every process on ready level `priority` to the tail of the level
    /// above, keeping their relative order
    fn lift_ready_level(&mut self, priority: Priority, budget: Budget) -> u64 {
        let mut lifted = 0;
        while let Some(slot) = self.lists.pop_front(ListId::Ready(priority)) {
            let proc = &mut self.procs[slot];
            proc.priority = priority + 1;
            proc.budget = budget;
            self.lists.add(ListId::Ready(priority + 1), slot);
            lifted += 1;
        }
        lifted
    }
}
