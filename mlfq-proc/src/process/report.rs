//! Listing and list-dump queries

use heapless::Vec;

use mlfq_api::config::NPROC;
use mlfq_api::process::ReadyEntry;
use mlfq_api::{Pid, ProcInfo, ProcState, ReadyListDump, Tick, ZombieEntry};

use super::lists::ListId;
use super::table::ProcTable;

impl ProcTable {
    /// Up to `max` listing rows for live processes, in slot order.
    /// Embryos are skipped since they are not yet fully formed.
    pub fn snapshot(&self, now: Tick, max: usize) -> Vec<ProcInfo, NPROC> {
        self.procs
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                matches!(
                    p.state,
                    ProcState::Runnable | ProcState::Running | ProcState::Sleeping | ProcState::Zombie
                )
            })
            .take(max)
            .map(|(slot, p)| ProcInfo {
                pid: p.pid,
                ppid: self.parent_pid(slot),
                uid: p.uid,
                gid: p.gid,
                priority: p.priority,
                elapsed_ticks: now.saturating_sub(p.start_ticks),
                cpu_ticks: p.cpu_ticks_total,
                state: p.state,
                size: p.size,
                name: p.name.clone(),
            })
            .collect()
    }

    /// Every ready list, highest priority first
    pub fn ready_dump(&self) -> ReadyListDump {
        let max_priority = self.config.max_priority;
        let (lists, procs) = (&self.lists, &self.procs);
        let entries = (0..=max_priority)
            .rev()
            .flat_map(move |priority| {
                lists.iter(ListId::Ready(priority)).map(move |slot| ReadyEntry {
                    priority,
                    pid: procs[slot].pid,
                    budget: procs[slot].budget,
                })
            })
            .collect();
        ReadyListDump { max_priority, entries }
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.lists.len(ListId::Unused)
    }

    /// Pids on the Sleeping list, in list order
    pub fn sleeping_pids(&self) -> Vec<Pid, NPROC> {
        self.lists.iter(ListId::Sleeping).map(|slot| self.procs[slot].pid).collect()
    }

    /// Zombies with their parent pids, in list order
    pub fn zombie_dump(&self) -> Vec<ZombieEntry, NPROC> {
        self.lists
            .iter(ListId::Zombie)
            .map(|slot| ZombieEntry {
                pid: self.procs[slot].pid,
                ppid: self.parent_pid(slot),
            })
            .collect()
    }
}
