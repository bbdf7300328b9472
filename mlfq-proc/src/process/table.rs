//! Process table
//!
//! A fixed pool of [`Proc`] records partitioned into [`StateLists`]. Every
//! state change goes through [`ProcTable::transition`], which unlinks the slot
//! from the list its current state names and links it onto the list of the
//! new state. A slot found on the wrong list is never repaired: the kernel
//! halts with the list, slot and caller location.

use core::fmt;
use core::panic::Location;

use hashbrown::HashMap;
use log::{debug, error, info, warn};

use mlfq_api::config::{MAX_CREDENTIAL, NPROC, PRIORITY_LEVELS, SchedConfig};
use mlfq_api::{Error, Gid, NO_PID, Pid, Priority, ProcState, Result, Tick, Uid};

use super::lists::{ListId, NotInList, SlotId, StateLists};
use super::proc::Proc;
use crate::sched::SchedStats;

// ============================================================================
// Invariant reporting
// ============================================================================

/// A broken table invariant found by [`ProcTable::check_invariants`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A slot is linked on a list that does not match its state
    WrongList { slot: SlotId, state: ProcState, priority: Priority, list: ListId },
    /// A slot is on no list at all
    MissingFromList { slot: SlotId },
    /// A slot is linked more than once
    DuplicateMembership { slot: SlotId, first: ListId, second: ListId },
    /// Recorded list length differs from the linked chain
    LengthMismatch { list: ListId, recorded: usize, linked: usize },
    /// Ready bitmap disagrees with ready list contents
    ReadyMaskMismatch { priority: Priority },
    /// A live process has a priority above the configured maximum
    PriorityOutOfRange { slot: SlotId, priority: Priority },
    /// `chan` is set on a process that is not Sleeping, or missing on one that is
    ChannelMismatch { slot: SlotId, state: ProcState },
    /// The pid index disagrees with the table
    PidIndexMismatch { pid: Pid },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::WrongList { slot, state, priority, list } => write!(
                f,
                "slot {} in state {} (priority {}) found on list {}",
                slot, state, priority, list
            ),
            InvariantViolation::MissingFromList { slot } => {
                write!(f, "slot {} is on no list", slot)
            }
            InvariantViolation::DuplicateMembership { slot, first, second } => {
                write!(f, "slot {} linked on both {} and {}", slot, first, second)
            }
            InvariantViolation::LengthMismatch { list, recorded, linked } => write!(
                f,
                "list {} records {} entries but links {}",
                list, recorded, linked
            ),
            InvariantViolation::ReadyMaskMismatch { priority } => {
                write!(f, "ready bitmap wrong for priority {}", priority)
            }
            InvariantViolation::PriorityOutOfRange { slot, priority } => {
                write!(f, "slot {} has priority {} above maximum", slot, priority)
            }
            InvariantViolation::ChannelMismatch { slot, state } => {
                write!(f, "slot {} in state {} has inconsistent channel", slot, state)
            }
            InvariantViolation::PidIndexMismatch { pid } => {
                write!(f, "pid index inconsistent for pid {}", pid)
            }
        }
    }
}

// ============================================================================
// Process table
// ============================================================================

/// Fixed-capacity process table with state membership lists
pub struct ProcTable {
    pub(crate) config: SchedConfig,
    pub(crate) procs: [Proc; NPROC],
    pub(crate) lists: StateLists,
    pub(crate) root: Option<SlotId>,
    /// Tick at or after which the next promotion sweep runs
    pub(crate) next_promotion: Tick,
    pub(crate) stats: SchedStats,
    next_pid: Pid,
    pid_to_slot: HashMap<Pid, SlotId>,
}

impl ProcTable {
    /// Create an empty table; every slot starts on the Unused list in slot order
    pub fn new(config: SchedConfig) -> Self {
        let mut table = Self {
            config,
            procs: core::array::from_fn(|_| Proc::new()),
            lists: StateLists::new(),
            root: None,
            next_promotion: config.promotion_interval,
            stats: SchedStats::default(),
            next_pid: 1,
            pid_to_slot: HashMap::with_capacity(NPROC),
        };
        for slot in 0..NPROC {
            table.lists.add(ListId::Unused, slot);
        }
        info!(
            "process table: {} slots, priorities 0..={}, budget {}, promotion every {} ticks",
            NPROC, config.max_priority, config.default_budget, config.promotion_interval
        );
        table
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// Record in `slot`
    pub fn proc(&self, slot: SlotId) -> &Proc {
        &self.procs[slot]
    }

    /// Slot of the root process, once created
    pub fn root(&self) -> Option<SlotId> {
        self.root
    }

    /// Slot holding the live process `pid`
    pub fn find(&self, pid: Pid) -> Option<SlotId> {
        if pid == NO_PID {
            return None;
        }
        self.pid_to_slot.get(&pid).copied()
    }

    /// Number of allocated slots
    pub fn live_count(&self) -> usize {
        self.pid_to_slot.len()
    }

    pub fn lists(&self) -> &StateLists {
        &self.lists
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    /// Tick of the next scheduled promotion sweep
    pub fn next_promotion(&self) -> Tick {
        self.next_promotion
    }

    /// Pid of `slot`'s parent; the root reports its own pid
    pub fn parent_pid(&self, slot: SlotId) -> Pid {
        match self.procs[slot].parent {
            Some(parent) => self.procs[parent].pid,
            None => self.procs[slot].pid,
        }
    }

    fn next_free_pid(&mut self) -> Pid {
        loop {
            let pid = self.next_pid;
            self.next_pid = match self.next_pid.wrapping_add(1) {
                NO_PID => 1,
                next => next,
            };
            if !self.pid_to_slot.contains_key(&pid) {
                return pid;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Take the head of the Unused list and make it an Embryo with a fresh
    /// pid and default scheduling state
    pub fn allocate(&mut self, now: Tick) -> Result<SlotId> {
        let Some(slot) = self.lists.pop_front(ListId::Unused) else {
            warn!("process table full");
            return Err(Error::ProcessTableFull);
        };
        if self.procs[slot].state != ProcState::Unused {
            self.invariant_failure(format_args!(
                "slot {} on unused list in state {}",
                slot, self.procs[slot].state
            ));
        }
        let pid = self.next_free_pid();
        let default_priority = self.config.default_priority;
        let default_budget = self.config.default_budget;

        let proc = &mut self.procs[slot];
        proc.reset();
        proc.pid = pid;
        proc.priority = default_priority;
        proc.budget = default_budget;
        proc.start_ticks = now;
        proc.state = ProcState::Embryo;
        self.lists.add(ListId::Embryo, slot);
        self.pid_to_slot.insert(pid, slot);

        debug!("allocated pid {} in slot {}", pid, slot);
        Ok(slot)
    }

    /// Roll an Embryo back to Unused after a failed initialization
    #[track_caller]
    pub fn discard(&mut self, slot: SlotId) {
        let pid = self.procs[slot].pid;
        self.transition(slot, ProcState::Embryo, ProcState::Unused);
        self.release_identity(slot);
        debug!("discarded embryo pid {} in slot {}", pid, slot);
    }

    /// Clears a slot that has just been moved to Unused
    pub(crate) fn release_identity(&mut self, slot: SlotId) {
        let pid = self.procs[slot].pid;
        if self.pid_to_slot.remove(&pid) != Some(slot) {
            self.invariant_failure(format_args!("pid {} not indexed at slot {}", pid, slot));
        }
        self.procs[slot].reset();
    }

    /// Copy identity from `parent` into the Embryo `child`
    pub fn inherit_from(&mut self, child: SlotId, parent: SlotId) {
        self.expect_state(child, ProcState::Embryo);
        let (name, uid, gid, size) = {
            let p = &self.procs[parent];
            (p.name.clone(), p.uid, p.gid, p.size)
        };
        let c = &mut self.procs[child];
        c.parent = Some(parent);
        c.name = name;
        c.uid = uid;
        c.gid = gid;
        c.size = size;
    }

    /// Mark the Embryo in `slot` as the root process
    pub fn make_root(&mut self, slot: SlotId, name: &str, size: usize, now: Tick) -> Result<()> {
        if self.root.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        self.expect_state(slot, ProcState::Embryo);
        let (uid, gid) = (self.config.root_uid, self.config.root_gid);
        let proc = &mut self.procs[slot];
        proc.parent = None;
        proc.uid = uid;
        proc.gid = gid;
        proc.size = size;
        proc.set_name(name);
        self.root = Some(slot);
        self.next_promotion = now + self.config.promotion_interval;
        info!("root process pid {} ({})", self.procs[slot].pid, name);
        Ok(())
    }

    /// Finish initialization: Embryo to Ready at its priority
    #[track_caller]
    pub fn make_runnable(&mut self, slot: SlotId) {
        self.transition(slot, ProcState::Embryo, ProcState::Runnable);
    }

    pub fn set_size(&mut self, slot: SlotId, size: usize) {
        self.procs[slot].size = size;
    }

    pub fn set_name(&mut self, slot: SlotId, name: &str) {
        self.procs[slot].set_name(name);
    }

    pub fn set_uid(&mut self, slot: SlotId, uid: Uid) -> Result<()> {
        if uid > MAX_CREDENTIAL {
            return Err(Error::InvalidCredential(uid));
        }
        self.procs[slot].uid = uid;
        Ok(())
    }

    pub fn set_gid(&mut self, slot: SlotId, gid: Gid) -> Result<()> {
        if gid > MAX_CREDENTIAL {
            return Err(Error::InvalidCredential(gid));
        }
        self.procs[slot].gid = gid;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Membership transitions
    // ------------------------------------------------------------------------

    /// Unlink `slot` from the list of `from` and link it onto the list of `to`
    #[track_caller]
    pub(crate) fn transition(&mut self, slot: SlotId, from: ProcState, to: ProcState) {
        self.detach(slot, from);
        self.attach(slot, to);
    }

    /// Unlink `slot`, which must be in state `expected`
    #[track_caller]
    pub(crate) fn detach(&mut self, slot: SlotId, expected: ProcState) {
        self.expect_state(slot, expected);
        let list = ListId::for_state(expected, self.procs[slot].priority);
        if let Err(missing) = self.lists.remove(list, slot) {
            self.missing_from_list(missing);
        }
    }

    /// Set `slot`'s state and link it at the tail of the matching list
    pub(crate) fn attach(&mut self, slot: SlotId, state: ProcState) {
        let proc = &mut self.procs[slot];
        proc.state = state;
        self.lists.add(ListId::for_state(state, proc.priority), slot);
    }

    // ------------------------------------------------------------------------
    // Fatal consistency failures
    // ------------------------------------------------------------------------

    #[track_caller]
    pub(crate) fn expect_state(&self, slot: SlotId, expected: ProcState) {
        let actual = self.procs[slot].state;
        if actual != expected {
            self.invariant_failure(format_args!(
                "slot {} (pid {}): expected state {}, found {}",
                slot, self.procs[slot].pid, expected, actual
            ));
        }
    }

    #[track_caller]
    fn missing_from_list(&self, missing: NotInList) -> ! {
        let proc = &self.procs[missing.slot];
        self.invariant_failure(format_args!(
            "remove of slot {} (pid {}, state {}) from list {} failed",
            missing.slot, proc.pid, proc.state, missing.list
        ))
    }

    #[cold]
    #[track_caller]
    pub(crate) fn invariant_failure(&self, what: fmt::Arguments<'_>) -> ! {
        let location = Location::caller();
        error!("process table invariant violated at {}: {}", location, what);
        panic!("process table invariant violated at {}: {}", location, what);
    }

    // ------------------------------------------------------------------------
    // Consistency sweep
    // ------------------------------------------------------------------------

    fn all_lists() -> impl Iterator<Item = ListId> {
        [ListId::Unused, ListId::Embryo, ListId::Sleeping, ListId::Running, ListId::Zombie]
            .into_iter()
            .chain((0..PRIORITY_LEVELS as Priority).map(ListId::Ready))
    }

    /// Verify list membership, list shape, the ready bitmap and the pid index
    pub fn check_invariants(&self) -> core::result::Result<(), InvariantViolation> {
        let mut seen: [Option<ListId>; NPROC] = [None; NPROC];

        for list in Self::all_lists() {
            let recorded = self.lists.len(list);
            let linked = self.lists.chain_len(list);
            if recorded != linked {
                return Err(InvariantViolation::LengthMismatch { list, recorded, linked });
            }
            for slot in self.lists.iter(list) {
                if let Some(first) = seen[slot] {
                    return Err(InvariantViolation::DuplicateMembership { slot, first, second: list });
                }
                seen[slot] = Some(list);
                let proc = &self.procs[slot];
                if ListId::for_state(proc.state, proc.priority) != list {
                    return Err(InvariantViolation::WrongList {
                        slot,
                        state: proc.state,
                        priority: proc.priority,
                        list,
                    });
                }
            }
        }

        for priority in 0..PRIORITY_LEVELS as Priority {
            let bit = self.lists.ready_mask() & (1u64 << priority) != 0;
            if bit == self.lists.is_empty(ListId::Ready(priority)) {
                return Err(InvariantViolation::ReadyMaskMismatch { priority });
            }
        }

        let mut live = 0;
        for (slot, proc) in self.procs.iter().enumerate() {
            if seen[slot].is_none() {
                return Err(InvariantViolation::MissingFromList { slot });
            }
            if proc.chan.is_some() != (proc.state == ProcState::Sleeping) {
                return Err(InvariantViolation::ChannelMismatch { slot, state: proc.state });
            }
            if proc.state == ProcState::Unused {
                continue;
            }
            live += 1;
            if proc.priority > self.config.max_priority {
                return Err(InvariantViolation::PriorityOutOfRange { slot, priority: proc.priority });
            }
            if self.pid_to_slot.get(&proc.pid) != Some(&slot) {
                return Err(InvariantViolation::PidIndexMismatch { pid: proc.pid });
            }
        }
        if live != self.pid_to_slot.len() {
            return Err(InvariantViolation::PidIndexMismatch { pid: NO_PID });
        }
        Ok(())
    }
}
