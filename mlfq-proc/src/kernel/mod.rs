//! Process subsystem entry points
//!
//! [`Kernel`] owns the process table behind the single table lock, the
//! per-slot execution data (saved context, kernel stack, address space, trap
//! frame, resource handles) and the per-CPU scheduler state. System calls,
//! trap handlers and the per-CPU scheduler loops all come through here.
//!
//! # Lock hand-off
//!
//! A process gives up its CPU by calling `sched` with the table lock held.
//! The lock travels with the switch: the scheduler loop that resumes releases
//! it, and a process resumed by the scheduler releases the lock the scheduler
//! took. A process switched to for the first time releases it in
//! [`Kernel::fork_return`]. Interrupts stay off on a CPU for as long as it holds
//! the lock, tracked by `push_off`/`pop_off` nesting.
//!
//! # Execution data
//!
//! Per-slot data lives outside the lock in `UnsafeCell`s. It is touched only
//! by its owner: the process running in the slot, the thread that allocated
//! an Embryo, or a parent reaping a Zombie with the table lock held.

mod cpu;

use core::cell::UnsafeCell;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use log::{debug, error, info, warn};
use spin::{Mutex, MutexGuard};

use mlfq_api::config::{NCPU, NPROC, SchedConfig};
use mlfq_api::{
    Channel, Error, Gid, Pid, Platform, Priority, ProcInfo, ProcState, ReadyListDump, Result,
    Tick, Uid, ZombieEntry,
};

use crate::process::lifecycle::WaitScan;
use crate::process::lists::SlotId;
use crate::process::table::{InvariantViolation, ProcTable};
use crate::sched::SchedStats;
use cpu::Cpu;

// ============================================================================
// Per-slot execution data
// ============================================================================

struct Resources<P: Platform> {
    stack: P::Stack,
    space: Option<P::AddressSpace>,
    trap_frame: Option<P::TrapFrame>,
    handles: Option<P::Handles>,
}

struct Slot<P: Platform> {
    context: UnsafeCell<P::Context>,
    resources: UnsafeCell<Option<Resources<P>>>,
}

impl<P: Platform> Slot<P> {
    fn new() -> Self {
        Self {
            context: UnsafeCell::new(P::Context::default()),
            resources: UnsafeCell::new(None),
        }
    }
}

// ============================================================================
// Table lock guard
// ============================================================================

/// Table lock held with interrupts pushed off on the holding CPU
pub(crate) struct TableGuard<'a, P: Platform> {
    kernel: &'a Kernel<P>,
    guard: ManuallyDrop<MutexGuard<'a, ProcTable>>,
}

impl<P: Platform> Deref for TableGuard<'_, P> {
    type Target = ProcTable;

    fn deref(&self) -> &ProcTable {
        &self.guard
    }
}

impl<P: Platform> DerefMut for TableGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut ProcTable {
        &mut self.guard
    }
}

impl<P: Platform> Drop for TableGuard<'_, P> {
    fn drop(&mut self) {
        // SAFETY: the guard is dropped exactly once, here
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.kernel.pop_off();
    }
}

// ============================================================================
// Kernel
// ============================================================================

/// The process subsystem of one machine
pub struct Kernel<P: Platform> {
    platform: P,
    table: Mutex<ProcTable>,
    slots: [Slot<P>; NPROC],
    cpus: [Cpu<P::Context>; NCPU],
}

// SAFETY: the table is behind its lock. Slot data is only accessed by its
// owner as described in the module docs, and per-CPU data only by its CPU
// with interrupts off. All contained platform types are `Send`.
unsafe impl<P: Platform> Sync for Kernel<P> {}

impl<P: Platform> Kernel<P> {
    /// Build the process subsystem over `platform`
    pub fn new(platform: P, config: SchedConfig) -> Result<Self> {
        let config = config.validate()?;
        Ok(Self {
            platform,
            table: Mutex::new(ProcTable::new(config)),
            slots: core::array::from_fn(|_| Slot::new()),
            cpus: core::array::from_fn(|_| Cpu::new()),
        })
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub(crate) fn lock_table(&self) -> TableGuard<'_, P> {
        self.push_off();
        let guard = self.table.lock();
        TableGuard { kernel: self, guard: ManuallyDrop::new(guard) }
    }

    /// Run `f` on the table with the lock held
    pub fn with_table<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ProcTable) -> R,
    {
        let table = self.lock_table();
        f(&table)
    }

    fn require_current(&self) -> Result<SlotId> {
        self.current_slot().ok_or(Error::NoCurrentProcess)
    }

    fn now(&self) -> Tick {
        self.platform.current_tick()
    }

    // ------------------------------------------------------------------------
    // Allocation and release
    // ------------------------------------------------------------------------

    /// Allocate an Embryo with a kernel stack and a fresh context
    fn allocate(&self) -> Result<SlotId> {
        let slot = self.lock_table().allocate(self.now())?;
        let Some(stack) = self.platform.allocate_stack() else {
            warn!("out of kernel stacks");
            self.lock_table().discard(slot);
            return Err(Error::OutOfStacks);
        };
        let context = self.platform.init_context(&stack);
        // SAFETY: the slot is an Embryo owned by this thread
        unsafe {
            *self.slots[slot].context.get() = context;
            *self.slots[slot].resources.get() = Some(Resources {
                stack,
                space: None,
                trap_frame: None,
                handles: None,
            });
        }
        Ok(slot)
    }

    fn free_resources(&self, resources: Resources<P>, size: usize) {
        if let Some(handles) = resources.handles {
            self.platform.release_handles(handles);
        }
        if let Some(space) = resources.space {
            self.platform.destroy_address_space(space, size);
        }
        self.platform.free_stack(resources.stack);
    }

    /// Undo a partially built Embryo and return its slot to Unused
    fn release_embryo(&self, slot: SlotId, size: usize) {
        // SAFETY: the slot is an Embryo owned by this thread
        let resources = unsafe { (*self.slots[slot].resources.get()).take() };
        if let Some(resources) = resources {
            self.free_resources(resources, size);
        }
        self.lock_table().discard(slot);
    }

    /// Create the root process
    pub fn user_init(&self, name: &str) -> Result<Pid> {
        if self.lock_table().root().is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let slot = self.allocate()?;
        let Some((space, size)) = self.platform.create_address_space() else {
            warn!("user_init: no address space for {}", name);
            self.release_embryo(slot, 0);
            return Err(Error::OutOfMemory);
        };
        let trap_frame = self.platform.initial_trap_frame();
        let handles = self.platform.root_handles();
        // SAFETY: the slot is an Embryo owned by this thread
        if let Some(resources) = unsafe { (*self.slots[slot].resources.get()).as_mut() } {
            resources.space = Some(space);
            resources.trap_frame = Some(trap_frame);
            resources.handles = Some(handles);
        }

        let mut table = self.lock_table();
        if let Err(err) = table.make_root(slot, name, size, self.now()) {
            drop(table);
            self.release_embryo(slot, size);
            return Err(err);
        }
        table.make_runnable(slot);
        Ok(table.proc(slot).pid())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Duplicate the calling process. The child resumes from the same call
    /// site with a zero return value; the parent receives the child's pid.
    pub fn fork(&self) -> Result<Pid> {
        let parent = self.require_current()?;
        let child = self.allocate()?;
        let size = self.lock_table().proc(parent).size();

        // SAFETY: `parent` is the process running on this CPU
        let Some(parent_res) = (unsafe { (*self.slots[parent].resources.get()).as_ref() }) else {
            self.lock_table()
                .invariant_failure(format_args!("fork: running slot {} has no resources", parent));
        };
        let space = match &parent_res.space {
            Some(space) => match self.platform.copy_address_space(space, size) {
                Some(copy) => Some(copy),
                None => {
                    warn!("fork: address space copy failed");
                    self.release_embryo(child, 0);
                    return Err(Error::OutOfMemory);
                }
            },
            None => None,
        };
        let trap_frame = parent_res.trap_frame.as_ref().map(|tf| self.platform.fork_trap_frame(tf));
        let handles = parent_res.handles.as_ref().map(|h| self.platform.duplicate_handles(h));

        // SAFETY: the child is an Embryo owned by this thread
        if let Some(resources) = unsafe { (*self.slots[child].resources.get()).as_mut() } {
            resources.space = space;
            resources.trap_frame = trap_frame;
            resources.handles = handles;
        }

        let mut table = self.lock_table();
        table.inherit_from(child, parent);
        let pid = table.proc(child).pid();
        table.make_runnable(child);
        debug!("fork: pid {} created pid {}", table.proc(parent).pid(), pid);
        Ok(pid)
    }

    /// Terminate the calling process. Never returns.
    pub fn exit(&self) -> ! {
        let Some(slot) = self.current_slot() else {
            panic!("exit: no current process");
        };
        if self.lock_table().root() == Some(slot) {
            error!("root process attempted to exit");
            panic!("init exiting");
        }

        // SAFETY: `slot` is the process running on this CPU
        let handles = unsafe { (*self.slots[slot].resources.get()).as_mut() }
            .and_then(|resources| resources.handles.take());
        if let Some(handles) = handles {
            self.platform.release_handles(handles);
        }

        let mut table = self.lock_table();
        let now = self.now();
        table.exit(slot, now);
        let _table = self.sched(table);
        panic!("zombie slot {} resumed", slot);
    }

    /// Wait for a child to exit and reap it, returning its pid. Fails with
    /// `NoChildren` when there is nothing to wait for or the caller is killed.
    pub fn wait(&self) -> Result<Pid> {
        let slot = self.require_current()?;
        let mut table = self.lock_table();
        loop {
            let scan = table.reap_child(slot, |child, size| {
                // SAFETY: `child` is a Zombie that will never run again and
                // the table lock is held
                let resources = unsafe { (*self.slots[child].resources.get()).take() };
                if let Some(resources) = resources {
                    self.free_resources(resources, size);
                }
            });
            match scan {
                WaitScan::Reaped(pid) => return Ok(pid),
                WaitScan::NoChildren => return Err(Error::NoChildren),
                WaitScan::Pending => {
                    if table.proc(slot).killed() {
                        return Err(Error::NoChildren);
                    }
                    table = self.sleep_locked(slot, Channel::Process(slot), table);
                }
            }
        }
    }

    /// Request termination of `pid`; a sleeping target is woken
    pub fn kill(&self, pid: Pid) -> Result<()> {
        self.lock_table().kill(pid)
    }

    /// Whether the calling process has been killed
    pub fn killed(&self) -> bool {
        match self.current_slot() {
            Some(slot) => self.lock_table().proc(slot).killed(),
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Sleep and wakeup
    // ------------------------------------------------------------------------

    /// Sleep on `chan`, atomically releasing `guard`. The lock is reacquired
    /// before returning.
    pub fn sleep<'a, T>(
        &self,
        chan: Channel,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        let Some(slot) = self.current_slot() else {
            panic!("sleep: no current process");
        };
        // Holding the table lock before releasing `guard` closes the window
        // in which a waker could miss us
        let table = self.lock_table();
        drop(guard);
        let table = self.sleep_locked(slot, chan, table);
        drop(table);
        lock.lock()
    }

    /// Sleep on `chan` without an external lock. The caller must tolerate a
    /// wakeup that lands before the sleep and re-check its condition on return.
    pub fn sleep_on(&self, chan: Channel) {
        let Some(slot) = self.current_slot() else {
            panic!("sleep: no current process");
        };
        let table = self.lock_table();
        drop(self.sleep_locked(slot, chan, table));
    }

    fn sleep_locked<'a>(
        &'a self,
        slot: SlotId,
        chan: Channel,
        mut table: TableGuard<'a, P>,
    ) -> TableGuard<'a, P> {
        let now = self.now();
        table.block(slot, chan, now);
        self.sched(table)
    }

    /// Wake every process sleeping on `chan`
    pub fn wakeup(&self, chan: Channel) -> usize {
        self.lock_table().wakeup(chan)
    }

    /// Sleep for `ticks` timer ticks. Fails with `Killed` if the caller is
    /// killed while waiting.
    pub fn sleep_ticks(&self, ticks: Tick) -> Result<()> {
        let slot = self.require_current()?;
        let mut table = self.lock_table();
        let start = self.now();
        while self.now().saturating_sub(start) < ticks {
            if table.proc(slot).killed() {
                return Err(Error::Killed);
            }
            table = self.sleep_locked(slot, Channel::Ticks, table);
        }
        Ok(())
    }

    /// Timer hook: called after the tick counter advances. The trap layer
    /// follows it with [`Kernel::yield_now`] on the interrupted CPU.
    pub fn on_tick(&self) {
        self.wakeup(Channel::Ticks);
    }

    pub fn uptime(&self) -> Tick {
        self.now()
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Give up the CPU for one scheduling round
    pub fn yield_now(&self) {
        let Some(slot) = self.current_slot() else {
            return;
        };
        let mut table = self.lock_table();
        let now = self.now();
        table.preempt(slot, now);
        drop(self.sched(table));
    }

    /// Switch from the current process to this CPU's scheduler. The caller
    /// holds the table lock and has already moved the process off Running.
    fn sched<'a>(&'a self, table: TableGuard<'a, P>) -> TableGuard<'a, P> {
        let cpu = self.cpu();
        let Some(slot) = cpu.current() else {
            table.invariant_failure(format_args!("sched: no current process"));
        };
        let depth = cpu.noff.load(core::sync::atomic::Ordering::Relaxed);
        if depth != 1 {
            table.invariant_failure(format_args!("sched: lock depth {} at hand-off", depth));
        }
        if table.proc(slot).state() == ProcState::Running {
            table.invariant_failure(format_args!("sched: slot {} still running", slot));
        }
        if self.platform.interrupts_enabled() {
            table.invariant_failure(format_args!("sched: interruptible"));
        }

        let intena = cpu.intena.load(core::sync::atomic::Ordering::Relaxed);
        // SAFETY: both contexts belong to this CPU's current hand-off; the
        // slot's context is written only here and by `allocate`
        unsafe {
            self.platform.switch_context(self.slots[slot].context.get(), cpu.scheduler.get());
        }
        // May resume on another CPU
        self.cpu().intena.store(intena, core::sync::atomic::Ordering::Relaxed);
        table
    }

    /// One scheduler decision: run a promotion sweep if due, then run the
    /// highest-priority ready process until it gives the CPU back. Returns
    /// `false` if nothing was ready.
    pub fn schedule_once(&self) -> bool {
        // Let pending device interrupts in between decisions
        self.platform.enable_interrupts();

        let mut table = self.lock_table();
        let now = self.now();
        table.promote_if_due(now);
        let Some(slot) = table.dispatch(now) else {
            return false;
        };

        let cpu = self.cpu();
        cpu.set_current(Some(slot));
        // SAFETY: the slot was just dispatched on this CPU and has not run yet
        let space = unsafe { (*self.slots[slot].resources.get()).as_ref() }
            .and_then(|resources| resources.space.as_ref());
        self.platform.switch_address_space(space);
        // SAFETY: the scheduler context belongs to this CPU; the slot's
        // context was saved by its last `sched` or built by `allocate`
        unsafe {
            self.platform.switch_context(cpu.scheduler.get(), self.slots[slot].context.get());
        }
        self.platform.switch_address_space(None);
        cpu.set_current(None);
        drop(table);
        true
    }

    /// Per-CPU scheduler loop
    pub fn scheduler(&self) -> ! {
        info!("cpu {} entering scheduler", self.platform.cpu_id());
        loop {
            if !self.schedule_once() {
                self.platform.wait_for_interrupt();
            }
        }
    }

    /// Release the table lock inherited from the scheduler on first dispatch.
    ///
    /// # Safety
    ///
    /// Must be called exactly once by a newly created context, before it
    /// does anything else, on its first dispatch.
    pub unsafe fn fork_return(&self) {
        // SAFETY: the dispatching scheduler holds the lock on our behalf
        unsafe { self.table.force_unlock() };
        self.pop_off();
    }

    /// Set the priority of `pid`
    pub fn set_priority(&self, pid: Pid, priority: Priority) -> Result<()> {
        self.lock_table().set_priority(pid, priority)
    }

    /// Priority of `pid`
    pub fn get_priority(&self, pid: Pid) -> Result<Priority> {
        self.lock_table().priority_of(pid)
    }

    // ------------------------------------------------------------------------
    // Identity and memory
    // ------------------------------------------------------------------------

    /// Pid of the calling process
    pub fn pid(&self) -> Result<Pid> {
        let slot = self.require_current()?;
        Ok(self.lock_table().proc(slot).pid())
    }

    /// Pid of the calling process's parent; the root reports itself
    pub fn parent_pid(&self) -> Result<Pid> {
        let slot = self.require_current()?;
        Ok(self.lock_table().parent_pid(slot))
    }

    pub fn uid(&self) -> Result<Uid> {
        let slot = self.require_current()?;
        Ok(self.lock_table().proc(slot).uid())
    }

    pub fn gid(&self) -> Result<Gid> {
        let slot = self.require_current()?;
        Ok(self.lock_table().proc(slot).gid())
    }

    pub fn set_uid(&self, uid: Uid) -> Result<()> {
        let slot = self.require_current()?;
        self.lock_table().set_uid(slot, uid)
    }

    pub fn set_gid(&self, gid: Gid) -> Result<()> {
        let slot = self.require_current()?;
        self.lock_table().set_gid(slot, gid)
    }

    /// Grow or shrink the calling process's memory by `delta` bytes,
    /// returning the previous size
    pub fn grow(&self, delta: isize) -> Result<usize> {
        let slot = self.require_current()?;
        let old = self.lock_table().proc(slot).size();
        // SAFETY: `slot` is the process running on this CPU
        let resources = unsafe { (*self.slots[slot].resources.get()).as_mut() };
        let Some(space) = resources.and_then(|resources| resources.space.as_mut()) else {
            return Err(Error::OutOfMemory);
        };
        let new = self
            .platform
            .resize_address_space(space, old, delta)
            .ok_or(Error::OutOfMemory)?;
        self.lock_table().set_size(slot, new);
        self.platform.switch_address_space(Some(&*space));
        Ok(old)
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    /// Up to `max` listing rows
    pub fn snapshot(&self, max: usize) -> heapless::Vec<ProcInfo, NPROC> {
        let now = self.now();
        self.lock_table().snapshot(now, max)
    }

    pub fn ready_dump(&self) -> ReadyListDump {
        self.lock_table().ready_dump()
    }

    pub fn free_count(&self) -> usize {
        self.lock_table().free_count()
    }

    pub fn sleeping_pids(&self) -> heapless::Vec<Pid, NPROC> {
        self.lock_table().sleeping_pids()
    }

    pub fn zombie_dump(&self) -> heapless::Vec<ZombieEntry, NPROC> {
        self.lock_table().zombie_dump()
    }

    pub fn stats(&self) -> SchedStats {
        self.lock_table().stats()
    }

    pub fn check_invariants(&self) -> core::result::Result<(), InvariantViolation> {
        self.lock_table().check_invariants()
    }
}
