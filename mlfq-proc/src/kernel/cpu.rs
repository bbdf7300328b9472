//! Per-CPU state and interrupt nesting

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use mlfq_api::Platform;

use super::Kernel;
use crate::process::lists::SlotId;

const NO_SLOT: usize = usize::MAX;

/// State owned by one CPU. Only that CPU touches it, with interrupts off.
pub(crate) struct Cpu<C> {
    /// Slot running on this CPU
    current: AtomicUsize,
    /// Saved context of this CPU's scheduler loop
    pub(crate) scheduler: UnsafeCell<C>,
    /// Depth of `push_off` nesting
    pub(crate) noff: AtomicUsize,
    /// Whether interrupts were enabled before the outermost `push_off`
    pub(crate) intena: AtomicBool,
}

impl<C: Default> Cpu<C> {
    pub(crate) fn new() -> Self {
        Self {
            current: AtomicUsize::new(NO_SLOT),
            scheduler: UnsafeCell::new(C::default()),
            noff: AtomicUsize::new(0),
            intena: AtomicBool::new(false),
        }
    }
}

impl<C> Cpu<C> {
    pub(crate) fn current(&self) -> Option<SlotId> {
        match self.current.load(Ordering::Relaxed) {
            NO_SLOT => None,
            slot => Some(slot),
        }
    }

    pub(crate) fn set_current(&self, slot: Option<SlotId>) {
        self.current.store(slot.unwrap_or(NO_SLOT), Ordering::Relaxed);
    }
}

impl<P: Platform> Kernel<P> {
    /// The calling CPU's state. Interrupts must be off so the caller cannot
    /// migrate between reading the id and using the result.
    pub(crate) fn cpu(&self) -> &Cpu<P::Context> {
        &self.cpus[self.platform.cpu_id()]
    }

    /// Disable interrupts, remembering whether they were on at the outermost level
    pub(crate) fn push_off(&self) {
        let enabled = self.platform.interrupts_enabled();
        self.platform.disable_interrupts();
        let cpu = self.cpu();
        if cpu.noff.load(Ordering::Relaxed) == 0 {
            cpu.intena.store(enabled, Ordering::Relaxed);
        }
        cpu.noff.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo one `push_off`, re-enabling interrupts when the outermost level
    /// had them on
    pub(crate) fn pop_off(&self) {
        if self.platform.interrupts_enabled() {
            panic!("pop_off: interruptible");
        }
        let cpu = self.cpu();
        let depth = cpu.noff.load(Ordering::Relaxed);
        if depth == 0 {
            panic!("pop_off: unbalanced");
        }
        cpu.noff.store(depth - 1, Ordering::Relaxed);
        if depth == 1 && cpu.intena.load(Ordering::Relaxed) {
            self.platform.enable_interrupts();
        }
    }

    /// Slot running on the calling CPU
    pub(crate) fn current_slot(&self) -> Option<SlotId> {
        self.push_off();
        let slot = self.cpu().current();
        self.pop_off();
        slot
    }
}
