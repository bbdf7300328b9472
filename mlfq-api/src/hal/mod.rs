//! Collaborator contracts
//!
//! The process subsystem never touches page tables, stacks, registers or file
//! handles directly. Everything it needs from the rest of the kernel is
//! described by the traits in this module, and a kernel plugs in one type
//! implementing all of them as its [`Platform`].

use crate::core::types::Tick;

/// Trait for the address-space manager
pub trait AddressSpaceManager {
    /// Opaque handle to a user address space
    type AddressSpace: Send;

    /// Creates the address space of the root process, returning it with its
    /// initial image size in bytes
    fn create_address_space(&self) -> Option<(Self::AddressSpace, usize)>;

    /// Deep-copies `size` bytes of `src` into a new address space
    fn copy_address_space(&self, src: &Self::AddressSpace, size: usize) -> Option<Self::AddressSpace>;

    /// Grows or shrinks `space` from `old_size` by `delta` bytes, returning
    /// the new size
    fn resize_address_space(
        &self,
        space: &mut Self::AddressSpace,
        old_size: usize,
        delta: isize,
    ) -> Option<usize>;

    /// Releases an address space and everything mapped in it
    fn destroy_address_space(&self, space: Self::AddressSpace, size: usize);

    /// Activates `space` on the calling CPU, or the kernel-only mappings
    /// when `None`
    fn switch_address_space(&self, space: Option<&Self::AddressSpace>);
}

/// Trait for the kernel stack allocator
pub trait StackAllocator {
    /// Opaque kernel stack handle
    type Stack: Send;

    /// Allocates a kernel stack
    fn allocate_stack(&self) -> Option<Self::Stack>;

    /// Returns a kernel stack to the allocator
    fn free_stack(&self, stack: Self::Stack);
}

/// Trait for the hardware and interrupt layer
pub trait Hardware {
    /// Saved callee registers of a suspended execution context
    type Context: Default + Send;

    /// User register state saved on trap entry
    type TrapFrame: Send;

    /// Index of the calling CPU, below `NCPU`
    fn cpu_id(&self) -> usize;

    /// Whether interrupts are enabled on the calling CPU
    fn interrupts_enabled(&self) -> bool;

    fn enable_interrupts(&self);

    fn disable_interrupts(&self);

    /// Halts the calling CPU until the next interrupt arrives
    fn wait_for_interrupt(&self);

    /// Current value of the external tick counter
    fn current_tick(&self) -> Tick;

    /// Saves the running context into `from` and resumes `to`.
    ///
    /// Returns only when another context later switches back to `from`.
    ///
    /// # Safety
    ///
    /// Both pointers must be valid for the duration of the switch and `to`
    /// must hold a context produced by `init_context` or saved by an earlier
    /// switch.
    unsafe fn switch_context(&self, from: *mut Self::Context, to: *const Self::Context);

    /// Trap frame for the first user entry of the root process
    fn initial_trap_frame(&self) -> Self::TrapFrame;

    /// Copy of `parent` adjusted so the child observes a zero return value
    fn fork_trap_frame(&self, parent: &Self::TrapFrame) -> Self::TrapFrame;
}

/// Trait for the owner of per-process handles (open files, working directory)
pub trait ResourceOwner {
    /// Opaque bundle of handles held by one process
    type Handles: Send;

    /// Handles given to the root process
    fn root_handles(&self) -> Self::Handles;

    /// Duplicates a parent's handles for a forked child
    fn duplicate_handles(&self, handles: &Self::Handles) -> Self::Handles;

    /// Closes every handle in the bundle
    fn release_handles(&self, handles: Self::Handles);
}

/// Everything the process subsystem consumes from the rest of the kernel
pub trait Platform: AddressSpaceManager + StackAllocator + Hardware + ResourceOwner + Sync {
    /// Builds a context that, when first switched to, runs on `stack` and
    /// enters the new-process trampoline
    fn init_context(&self, stack: &Self::Stack) -> Self::Context;
}
