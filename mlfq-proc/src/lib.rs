//! Process table, lifecycle and multi-level feedback queue scheduler
//!
//! This crate is the process core of the kernel: a fixed process table
//! partitioned into per-state lists, fork/exit/wait/kill, sleep/wakeup on
//! channels, a priority scheduler with budget demotion and periodic
//! promotion, and the per-CPU dispatch loop.
//!
//! # Architecture
//!
//! - **Process**: [`ProcTable`] and its state lists. Pure bookkeeping, driven
//!   with explicit tick values, no locking of its own.
//! - **Sched**: dispatch, settlement, priority changes and the promotion sweep
//! - **Sync**: channel sleep and wakeup
//! - **Kernel**: [`Kernel`], which puts the table behind the global lock and
//!   drives context switches through the collaborator traits of
//!   [`mlfq_api::hal`]
//!
//! # Usage
//!
//! ```rust
//! use mlfq_api::{Channel, SchedConfig};
//! use mlfq_proc::ProcTable;
//!
//! let mut table = ProcTable::new(SchedConfig::default());
//! let slot = table.allocate(0).unwrap();
//! table.make_runnable(slot);
//!
//! assert_eq!(table.dispatch(10), Some(slot));
//! table.block(slot, Channel::Ticks, 15);
//! assert_eq!(table.wakeup(Channel::Ticks), 1);
//! assert!(table.check_invariants().is_ok());
//! ```

#![no_std]

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod kernel;
pub mod process;
pub mod sched;
pub mod sync;

pub use kernel::Kernel;
pub use process::{InvariantViolation, ListId, Proc, ProcTable, SlotId, StateLists, WaitScan};
pub use sched::SchedStats;
