//! Process table and lifecycle
//!
//! - `lists`: per-state membership lists
//! - `proc`: the per-slot process record
//! - `table`: allocation, transitions and consistency checks
//! - `lifecycle`: exit, reaping and kill
//! - `report`: listings and list dumps

pub mod lifecycle;
pub mod lists;
pub mod proc;
pub mod report;
pub mod table;

pub use lifecycle::WaitScan;
pub use lists::{ListId, SlotId, StateLists};
pub use proc::Proc;
pub use table::{InvariantViolation, ProcTable};
