//! Process scheduling API - core types and interfaces
//!
//! This crate provides the types shared between the process subsystem and the
//! rest of the kernel. It has no knowledge of how processes are stored or
//! scheduled; it only describes them.
//!
//! # Architecture
//!
//! - **Core**: Scalar identifiers, process states and sleep channels
//! - **Error**: Error type, classification and `Result` alias
//! - **Config**: Compile-time limits and runtime scheduler tuning
//! - **Hal**: Contracts the process subsystem consumes from memory
//!   management, stack allocation, the hardware layer and resource owners
//! - **Process**: Records handed out to listing and reporting tools
//!
//! # Usage
//!
//! ```rust
//! use mlfq_api::config::SchedConfig;
//! use mlfq_api::error::Result;
//!
//! fn tuned() -> Result<SchedConfig> {
//!     SchedConfig::default().with_max_priority(3).with_default_priority(3).validate()
//! }
//!
//! assert!(tuned().is_ok());
//! ```

#![no_std]

#[cfg(any(feature = "std", test))]
extern crate std;

// Core modules
pub mod core;
pub mod error;
pub mod config;
pub mod hal;
pub mod process;
pub mod fmt_utils;

// Re-export commonly used types
pub use crate::core::types::*;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::config::SchedConfig;
pub use crate::hal::Platform;
pub use crate::process::{ProcInfo, ReadyEntry, ReadyListDump, ZombieEntry};
