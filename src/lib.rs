//! nachvm - address spaces for a teaching kernel simulator
//!
//! The part of the kernel that handles:
//! - Loading NOFF executables into per-process page tables
//! - Physical frame assignment (contiguous, never reclaimed)
//! - Duplicating an address space for fork
//! - Virtual to physical translation on every memory reference
//!
//! Diagnostics go through the `log` facade; the embedding simulator decides
//! where they end up.

#![no_std]

extern crate alloc;

pub mod config;
pub mod machine;
pub mod memory;
pub mod noff;
pub mod process;
pub mod userprog;

pub use config::MachineConfig;
pub use machine::Machine;
pub use memory::{translate, Exception, FrameAllocator, PageTable, TranslationEntry};
pub use noff::{NoffHeader, OpenFile};
pub use userprog::{AddressSpace, FatalError};
