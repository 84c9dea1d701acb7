//! Memory management for user programs.
//!
//! Provides:
//! - Physical frame allocation (contiguous bump allocator)
//! - Linear page tables
//! - Virtual to physical translation with fault discrimination

pub mod frame_allocator;
pub mod page_table;
pub mod translate;

use alloc::sync::Arc;
use lazy_static::lazy_static;

use crate::config::MachineConfig;
pub use frame_allocator::{FrameAllocator, FrameError};
pub use page_table::{EntryFlags, PageTable, TranslationEntry};
pub use translate::{translate, Exception};

lazy_static! {
    /// Frames committed since kernel start, for the default machine.
    static ref KERNEL_FRAMES: Arc<FrameAllocator> =
        Arc::new(FrameAllocator::for_machine(&MachineConfig::default()));
}

/// Shared handle to the kernel-wide frame allocator.
///
/// Tests and embedders with their own geometry should build a
/// [`FrameAllocator`] instead.
pub fn kernel_frames() -> Arc<FrameAllocator> {
    Arc::clone(&KERNEL_FRAMES)
}
