//! User program support: address spaces and their construction errors.
//!
//! Construction failures are fatal. The kernel has no overcommit, no
//! eviction and no rollback, so a caller that gets a [`FatalError`] is
//! expected to halt rather than retry.

pub mod addrspace;

pub use addrspace::AddressSpace;

use crate::memory::FrameError;
use crate::noff::NoffError;

/// Unrecoverable address-space construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalError {
    /// Executable is malformed or could not be read.
    Image(NoffError),
    /// Program needs more pages than the machine has frames.
    ProgramTooLarge { pages: u64, max: usize },
    /// Not enough uncommitted frames left.
    Frames(FrameError),
    /// Parent range handed to fork lies outside physical memory.
    BadParent { start: usize, pages: usize },
}

impl core::fmt::Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FatalError::Image(e) => write!(f, "bad executable: {}", e),
            FatalError::ProgramTooLarge { pages, max } => {
                write!(f, "program needs {} pages, machine has {}", pages, max)
            }
            FatalError::Frames(e) => write!(f, "{}", e),
            FatalError::BadParent { start, pages } => {
                write!(f, "parent frames {}..{} outside physical memory", start, start + pages)
            }
        }
    }
}

impl From<NoffError> for FatalError {
    fn from(e: NoffError) -> Self { FatalError::Image(e) }
}
impl From<FrameError> for FatalError {
    fn from(e: FrameError) -> Self { FatalError::Frames(e) }
}
