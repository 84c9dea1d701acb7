//! Physical frame allocator.
//!
//! This is a bump allocator: every reservation is a contiguous run that
//! starts where the previous one ended, and frames are never freed. There is
//! no paging to secondary storage, so running out of frames is fatal for the
//! construction that asked for them.

use spin::Mutex;

use crate::config::MachineConfig;

/// Counter of frames committed to address spaces since kernel start.
pub struct FrameAllocator {
    committed: Mutex<usize>,
    total: usize,
}

/// Frame reservation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Request would push the counter past the machine's frame count.
    Exhausted {
        requested: usize,
        committed: usize,
        total: usize,
    },
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            FrameError::Exhausted { requested, committed, total } => write!(
                f,
                "out of physical frames ({} requested, {}/{} committed)",
                requested, committed, total
            ),
        }
    }
}

impl FrameAllocator {
    /// Create an allocator over `total` frames, none committed.
    pub const fn new(total: usize) -> Self {
        FrameAllocator {
            committed: Mutex::new(0),
            total,
        }
    }

    /// Create an allocator sized for the given machine.
    pub fn for_machine(config: &MachineConfig) -> Self {
        Self::new(config.num_phys_pages)
    }

    /// Reserve `n` contiguous frames and return the first one.
    ///
    /// The counter is left untouched when the request does not fit.
    pub fn reserve(&self, n: usize) -> Result<usize, FrameError> {
        self.reserve_within(n, self.total)
    }

    /// Like [`reserve`](Self::reserve), but never past frame `limit`.
    ///
    /// Used when the machine backing the frames is smaller than the
    /// allocator.
    pub fn reserve_within(&self, n: usize, limit: usize) -> Result<usize, FrameError> {
        let total = self.total.min(limit);
        let mut committed = self.committed.lock();
        let base = *committed;
        let end = base
            .checked_add(n)
            .filter(|&end| end <= total)
            .ok_or_else(|| {
                log::error!(
                    target: "frames",
                    "cannot reserve {} frames: {}/{} already committed",
                    n, base, total
                );
                FrameError::Exhausted {
                    requested: n,
                    committed: base,
                    total,
                }
            })?;
        *committed = end;
        log::debug!(target: "frames", "reserved frames {}..{} ({} committed)", base, end, end);
        Ok(base)
    }

    /// Frames committed so far.
    pub fn committed(&self) -> usize {
        *self.committed.lock()
    }

    /// Frames still available.
    pub fn remaining(&self) -> usize {
        self.total - self.committed()
    }

    /// Frames on the machine.
    pub fn total(&self) -> usize {
        self.total
    }
}
