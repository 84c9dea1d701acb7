//! User processes.
//!
//! A process owns one address space and, while it is not running, a copy of
//! its user registers. The scheduler moves registers and the translation
//! context in and out of the machine on every switch.

pub mod scheduler;

use core::sync::atomic::{AtomicU64, Ordering};

use crate::machine::Registers;
use crate::userprog::AddressSpace;

/// Unique process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(u64);

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

impl Pid {
    fn new() -> Self {
        Pid(NEXT_PID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "Pid#{}", self.0)
    }
}

/// Process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
}

/// A schedulable user process.
pub struct Process {
    pub pid: Pid,
    pub name: &'static str,
    pub state: ProcessState,
    pub space: AddressSpace,
    /// Saved user registers; `None` until the process first runs.
    pub user_registers: Option<Registers>,
}

impl Process {
    /// Wrap an address space that has not run yet.
    pub fn new(name: &'static str, space: AddressSpace) -> Self {
        Process {
            pid: Pid::new(),
            name,
            state: ProcessState::Ready,
            space,
            user_registers: None,
        }
    }
}
