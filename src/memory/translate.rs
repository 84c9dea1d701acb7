//! Virtual to physical address translation.
//!
//! Runs on every user memory reference. Faults are returned to the caller
//! (the exception dispatcher) and never bring the kernel down.

use crate::config::MachineConfig;
use super::page_table::{EntryFlags, PageTable};

/// Width of the accesses being translated.
const WORD_SIZE: usize = 4;

/// Translation fault, in the order the checks are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// Misaligned address, or virtual page past the end of the table.
    AddressError,
    /// Entry is not valid. Nothing backs it, so this is terminal.
    PageFault,
    /// Entry points at a frame the machine does not have.
    BusError,
}

impl core::fmt::Display for Exception {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Exception::AddressError => write!(f, "address error"),
            Exception::PageFault => write!(f, "page fault"),
            Exception::BusError => write!(f, "bus error"),
        }
    }
}

/// Translate `virt_addr` through `table`.
///
/// On success the entry's use bit is set and the physical byte address is
/// returned. That bit is the only state this touches.
///
/// `config` must pass [`MachineConfig::validate`]; [`Machine`](crate::machine::Machine)
/// only ever holds one that does.
pub fn translate(
    virt_addr: u32,
    table: &mut PageTable,
    config: &MachineConfig,
) -> Result<usize, Exception> {
    debug_assert!(config.validate().is_ok(), "unvalidated machine geometry");
    if virt_addr as usize & (WORD_SIZE - 1) != 0 {
        log::debug!(target: "translate", "alignment problem at {:#x}", virt_addr);
        return Err(Exception::AddressError);
    }

    let vpn = virt_addr as usize / config.page_size;
    let offset = virt_addr as usize % config.page_size;
    let table_size = table.len();

    let entry = match table.get_mut(vpn) {
        Some(entry) => entry,
        None => {
            log::debug!(
                target: "translate",
                "virtual page {} too large for page table size {}",
                vpn, table_size
            );
            return Err(Exception::AddressError);
        }
    };
    if !entry.is_valid() {
        log::debug!(target: "translate", "virtual page {} is not valid", vpn);
        return Err(Exception::PageFault);
    }

    let frame = entry.physical_page;
    if frame >= config.num_phys_pages {
        log::debug!(
            target: "translate",
            "frame {} >= {} for virtual page {}",
            frame, config.num_phys_pages, vpn
        );
        return Err(Exception::BusError);
    }

    entry.flags.insert(EntryFlags::USE);
    let phys_addr = frame * config.page_size + offset;
    assert!(
        phys_addr + WORD_SIZE <= config.memory_size(),
        "translated address {:#x} outside physical memory",
        phys_addr
    );
    log::trace!(target: "translate", "{:#x} -> phys {:#x}", virt_addr, phys_addr);
    Ok(phys_addr)
}
