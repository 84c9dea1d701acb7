//! Linear page tables.
//!
//! One [`TranslationEntry`] per virtual page, indexed by virtual page number.
//! A table belongs to exactly one address space.

use alloc::vec::Vec;

bitflags::bitflags! {
    /// State bits carried by a translation entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u8 {
        /// Mapping may be used.
        const VALID     = 0b0000_0001;
        /// Page referenced since last check.
        const USE       = 0b0000_0010;
        /// Page written since last check.
        const DIRTY     = 0b0000_0100;
        /// Writes are not allowed.
        const READ_ONLY = 0b0000_1000;
    }
}

/// Mapping from one virtual page to one physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub flags: EntryFlags,
}

impl TranslationEntry {
    /// A valid, unreferenced, writable mapping.
    pub fn new(virtual_page: usize, physical_page: usize) -> Self {
        TranslationEntry {
            virtual_page,
            physical_page,
            flags: EntryFlags::VALID,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    pub fn is_used(&self) -> bool {
        self.flags.contains(EntryFlags::USE)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EntryFlags::READ_ONLY)
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.flags.set(EntryFlags::VALID, valid);
    }

    pub fn set_used(&mut self, used: bool) {
        self.flags.set(EntryFlags::USE, used);
    }
}

/// Per-address-space page table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    /// Map `num_pages` virtual pages onto frames `base_frame..base_frame + num_pages`.
    pub fn contiguous(num_pages: usize, base_frame: usize) -> Self {
        let entries = (0..num_pages)
            .map(|vpn| TranslationEntry::new(vpn, base_frame + vpn))
            .collect();
        PageTable { entries }
    }

    /// Number of virtual pages covered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, vpn: usize) -> Option<&TranslationEntry> {
        self.entries.get(vpn)
    }

    pub fn get_mut(&mut self, vpn: usize) -> Option<&mut TranslationEntry> {
        self.entries.get_mut(vpn)
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Frame backing virtual page 0, if any.
    pub fn first_frame(&self) -> Option<usize> {
        self.entries.first().map(|e| e.physical_page)
    }
}
