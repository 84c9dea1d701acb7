//! Machine geometry.
//!
//! The simulated MIPS machine has a fixed page size and a fixed number of
//! physical frames. Everything that sizes or translates an address space
//! reads them from a [`MachineConfig`].

/// Bytes per page (equal to the disk sector size).
pub const PAGE_SIZE: usize = 128;

/// Physical frames on the machine.
pub const NUM_PHYS_PAGES: usize = 32;

/// Bytes reserved at the top of every address space for the user stack.
pub const USER_STACK_SIZE: usize = 1024;

/// Geometry of the simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub page_size: usize,
    pub num_phys_pages: usize,
    pub user_stack_size: usize,
}

impl MachineConfig {
    /// Default geometry: 32 frames of 128 bytes, 1 KiB stack.
    pub const fn new() -> Self {
        MachineConfig {
            page_size: PAGE_SIZE,
            num_phys_pages: NUM_PHYS_PAGES,
            user_stack_size: USER_STACK_SIZE,
        }
    }

    /// Builder: set the page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder: set the number of physical frames.
    pub fn with_phys_pages(mut self, num_phys_pages: usize) -> Self {
        self.num_phys_pages = num_phys_pages;
        self
    }

    /// Builder: set the stack reservation.
    pub fn with_stack_size(mut self, user_stack_size: usize) -> Self {
        self.user_stack_size = user_stack_size;
        self
    }

    /// Total bytes of physical memory.
    pub fn memory_size(&self) -> usize {
        self.page_size * self.num_phys_pages
    }

    /// Pages needed to hold `bytes`, rounded up.
    pub fn pages_for(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.page_size as u64)
    }

    /// Check the geometry is usable for word-addressed translation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if self.page_size % 4 != 0 {
            return Err(ConfigError::UnalignedPageSize(self.page_size));
        }
        Ok(())
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejected machine geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    ZeroPageSize,
    /// Page size must hold a whole number of 32-bit words.
    UnalignedPageSize(usize),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ConfigError::ZeroPageSize => write!(f, "page size is zero"),
            ConfigError::UnalignedPageSize(size) => {
                write!(f, "page size {} is not a multiple of 4", size)
            }
        }
    }
}
