//! The simulated machine, as seen from the address-space code.
//!
//! Owns physical memory, the user register file and the slot holding the
//! page table the processor currently translates through.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::config::{ConfigError, MachineConfig};
use crate::memory::{translate, Exception, PageTable};

/// Page table shared between its address space and the translation slot.
pub type SharedPageTable = Arc<Mutex<PageTable>>;

// MIPS register file layout.
pub const STACK_REG: usize = 29;
pub const RET_ADDR_REG: usize = 31;
pub const NUM_GP_REGS: usize = 32;
pub const HI_REG: usize = 32;
pub const LO_REG: usize = 33;
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;
pub const PREV_PC_REG: usize = 36;
pub const LOAD_REG: usize = 37;
pub const LOAD_VALUE_REG: usize = 38;
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;

/// Full user-visible register file.
pub type Registers = [i32; NUM_TOTAL_REGS];

/// Page table and size the processor is translating through.
#[derive(Clone)]
pub struct TranslationContext {
    pub page_table: SharedPageTable,
    pub num_pages: usize,
}

/// Simulated processor state.
pub struct Machine {
    config: MachineConfig,
    main_memory: Vec<u8>,
    registers: Registers,
    context: Mutex<Option<TranslationContext>>,
}

impl Machine {
    /// Create a machine with zeroed memory and registers.
    pub fn new(config: MachineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Machine {
            config,
            main_memory: vec![0; config.memory_size()],
            registers: [0; NUM_TOTAL_REGS],
            context: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn read_register(&self, reg: usize) -> i32 {
        self.registers[reg]
    }

    pub fn write_register(&mut self, reg: usize, value: i32) {
        self.registers[reg] = value;
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn main_memory(&self) -> &[u8] {
        &self.main_memory
    }

    pub fn main_memory_mut(&mut self) -> &mut [u8] {
        &mut self.main_memory
    }

    /// Install the page table used for every following translation.
    pub fn install(&self, page_table: SharedPageTable, num_pages: usize) {
        *self.context.lock() = Some(TranslationContext { page_table, num_pages });
    }

    /// Clear the translation slot; later translations see an empty mapping.
    pub fn uninstall(&self) {
        *self.context.lock() = None;
    }

    /// Currently installed context, if any.
    pub fn context(&self) -> Option<TranslationContext> {
        self.context.lock().clone()
    }

    /// Translate through the installed page table.
    ///
    /// With nothing installed every address is outside the (empty) mapping.
    pub fn translate(&self, virt_addr: u32) -> Result<usize, Exception> {
        let context = self.context.lock();
        match context.as_ref() {
            Some(ctx) => {
                let mut table = ctx.page_table.lock();
                debug_assert_eq!(table.len(), ctx.num_pages);
                translate(virt_addr, &mut table, &self.config)
            }
            None => {
                log::debug!(target: "translate", "no page table installed for {:#x}", virt_addr);
                Err(Exception::AddressError)
            }
        }
    }

    /// Read the 32-bit little-endian word at a user virtual address.
    pub fn read_word(&self, virt_addr: u32) -> Result<u32, Exception> {
        let phys = self.translate(virt_addr)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.main_memory[phys..phys + 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write a 32-bit little-endian word at a user virtual address.
    pub fn write_word(&mut self, virt_addr: u32, value: u32) -> Result<(), Exception> {
        let phys = self.translate(virt_addr)?;
        self.main_memory[phys..phys + 4].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}
