//! In-memory NOFF image construction.
//!
//! Lays out the header followed by the code bytes and then the initialized
//! data bytes. Used by tests and by demos that have no toolchain to produce
//! real images.

use alloc::vec::Vec;

use super::{ByteOrder, NoffHeader, Segment, NOFF_HEADER_SIZE, NOFF_MAGIC};

/// Builder for a NOFF image.
#[derive(Debug, Clone)]
pub struct NoffBuilder {
    code: Vec<u8>,
    code_vaddr: u32,
    data: Vec<u8>,
    data_vaddr: u32,
    bss_size: u32,
    bss_vaddr: u32,
    order: ByteOrder,
}

impl NoffBuilder {
    /// Empty image in machine byte order.
    pub fn new() -> Self {
        NoffBuilder {
            code: Vec::new(),
            code_vaddr: 0,
            data: Vec::new(),
            data_vaddr: 0,
            bss_size: 0,
            bss_vaddr: 0,
            order: ByteOrder::Native,
        }
    }

    /// Builder: code segment loaded at `vaddr`.
    pub fn with_code(mut self, vaddr: u32, code: &[u8]) -> Self {
        self.code = code.to_vec();
        self.code_vaddr = vaddr;
        self
    }

    /// Builder: initialized data segment loaded at `vaddr`.
    pub fn with_data(mut self, vaddr: u32, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self.data_vaddr = vaddr;
        self
    }

    /// Builder: uninitialized data segment of `size` bytes at `vaddr`.
    pub fn with_bss(mut self, vaddr: u32, size: u32) -> Self {
        self.bss_size = size;
        self.bss_vaddr = vaddr;
        self
    }

    /// Builder: byte order of the header words.
    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    /// Header describing the image `build` produces.
    pub fn header(&self) -> NoffHeader {
        let code_offset = NOFF_HEADER_SIZE as u32;
        let data_offset = code_offset + self.code.len() as u32;
        NoffHeader {
            noff_magic: NOFF_MAGIC,
            code: Segment {
                size: self.code.len() as u32,
                virtual_addr: self.code_vaddr,
                in_file_addr: code_offset,
            },
            init_data: Segment {
                size: self.data.len() as u32,
                virtual_addr: self.data_vaddr,
                in_file_addr: data_offset,
            },
            uninit_data: Segment {
                size: self.bss_size,
                virtual_addr: self.bss_vaddr,
                in_file_addr: 0,
            },
        }
    }

    /// Produce the image bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(NOFF_HEADER_SIZE + self.code.len() + self.data.len());
        image.extend_from_slice(&self.header().to_bytes(self.order));
        image.extend_from_slice(&self.code);
        image.extend_from_slice(&self.data);
        image
    }
}

impl Default for NoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}
