//! NOFF executable images.
//!
//! A NOFF file starts with a fixed 40-byte header: a magic word followed by
//! three segment descriptors (code, initialized data, uninitialized data).
//! Words are stored in the machine's little-endian order; images written on
//! a host of the other byte order are detected by their swapped magic and
//! normalized on load.

pub mod builder;

use core::mem::size_of;
use static_assertions::const_assert_eq;

use crate::config::MachineConfig;
use crate::memory::{translate, Exception, PageTable};

pub use builder::NoffBuilder;

/// Magic word identifying a NOFF image.
pub const NOFF_MAGIC: u32 = 0x00ba_dfad;

/// Header words: magic plus three `{size, virtual_addr, in_file_addr}` triples.
const HEADER_WORDS: usize = 1 + 3 * 3;

/// Size of the on-disk header in bytes.
pub const NOFF_HEADER_SIZE: usize = HEADER_WORDS * size_of::<u32>();

const_assert_eq!(NOFF_HEADER_SIZE, 40);

/// Random-access readable file.
pub trait OpenFile {
    /// Read up to `buf.len()` bytes starting at `position`; returns the count read.
    fn read_at(&self, buf: &mut [u8], position: usize) -> usize;

    /// File length in bytes.
    fn length(&self) -> usize;
}

impl OpenFile for [u8] {
    fn read_at(&self, buf: &mut [u8], position: usize) -> usize {
        let Some(available) = self.get(position..) else {
            return 0;
        };
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        n
    }

    fn length(&self) -> usize {
        self.len()
    }
}

impl OpenFile for alloc::vec::Vec<u8> {
    fn read_at(&self, buf: &mut [u8], position: usize) -> usize {
        self.as_slice().read_at(buf, position)
    }

    fn length(&self) -> usize {
        self.len()
    }
}

/// Byte order the image was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Machine order, used as-is.
    Native,
    /// Opposite order, every header word swapped on load.
    Swapped,
}

/// One segment descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Segment {
    pub size: u32,
    pub virtual_addr: u32,
    pub in_file_addr: u32,
}

impl Segment {
    fn from_words(words: &[u32]) -> Self {
        Segment {
            size: words[0],
            virtual_addr: words[1],
            in_file_addr: words[2],
        }
    }

    fn to_words(self) -> [u32; 3] {
        [self.size, self.virtual_addr, self.in_file_addr]
    }

    /// Copy this segment's bytes from `file` into the frames `table` maps it to.
    ///
    /// Empty segments are skipped. The table must be contiguous in physical
    /// memory, which holds for every table built from the frame allocator.
    pub fn copy_in(
        &self,
        name: SegmentKind,
        file: &(impl OpenFile + ?Sized),
        table: &mut PageTable,
        memory: &mut [u8],
        config: &MachineConfig,
    ) -> Result<(), NoffError> {
        if self.size == 0 {
            return Ok(());
        }

        let space_size = table.len() as u64 * config.page_size as u64;
        if self.virtual_addr as u64 + self.size as u64 > space_size {
            return Err(NoffError::SegmentOutOfRange(name));
        }
        let phys = translate(self.virtual_addr, table, config)
            .map_err(|e| NoffError::SegmentFault(name, e))?;
        log::debug!(
            target: "addrspace",
            "initializing {} segment at {:#x}, size {}",
            name, phys, self.size
        );

        let len = self.size as usize;
        let dst = memory
            .get_mut(phys..phys + len)
            .ok_or(NoffError::SegmentOutOfRange(name))?;
        let read = file.read_at(dst, self.in_file_addr as usize);
        if read != len {
            return Err(NoffError::TruncatedSegment { segment: name, expected: len, read });
        }
        Ok(())
    }
}

/// Which segment a descriptor or error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    InitData,
    UninitData,
}

impl core::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            SegmentKind::Code => write!(f, "code"),
            SegmentKind::InitData => write!(f, "data"),
            SegmentKind::UninitData => write!(f, "bss"),
        }
    }
}

/// Parsed, byte-order-normalized NOFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    pub noff_magic: u32,
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
}

impl NoffHeader {
    /// Read and validate the header at offset 0 of `file`.
    pub fn read(file: &(impl OpenFile + ?Sized)) -> Result<(Self, ByteOrder), NoffError> {
        let mut raw = [0u8; NOFF_HEADER_SIZE];
        let read = file.read_at(&mut raw, 0);
        if read != NOFF_HEADER_SIZE {
            return Err(NoffError::TruncatedHeader(read));
        }
        Self::parse(&raw)
    }

    /// Decode a raw header, swapping every word if the magic is byte-reversed.
    pub fn parse(raw: &[u8; NOFF_HEADER_SIZE]) -> Result<(Self, ByteOrder), NoffError> {
        let mut words = [0u32; HEADER_WORDS];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }

        let order = if words[0] == NOFF_MAGIC {
            ByteOrder::Native
        } else if words[0].swap_bytes() == NOFF_MAGIC {
            words.iter_mut().for_each(|w| *w = w.swap_bytes());
            ByteOrder::Swapped
        } else {
            return Err(NoffError::BadMagic(words[0]));
        };

        let header = NoffHeader {
            noff_magic: words[0],
            code: Segment::from_words(&words[1..4]),
            init_data: Segment::from_words(&words[4..7]),
            uninit_data: Segment::from_words(&words[7..10]),
        };
        Ok((header, order))
    }

    /// Encode in the requested byte order.
    pub fn to_bytes(&self, order: ByteOrder) -> [u8; NOFF_HEADER_SIZE] {
        let mut words = [0u32; HEADER_WORDS];
        words[0] = self.noff_magic;
        words[1..4].copy_from_slice(&self.code.to_words());
        words[4..7].copy_from_slice(&self.init_data.to_words());
        words[7..10].copy_from_slice(&self.uninit_data.to_words());

        let mut raw = [0u8; NOFF_HEADER_SIZE];
        for (chunk, word) in raw.chunks_exact_mut(4).zip(words) {
            let bytes = match order {
                ByteOrder::Native => word.to_le_bytes(),
                ByteOrder::Swapped => word.to_be_bytes(),
            };
            chunk.copy_from_slice(&bytes);
        }
        raw
    }

    /// Bytes the address space needs: all three segments plus the stack.
    pub fn image_size(&self, config: &MachineConfig) -> u64 {
        self.code.size as u64
            + self.init_data.size as u64
            + self.uninit_data.size as u64
            + config.user_stack_size as u64
    }

    /// Pages the address space needs.
    pub fn num_pages(&self, config: &MachineConfig) -> u64 {
        config.pages_for(self.image_size(config))
    }

    /// Segments that are copied from the file, in load order.
    pub fn file_segments(&self) -> [(SegmentKind, Segment); 2] {
        [
            (SegmentKind::Code, self.code),
            (SegmentKind::InitData, self.init_data),
        ]
    }
}

/// Malformed or unloadable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoffError {
    /// File shorter than the header; carries the bytes actually read.
    TruncatedHeader(usize),
    /// Magic matches in neither byte order.
    BadMagic(u32),
    /// Segment extends past the end of the address space.
    SegmentOutOfRange(SegmentKind),
    /// Segment start does not translate.
    SegmentFault(SegmentKind, Exception),
    /// File ended inside a segment.
    TruncatedSegment {
        segment: SegmentKind,
        expected: usize,
        read: usize,
    },
}

impl core::fmt::Display for NoffError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            NoffError::TruncatedHeader(read) => {
                write!(f, "truncated header ({} of {} bytes)", read, NOFF_HEADER_SIZE)
            }
            NoffError::BadMagic(magic) => write!(f, "bad magic {:#010x}", magic),
            NoffError::SegmentOutOfRange(seg) => {
                write!(f, "{} segment outside address space", seg)
            }
            NoffError::SegmentFault(seg, e) => write!(f, "{} segment start: {}", seg, e),
            NoffError::TruncatedSegment { segment, expected, read } => write!(
                f,
                "truncated {} segment ({} of {} bytes)",
                segment, read, expected
            ),
        }
    }
}
