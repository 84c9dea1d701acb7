//! Per-process address spaces.
//!
//! An address space maps virtual pages `0..num_pages` onto a contiguous run
//! of physical frames taken from the [`FrameAllocator`]. It is built either
//! by loading a NOFF executable or by copying a parent's memory for fork.
//! Frames stay committed after the address space is dropped.

use alloc::sync::Arc;
use core::ops::Range;
use spin::{Mutex, MutexGuard};

use crate::machine::{Machine, SharedPageTable, NEXT_PC_REG, NUM_TOTAL_REGS, PC_REG, STACK_REG};
use crate::memory::{FrameAllocator, PageTable};
use crate::noff::{NoffHeader, OpenFile};
use super::FatalError;

/// Bytes left between the initial stack pointer and the top of the space.
const STACK_GUARD: usize = 16;

/// Address of the first instruction of every image.
const ENTRY_POINT: i32 = 0;

/// A user program's virtual memory.
pub struct AddressSpace {
    page_table: SharedPageTable,
    num_pages: usize,
    base_frame: usize,
}

impl AddressSpace {
    /// Load `executable` into freshly reserved frames.
    ///
    /// The whole new physical range is zeroed, then the code and initialized
    /// data segments are copied in from the file. Uninitialized data and the
    /// stack stay zero.
    pub fn from_executable(
        executable: &(impl OpenFile + ?Sized),
        machine: &mut Machine,
        frames: &FrameAllocator,
    ) -> Result<Self, FatalError> {
        let config = *machine.config();
        let (header, order) = NoffHeader::read(executable).map_err(fatal)?;
        log::debug!(target: "addrspace", "NOFF header ({:?} byte order): {:?}", order, header);

        let pages = header.num_pages(&config);
        if pages > config.num_phys_pages as u64 {
            return Err(fatal(FatalError::ProgramTooLarge { pages, max: config.num_phys_pages }));
        }
        let num_pages = pages as usize;

        let base_frame = frames
            .reserve_within(num_pages, config.num_phys_pages)
            .map_err(fatal)?;
        let mut table = PageTable::contiguous(num_pages, base_frame);
        log::debug!(
            target: "addrspace",
            "initializing address space, num pages {}, size {}, frames {}..{}",
            num_pages, num_pages * config.page_size, base_frame, base_frame + num_pages
        );

        let range = frame_bytes(base_frame, num_pages, config.page_size);
        machine.main_memory_mut()[range].fill(0);

        for (kind, segment) in header.file_segments() {
            segment
                .copy_in(kind, executable, &mut table, machine.main_memory_mut(), &config)
                .map_err(fatal)?;
        }

        Ok(AddressSpace {
            page_table: Arc::new(Mutex::new(table)),
            num_pages,
            base_frame,
        })
    }

    /// Duplicate the memory of a parent whose `num_parent_pages` pages occupy
    /// frames starting at `parent_start_phys_page`.
    ///
    /// The child gets its own frames; nothing is shared afterwards.
    pub fn from_parent(
        num_parent_pages: usize,
        parent_start_phys_page: usize,
        machine: &mut Machine,
        frames: &FrameAllocator,
    ) -> Result<Self, FatalError> {
        let config = *machine.config();
        if num_parent_pages > config.num_phys_pages {
            return Err(fatal(FatalError::ProgramTooLarge {
                pages: num_parent_pages as u64,
                max: config.num_phys_pages,
            }));
        }
        if parent_start_phys_page + num_parent_pages > config.num_phys_pages {
            return Err(fatal(FatalError::BadParent {
                start: parent_start_phys_page,
                pages: num_parent_pages,
            }));
        }

        let base_frame = frames
            .reserve_within(num_parent_pages, config.num_phys_pages)
            .map_err(fatal)?;
        let table = PageTable::contiguous(num_parent_pages, base_frame);

        let parent = frame_bytes(parent_start_phys_page, num_parent_pages, config.page_size);
        let child = frame_bytes(base_frame, num_parent_pages, config.page_size);
        log::debug!(
            target: "addrspace",
            "copying parent memory {:#x}..{:#x} to {:#x}..{:#x}",
            parent.start, parent.end, child.start, child.end
        );
        machine.main_memory_mut().copy_within(parent, child.start);

        Ok(AddressSpace {
            page_table: Arc::new(Mutex::new(table)),
            num_pages: num_parent_pages,
            base_frame,
        })
    }

    /// Duplicate this address space for a forked child.
    pub fn fork(&self, machine: &mut Machine, frames: &FrameAllocator) -> Result<Self, FatalError> {
        Self::from_parent(self.num_pages, self.start_phys_page(), machine, frames)
    }

    /// Set the user registers so execution starts at the image entry point.
    pub fn init_registers(&self, machine: &mut Machine) {
        for reg in 0..NUM_TOTAL_REGS {
            machine.write_register(reg, 0);
        }
        machine.write_register(PC_REG, ENTRY_POINT);
        // Delayed branches need the following instruction too.
        machine.write_register(NEXT_PC_REG, ENTRY_POINT + 4);

        // Register arithmetic wraps like the simulated 32-bit machine.
        let top = (self.num_pages * machine.config().page_size) as i32;
        let sp = top.wrapping_sub(STACK_GUARD as i32);
        machine.write_register(STACK_REG, sp);
        log::debug!(target: "addrspace", "initializing stack register to {}", sp);
    }

    /// Called when a thread of this space is switched out. Nothing to keep.
    pub fn save_state(&self) {}

    /// Make this space the one the machine translates through.
    pub fn restore_state(&self, machine: &Machine) {
        machine.install(Arc::clone(&self.page_table), self.num_pages);
    }

    /// Virtual pages in this space.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Frame backing virtual page 0.
    pub fn start_phys_page(&self) -> usize {
        self.base_frame
    }

    /// Physical byte range owned by this space.
    pub fn physical_range(&self, page_size: usize) -> Range<usize> {
        frame_bytes(self.base_frame, self.num_pages, page_size)
    }

    /// Lock the page table for inspection.
    pub fn page_table(&self) -> MutexGuard<'_, PageTable> {
        self.page_table.lock()
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        // Bump allocator: the frames are not handed back.
        log::debug!(
            target: "addrspace",
            "dropping address space, frames {}..{} stay committed",
            self.base_frame, self.base_frame + self.num_pages
        );
    }
}

fn frame_bytes(first_frame: usize, pages: usize, page_size: usize) -> Range<usize> {
    first_frame * page_size..(first_frame + pages) * page_size
}

fn fatal<E: Into<FatalError>>(e: E) -> FatalError {
    let e = e.into();
    log::error!(target: "addrspace", "cannot build address space: {}", e);
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use crate::config::MachineConfig;
    use crate::machine::Registers;
    use crate::memory::Exception;
    use crate::noff::{ByteOrder, NoffBuilder, NoffError};

    fn machine() -> Machine {
        Machine::new(MachineConfig::new()).unwrap()
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    #[test]
    fn loads_code_segment_at_frame_zero() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let code = pattern(128, 1);
        let image = NoffBuilder::new().with_code(0, &code).build();

        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        assert_eq!(space.num_pages(), 9);
        assert_eq!(space.start_phys_page(), 0);
        assert_eq!(space.page_table().get(0).unwrap().physical_page, 0);
        assert_eq!(&machine.main_memory()[0..128], &image[40..168]);
        assert!(machine.main_memory()[128..9 * 128].iter().all(|&b| b == 0));
        assert_eq!(frames.committed(), 9);
    }

    #[test]
    fn second_image_follows_first() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let first = NoffBuilder::new().with_code(0, &pattern(128, 1)).build();
        AddressSpace::from_executable(&first, &mut machine, &frames).unwrap();

        let config = MachineConfig::new().with_stack_size(256);
        let mut small = Machine::new(config).unwrap();
        let second = NoffBuilder::new().with_code(0, &pattern(64, 2)).build();
        let space = AddressSpace::from_executable(&second, &mut small, &frames).unwrap();

        let phys: Vec<usize> = space.page_table().entries().iter().map(|e| e.physical_page).collect();
        assert_eq!(phys, alloc::vec![9, 10, 11]);
        assert_eq!(frames.committed(), 12);
        assert_eq!(&small.main_memory()[9 * 128..9 * 128 + 64], &pattern(64, 2)[..]);
    }

    #[test]
    fn data_segment_and_bss() {
        let mut machine = machine();
        machine.main_memory_mut().fill(0xaa);
        let frames = FrameAllocator::new(32);
        let code = pattern(64, 3);
        let data = pattern(32, 4);
        let image = NoffBuilder::new()
            .with_code(0, &code)
            .with_data(64, &data)
            .with_bss(96, 200)
            .build();

        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        // 64 + 32 + 200 + 1024 = 1320 -> 11 pages
        assert_eq!(space.num_pages(), 11);
        let mem = machine.main_memory();
        assert_eq!(&mem[0..64], &code[..]);
        assert_eq!(&mem[64..96], &data[..]);
        assert!(mem[96..11 * 128].iter().all(|&b| b == 0));
        assert!(mem[11 * 128..].iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn swapped_image_loads() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let code = pattern(16, 5);
        let image = NoffBuilder::new()
            .with_code(0, &code)
            .with_byte_order(ByteOrder::Swapped)
            .build();
        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        assert_eq!(space.num_pages(), 9);
        assert_eq!(&machine.main_memory()[0..16], &code[..]);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let mut image = NoffBuilder::new().with_code(0, &[0; 8]).build();
        image[0] ^= 0xff;
        let err = AddressSpace::from_executable(&image, &mut machine, &frames).err();
        assert!(matches!(err, Some(FatalError::Image(NoffError::BadMagic(_)))));
        assert_eq!(frames.committed(), 0);
    }

    #[test]
    fn oversized_program_is_fatal() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_bss(0, 32 * 128).build();
        let err = AddressSpace::from_executable(&image, &mut machine, &frames).err();
        assert_eq!(err, Some(FatalError::ProgramTooLarge { pages: 40, max: 32 }));
        assert_eq!(frames.committed(), 0);
    }

    #[test]
    fn frame_exhaustion_is_fatal() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_code(0, &[0; 128]).build();
        for _ in 0..3 {
            AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        }
        let err = AddressSpace::from_executable(&image, &mut machine, &frames).err();
        assert!(matches!(err, Some(FatalError::Frames(_))));
        assert_eq!(frames.committed(), 27);
    }

    #[test]
    fn segment_fault_during_load_is_fatal() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_code(2, &[0; 8]).build();
        let err = AddressSpace::from_executable(&image, &mut machine, &frames).err();
        assert_eq!(
            err,
            Some(FatalError::Image(NoffError::SegmentFault(
                crate::noff::SegmentKind::Code,
                Exception::AddressError
            )))
        );
    }

    #[test]
    fn fork_copies_memory_into_new_frames() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_code(0, &pattern(256, 6)).build();
        let parent = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        machine.main_memory_mut()[5 * 128 + 3] = 0x5a;

        let child = parent.fork(&mut machine, &frames).unwrap();
        assert_eq!(child.num_pages(), parent.num_pages());
        assert_eq!(child.start_phys_page(), parent.num_pages());

        let ps = machine.config().page_size;
        let (pt, ct) = (parent.page_table(), child.page_table());
        for vpn in 0..parent.num_pages() {
            let pf = pt.get(vpn).unwrap().physical_page;
            let cf = ct.get(vpn).unwrap().physical_page;
            assert_ne!(pf, cf);
            let mem = machine.main_memory();
            assert_eq!(&mem[pf * ps..(pf + 1) * ps], &mem[cf * ps..(cf + 1) * ps]);
        }
    }

    #[test]
    fn fork_is_not_shared() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_code(0, &[1; 4]).build();
        let parent = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        let child = parent.fork(&mut machine, &frames).unwrap();

        parent.restore_state(&machine);
        machine.write_word(0, 0x1111_1111).unwrap();
        child.restore_state(&machine);
        assert_eq!(machine.read_word(0), Ok(0x0101_0101));
    }

    #[test]
    fn fork_rejects_range_outside_memory() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let err = AddressSpace::from_parent(4, 30, &mut machine, &frames).err();
        assert_eq!(err, Some(FatalError::BadParent { start: 30, pages: 4 }));
        assert_eq!(frames.committed(), 0);
    }

    #[test]
    fn fork_exhaustion_is_fatal() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        frames.reserve(20).unwrap();
        let err = AddressSpace::from_parent(16, 0, &mut machine, &frames).err();
        assert!(matches!(err, Some(FatalError::Frames(_))));
    }

    #[test]
    fn init_registers_for_nine_pages() {
        let mut machine = machine();
        machine.registers_mut().fill(-1);
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_code(0, &[0; 128]).build();
        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();

        space.init_registers(&mut machine);
        let mut expected: Registers = [0; NUM_TOTAL_REGS];
        expected[STACK_REG] = 1136;
        expected[NEXT_PC_REG] = 4;
        assert_eq!(machine.registers(), &expected);
        assert_eq!(machine.read_register(PC_REG), 0);
    }

    #[test]
    fn init_registers_below_stack_guard() {
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().build();

        let mut empty = Machine::new(MachineConfig::new().with_stack_size(0)).unwrap();
        let space = AddressSpace::from_executable(&image, &mut empty, &frames).unwrap();
        assert_eq!(space.num_pages(), 0);
        space.init_registers(&mut empty);
        assert_eq!(empty.read_register(STACK_REG), -16);

        let mut tiny = Machine::new(MachineConfig::new().with_page_size(4).with_stack_size(4)).unwrap();
        let space = AddressSpace::from_executable(&image, &mut tiny, &frames).unwrap();
        assert_eq!(space.num_pages(), 1);
        space.init_registers(&mut tiny);
        assert_eq!(tiny.read_register(STACK_REG), -12);
        assert_eq!(tiny.read_register(NEXT_PC_REG), 4);
    }

    #[test]
    fn allocator_larger_than_machine() {
        let mut machine = Machine::new(MachineConfig::new().with_phys_pages(8)).unwrap();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().build();

        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        assert_eq!(space.num_pages(), 8);
        let err = AddressSpace::from_executable(&image, &mut machine, &frames).err();
        assert_eq!(
            err,
            Some(FatalError::Frames(crate::memory::FrameError::Exhausted {
                requested: 8,
                committed: 8,
                total: 8
            }))
        );
        let err = space.fork(&mut machine, &frames).err();
        assert!(matches!(err, Some(FatalError::Frames(_))));
        assert_eq!(frames.committed(), 8);
    }

    #[test]
    fn restore_state_installs_table() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().with_code(0, &[0; 4]).build();
        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        assert!(machine.context().is_none());

        space.save_state();
        space.restore_state(&machine);
        let ctx = machine.context().unwrap();
        assert_eq!(ctx.num_pages, 9);
        assert!(Arc::ptr_eq(&ctx.page_table, &space.page_table));
        assert_eq!(machine.translate(8 * 128), Ok(8 * 128));
        assert_eq!(machine.translate(9 * 128), Err(Exception::AddressError));
    }

    #[test]
    fn drop_keeps_frames_committed() {
        let mut machine = machine();
        let frames = FrameAllocator::new(32);
        let image = NoffBuilder::new().build();
        let space = AddressSpace::from_executable(&image, &mut machine, &frames).unwrap();
        assert_eq!(space.num_pages(), 8);
        drop(space);
        assert_eq!(frames.committed(), 8);
    }
}
