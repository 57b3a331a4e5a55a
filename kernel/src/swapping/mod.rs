//! Disk-backed overflow for evicted pages.
//!
//! The swap device is divided into page-sized slots of
//! [`SECTORS_PER_PAGE`] contiguous sectors. Slot contents are raw page bytes
//! with no header, and which sectors are in use is rebuilt empty at boot.

// Sector indices fit in a `BlockSector` because the bitmap is sized from
// the device's own sector count.
#![allow(clippy::cast_possible_truncation)]

mod sector_map;

use crate::block::block_core::{Block, BlockSector, BlockType, BLOCK_SECTOR_SIZE};
use crate::block::block_error::BlockError;
use crate::mem::FrameBytes;
use crate::sync::mutex::Mutex;
use core::fmt;
use pagewright_shared::{mem::PAGE_FRAME_SIZE, println};
use sector_map::SectorMap;

pub const SECTORS_PER_PAGE: usize = PAGE_FRAME_SIZE / BLOCK_SECTOR_SIZE;

/// A page-sized run of swap sectors, named by its first sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(BlockSector);

impl SwapSlot {
    pub const fn start_sector(self) -> BlockSector {
        self.0
    }
}

#[cfg(test)]
pub(crate) fn test_slot(sector: BlockSector) -> SwapSlot {
    SwapSlot(sector)
}

impl fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swap slot @{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// No run of free sectors is large enough for a page.
    Full,
    /// The device handed to [`SwapSpace::new`] is not a swap device.
    WrongDevice(BlockType),
    Device(BlockError),
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "swap space exhausted"),
            Self::WrongDevice(t) => write!(f, "expected a swap device, got {t}"),
            Self::Device(e) => write!(f, "swap device: {e}"),
        }
    }
}

impl core::error::Error for SwapError {}

impl From<BlockError> for SwapError {
    fn from(e: BlockError) -> Self {
        Self::Device(e)
    }
}

/// The bitmap and the device are locked separately; neither lock is ever
/// held while taking the other.
pub struct SwapSpace {
    device: Mutex<Block>,
    sectors: Mutex<SectorMap>,
}

impl SwapSpace {
    pub fn new(device: Block) -> Result<Self, SwapError> {
        if device.get_type() != BlockType::Swap {
            return Err(SwapError::WrongDevice(device.get_type()));
        }
        let sectors = SectorMap::new(device.get_size() as usize);
        println!(
            "swap: {} page slots on \"{}\"",
            sectors.len() / SECTORS_PER_PAGE,
            device.get_name()
        );
        Ok(Self {
            device: Mutex::new(device),
            sectors: Mutex::new(sectors),
        })
    }

    pub fn alloc_slot(&self) -> Result<SwapSlot, SwapError> {
        let start = self
            .sectors
            .lock()
            .scan_and_set(SECTORS_PER_PAGE)
            .ok_or(SwapError::Full)?;
        Ok(SwapSlot(start as BlockSector))
    }

    /// Releases `slot` without reading it.
    pub fn free_slot(&self, slot: SwapSlot) {
        let mut sectors = self.sectors.lock();
        assert!(
            sectors.all(slot.0 as usize, SECTORS_PER_PAGE, true),
            "freeing {slot}, which is not in use"
        );
        sectors.set_range(slot.0 as usize, SECTORS_PER_PAGE, false);
    }

    pub fn write_out(&self, slot: SwapSlot, page: &FrameBytes) -> Result<(), SwapError> {
        let mut device = self.device.lock();
        for (sector, chunk) in (slot.0..).zip(page.chunks_exact(BLOCK_SECTOR_SIZE)) {
            device.write(sector, chunk)?;
        }
        Ok(())
    }

    /// Reads `slot` into `page` and frees the slot.
    ///
    /// On a device error the slot stays allocated so the page can be retried
    /// or discarded by its owner.
    pub fn read_in(&self, slot: SwapSlot, page: &mut FrameBytes) -> Result<(), SwapError> {
        assert!(
            !self.is_slot_free(slot),
            "reading {slot}, which is not in use"
        );
        {
            let mut device = self.device.lock();
            for (sector, chunk) in (slot.0..).zip(page.chunks_exact_mut(BLOCK_SECTOR_SIZE)) {
                device.read(sector, chunk)?;
            }
        }
        self.free_slot(slot);
        Ok(())
    }

    pub fn is_slot_free(&self, slot: SwapSlot) -> bool {
        self.sectors
            .lock()
            .all(slot.0 as usize, SECTORS_PER_PAGE, false)
    }

    pub fn used_slots(&self) -> usize {
        self.sectors.lock().used() / SECTORS_PER_PAGE
    }

    /// Number of slots the device can hold.
    pub fn capacity(&self) -> usize {
        self.sectors.lock().len() / SECTORS_PER_PAGE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers::ram_disk::RamDisk;
    use alloc::boxed::Box;

    fn swap_of(slots: usize) -> SwapSpace {
        let sectors = (slots * SECTORS_PER_PAGE) as BlockSector;
        let block = Block::new("swap", BlockType::Swap, sectors, Box::new(RamDisk::new(sectors)));
        SwapSpace::new(block).unwrap()
    }

    fn pattern(seed: u8) -> FrameBytes {
        core::array::from_fn(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
    }

    #[test]
    fn round_trip_frees_slot() {
        let swap = swap_of(2);
        let slot = swap.alloc_slot().unwrap();
        let page = pattern(7);
        swap.write_out(slot, &page).unwrap();
        assert_eq!(swap.used_slots(), 1);

        let mut other = [0; PAGE_FRAME_SIZE];
        swap.read_in(slot, &mut other).unwrap();
        assert_eq!(other, page);
        assert!(swap.is_slot_free(slot));
        assert_eq!(swap.used_slots(), 0);
    }

    #[test]
    fn slots_do_not_overlap() {
        let swap = swap_of(2);
        let a = swap.alloc_slot().unwrap();
        let b = swap.alloc_slot().unwrap();
        assert_eq!(b.start_sector() - a.start_sector(), SECTORS_PER_PAGE as BlockSector);

        swap.write_out(a, &pattern(1)).unwrap();
        swap.write_out(b, &pattern(2)).unwrap();
        let mut page = [0; PAGE_FRAME_SIZE];
        swap.read_in(a, &mut page).unwrap();
        assert_eq!(page, pattern(1));
    }

    #[test]
    fn exhaustion() {
        let swap = swap_of(1);
        let slot = swap.alloc_slot().unwrap();
        assert_eq!(swap.alloc_slot(), Err(SwapError::Full));
        swap.free_slot(slot);
        assert_eq!(swap.alloc_slot(), Ok(slot));
    }

    #[test]
    fn rejects_non_swap_device() {
        let block = Block::new("hda", BlockType::FileSystem, 8, Box::new(RamDisk::new(8)));
        assert_eq!(
            SwapSpace::new(block).err(),
            Some(SwapError::WrongDevice(BlockType::FileSystem))
        );
    }

    #[test]
    #[should_panic(expected = "not in use")]
    fn reading_free_slot_panics() {
        let swap = swap_of(1);
        let slot = swap.alloc_slot().unwrap();
        swap.free_slot(slot);
        let mut page = [0; PAGE_FRAME_SIZE];
        let _ = swap.read_in(slot, &mut page);
    }
}
