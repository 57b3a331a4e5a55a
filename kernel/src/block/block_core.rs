use crate::block::block_error::BlockError;
use alloc::{boxed::Box, string::String};
use core::fmt;

/// Size of a block device sector in bytes.
///
/// All IDE disks use this sector size, as do most USB and SCSI disks.
pub const BLOCK_SECTOR_SIZE: usize = pagewright_shared::sizes::SECTOR_SIZE as usize;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// What a block device is used for.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum BlockType {
    /// OS Kernel
    Kernel,
    /// File system
    FileSystem,
    /// Scratch
    Scratch,
    /// Swap
    Swap,
    /// "Raw" device with unidentified contents
    Raw,
    /// Owned by another operating system; never written.
    Foreign,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockType::Kernel => write!(f, "Kernel"),
            BlockType::FileSystem => write!(f, "File System"),
            BlockType::Scratch => write!(f, "Scratch"),
            BlockType::Swap => write!(f, "Swap"),
            BlockType::Raw => write!(f, "Raw"),
            BlockType::Foreign => write!(f, "Foreign"),
        }
    }
}

/// Lower-level interface to block device drivers.
///
/// Callers guarantee `sector` is in bounds and `buf` is exactly
/// [`BLOCK_SECTOR_SIZE`] bytes.
pub trait BlockOp {
    fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError>;
    fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError>;
}

/// A block device
pub struct Block {
    name: String,
    block_type: BlockType,
    driver: Box<dyn BlockOp + Send>,

    /// The size of the block device in sectors
    size: BlockSector,

    read_count: u32,
    write_count: u32,
}

impl Block {
    pub fn new(
        name: &str,
        block_type: BlockType,
        size: BlockSector,
        driver: Box<dyn BlockOp + Send>,
    ) -> Self {
        Self {
            name: String::from(name),
            block_type,
            driver,
            size,
            read_count: 0,
            write_count: 0,
        }
    }

    fn check(&self, sector: BlockSector, len: usize) -> Result<(), BlockError> {
        if len != BLOCK_SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        if sector >= self.size {
            return Err(BlockError::SectorOutOfBounds);
        }
        Ok(())
    }

    /// Reads sector `sector` into `buf`, which must have room for
    /// `BLOCK_SECTOR_SIZE` bytes.
    pub fn read(&mut self, sector: BlockSector, buf: &mut [u8]) -> Result<(), BlockError> {
        self.check(sector, buf.len())?;
        self.driver.read(sector, buf)?;
        self.read_count += 1;
        Ok(())
    }

    /// Writes `buf`, which must contain `BLOCK_SECTOR_SIZE` bytes, to sector
    /// `sector`. Returns after the device has acknowledged the data.
    pub fn write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<(), BlockError> {
        self.check(sector, buf.len())?;
        if self.block_type == BlockType::Foreign {
            return Err(BlockError::WriteError);
        }
        self.driver.write(sector, buf)?;
        self.write_count += 1;
        Ok(())
    }

    pub fn get_type(&self) -> BlockType {
        self.block_type
    }
    pub fn get_size(&self) -> BlockSector {
        self.size
    }
    pub fn get_name(&self) -> &str {
        &self.name
    }
    pub fn read_count(&self) -> u32 {
        self.read_count
    }
    pub fn write_count(&self) -> u32 {
        self.write_count
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "\"{}\" ({}): {:04} sectors, {:04} read, {:04} write",
            self.name, self.block_type, self.size, self.read_count, self.write_count
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drivers::ram_disk::RamDisk;

    fn disk(block_type: BlockType) -> Block {
        Block::new("hdb", block_type, 4, Box::new(RamDisk::new(4)))
    }

    #[test]
    fn sector_round_trip() {
        let mut block = disk(BlockType::Raw);
        let data = [0x5a; BLOCK_SECTOR_SIZE];
        block.write(3, &data).unwrap();

        let mut buf = [0; BLOCK_SECTOR_SIZE];
        block.read(3, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!((block.read_count(), block.write_count()), (1, 1));
    }

    #[test]
    fn rejects_bad_requests() {
        let mut block = disk(BlockType::Raw);
        let mut buf = [0; BLOCK_SECTOR_SIZE];
        assert_eq!(block.read(4, &mut buf), Err(BlockError::SectorOutOfBounds));
        assert_eq!(block.write(0, &buf[1..]), Err(BlockError::BufferInvalid));
        assert_eq!(block.read_count(), 0);
    }

    #[test]
    fn foreign_blocks_are_read_only() {
        let mut block = disk(BlockType::Foreign);
        assert_eq!(
            block.write(0, &[0; BLOCK_SECTOR_SIZE]),
            Err(BlockError::WriteError)
        );
    }
}
