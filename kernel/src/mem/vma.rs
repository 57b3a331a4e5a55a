//! Memory-mapped files.

use crate::mem::{
    address_space::AddressSpace,
    frame_table::FrameTable,
    spt::{FileSegment, PageDescriptor, PageSource},
};
use crate::system::VmSystem;
use crate::vfs::{self, FileRef};
use alloc::{boxed::Box, collections::BTreeMap};
use core::{cmp::min, fmt};
use pagewright_shared::{
    eprintln,
    mem::{is_page_aligned, page_round_up, OFFSET, PAGE_FRAME_SIZE},
};

pub type MapId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmapError {
    /// Standard input and output cannot be mapped.
    StdStream(i32),
    BadFd(i32),
    NullAddress,
    Unaligned(usize),
    EmptyFile,
    /// The mapping would reach kernel space.
    OutOfRange(usize),
    /// The page already belongs to a segment, the stack or another mapping.
    Overlap(usize),
    TooManyMappings,
}

impl fmt::Display for MmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StdStream(fd) => write!(f, "fd {fd} is a standard stream"),
            Self::BadFd(fd) => write!(f, "fd {fd} is not open"),
            Self::NullAddress => write!(f, "cannot map page 0"),
            Self::Unaligned(addr) => write!(f, "{addr:#x} is not page aligned"),
            Self::EmptyFile => write!(f, "file is empty"),
            Self::OutOfRange(addr) => write!(f, "mapping at {addr:#x} reaches kernel space"),
            Self::Overlap(addr) => write!(f, "page {addr:#x} is already in use"),
            Self::TooManyMappings => write!(f, "out of mapping ids"),
        }
    }
}

impl core::error::Error for MmapError {}

/// One `mmap` call: a whole file mapped from `start`.
pub struct MappedFile {
    file: FileRef,
    start: usize,
    len: usize,
}

impl MappedFile {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn page_count(&self) -> usize {
        self.len.div_ceil(PAGE_FRAME_SIZE)
    }

    fn pages(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.page_count()).map(|i| self.start + i * PAGE_FRAME_SIZE)
    }

    /// File offset of `upage` and how many of its bytes belong to the file.
    fn extent(&self, upage: usize) -> (u64, usize) {
        let offset = upage - self.start;
        (offset as u64, min(PAGE_FRAME_SIZE, self.len - offset))
    }
}

/// A process's memory-mapped files, by id.
pub struct MmapTable {
    maps: BTreeMap<MapId, MappedFile>,
    next_id: MapId,
}

impl Default for MmapTable {
    fn default() -> Self {
        Self {
            maps: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl MmapTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: MapId) -> Option<&MappedFile> {
        self.maps.get(&id)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Maps all of `file` at `addr`, one lazily loaded writable page per file
    /// page. The last page is zero-filled past the end of the file.
    pub fn mmap(
        &mut self,
        space: &AddressSpace,
        file: FileRef,
        addr: usize,
    ) -> Result<MapId, MmapError> {
        if addr == 0 {
            return Err(MmapError::NullAddress);
        }
        if !is_page_aligned(addr) {
            return Err(MmapError::Unaligned(addr));
        }
        let len = usize::try_from(file.len()).map_err(|_| MmapError::OutOfRange(addr))?;
        if len == 0 {
            return Err(MmapError::EmptyFile);
        }
        let end = match page_round_up(len).and_then(|span| addr.checked_add(span)) {
            Some(end) if end <= OFFSET => end,
            _ => return Err(MmapError::OutOfRange(addr)),
        };
        let id = self.next_id;
        let next_id = id.checked_add(1).ok_or(MmapError::TooManyMappings)?;

        let mut spt = space.spt().lock();
        if let Some(upage) = spt.first_in(addr..end) {
            return Err(MmapError::Overlap(upage));
        }
        let mapping = MappedFile { file, start: addr, len };
        for upage in mapping.pages() {
            let (offset, read_bytes) = mapping.extent(upage);
            let segment = FileSegment {
                file: mapping.file.clone(),
                offset,
                read_bytes,
                zero_bytes: PAGE_FRAME_SIZE - read_bytes,
            };
            let inserted = spt.insert(PageDescriptor::file_backed(upage, true, segment));
            debug_assert!(inserted);
        }
        drop(spt);

        self.maps.insert(id, mapping);
        self.next_id = next_id;
        Ok(id)
    }

    /// Writes back dirty pages of mapping `id`, then removes it. Returns
    /// `false` if there is no such mapping.
    pub fn munmap(&mut self, system: &VmSystem, space: &AddressSpace, id: MapId) -> bool {
        let Some(mapping) = self.maps.remove(&id) else {
            return false;
        };
        let mut frame_table = system.frame_table();
        unmap(&mut frame_table, system, space, &mapping);
        true
    }

    /// Removes every mapping, as if each were passed to [`Self::munmap`].
    pub fn unmap_all(&mut self, system: &VmSystem, space: &AddressSpace) {
        let mut frame_table = system.frame_table();
        for mapping in core::mem::take(&mut self.maps).into_values() {
            unmap(&mut frame_table, system, space, &mapping);
        }
    }
}

fn unmap(frame_table: &mut FrameTable, system: &VmSystem, space: &AddressSpace, mapping: &MappedFile) {
    let mut spt = space.spt().lock();
    let mut page_dir = space.page_dir().lock();

    for upage in mapping.pages() {
        let Some(page) = spt.remove(upage) else {
            continue;
        };
        let (offset, len) = mapping.extent(upage);

        let written = match (page.frame, &page.source) {
            (Some(frame), _) => {
                let dirty = page.dirty || page_dir.is_dirty(upage);
                let written = if dirty {
                    let bytes = system.memory().frame(frame);
                    write_back(&mapping.file, offset, &bytes[..len])
                } else {
                    Ok(())
                };
                page_dir.unmap(upage);
                let _ = frame_table.free_frame(frame);
                written
            }
            (None, PageSource::Swapped(slot)) if page.dirty => {
                let mut bytes = Box::new([0; PAGE_FRAME_SIZE]);
                match system.swap().read_in(*slot, &mut bytes) {
                    Ok(()) => write_back(&mapping.file, offset, &bytes[..len]),
                    Err(e) => {
                        system.swap().free_slot(*slot);
                        eprintln!("munmap: lost page {upage:#x}: {e}");
                        Ok(())
                    }
                }
            }
            (None, PageSource::Swapped(slot)) => {
                system.swap().free_slot(*slot);
                Ok(())
            }
            // Never loaded, so never written.
            (None, _) => Ok(()),
        };

        if let Err(e) = written {
            eprintln!("munmap: write-back of page {upage:#x} failed: {e}");
        }
    }
}

fn write_back(file: &FileRef, offset: u64, bytes: &[u8]) -> vfs::Result<()> {
    let written = file.write_at(offset, bytes)?;
    if written != bytes.len() {
        return Err(vfs::Error::Io);
    }
    Ok(())
}
