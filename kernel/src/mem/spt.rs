//! Supplemental page tables.
//!
//! Each process records, per virtual page, where the page's contents come
//! from when it is not resident. The hardware page directory only knows
//! about resident pages; everything else faults and is resolved from here.

use crate::mem::Frame;
use crate::swapping::SwapSlot;
use crate::vfs::FileRef;
use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt;
use core::ops::Range;
use pagewright_shared::mem::{is_page_aligned, PAGE_FRAME_SIZE};

/// The part of a file backing one page: `read_bytes` from `offset`, then
/// `zero_bytes` of zeros.
#[derive(Clone)]
pub struct FileSegment {
    pub file: FileRef,
    pub offset: u64,
    pub read_bytes: usize,
    pub zero_bytes: usize,
}

impl fmt::Debug for FileSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSegment")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .field("zero_bytes", &self.zero_bytes)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub enum PageSource {
    FileBacked(FileSegment),
    /// A stack page, zeroed on first touch.
    StackZero,
    Swapped(SwapSlot),
    /// Came back from swap. The frame holds the only copy; evicting it again
    /// allocates a fresh slot.
    Anonymous,
}

#[derive(Debug)]
pub struct PageDescriptor {
    pub upage: usize,
    pub writable: bool,
    pub source: PageSource,
    /// Where the page is resident, if it is.
    pub frame: Option<Frame>,
    /// Set once the hardware dirty bit is seen at eviction, and never
    /// cleared. Lets write-back find pages modified before a trip through
    /// swap.
    pub dirty: bool,
}

impl PageDescriptor {
    pub fn new(upage: usize, writable: bool, source: PageSource) -> Self {
        Self {
            upage,
            writable,
            source,
            frame: None,
            dirty: false,
        }
    }

    pub fn file_backed(upage: usize, writable: bool, segment: FileSegment) -> Self {
        debug_assert_eq!(segment.read_bytes + segment.zero_bytes, PAGE_FRAME_SIZE);
        Self::new(upage, writable, PageSource::FileBacked(segment))
    }

    pub fn stack(upage: usize) -> Self {
        Self::new(upage, true, PageSource::StackZero)
    }
}

#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<usize, PageDescriptor>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor. Returns `false`, leaving the existing descriptor in
    /// place, if the page already has one.
    #[must_use]
    pub fn insert(&mut self, page: PageDescriptor) -> bool {
        assert!(is_page_aligned(page.upage), "unaligned page {:#x}", page.upage);
        if self.pages.contains_key(&page.upage) {
            return false;
        }
        self.pages.insert(page.upage, page);
        true
    }

    pub fn find(&self, upage: usize) -> Option<&PageDescriptor> {
        self.pages.get(&upage)
    }

    pub fn find_mut(&mut self, upage: usize) -> Option<&mut PageDescriptor> {
        self.pages.get_mut(&upage)
    }

    pub fn remove(&mut self, upage: usize) -> Option<PageDescriptor> {
        self.pages.remove(&upage)
    }

    /// Records that `upage` now lives in `slot`. `dirty` is the hardware
    /// dirty bit observed at eviction.
    #[must_use]
    pub fn mark_swapped(&mut self, upage: usize, slot: SwapSlot, dirty: bool) -> bool {
        let Some(page) = self.find_mut(upage) else {
            return false;
        };
        page.source = PageSource::Swapped(slot);
        page.frame = None;
        page.dirty |= dirty;
        true
    }

    #[must_use]
    pub fn mark_resident(&mut self, upage: usize, frame: Frame) -> bool {
        let Some(page) = self.find_mut(upage) else {
            return false;
        };
        if let PageSource::Swapped(_) = page.source {
            page.source = PageSource::Anonymous;
        }
        page.frame = Some(frame);
        true
    }

    /// The lowest page in `range` that has a descriptor.
    pub fn first_in(&self, range: Range<usize>) -> Option<usize> {
        self.pages.range(range).next().map(|(&upage, _)| upage)
    }

    /// Removes every descriptor, lowest address first.
    pub fn drain(&mut self) -> Vec<PageDescriptor> {
        core::mem::take(&mut self.pages).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.pages.values()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PAGE: usize = 0x0804_8000;

    #[test]
    fn duplicate_insert_keeps_original() {
        let mut spt = SupplementalPageTable::new();
        assert!(spt.insert(PageDescriptor::stack(PAGE)));
        assert!(!spt.insert(PageDescriptor::new(PAGE, false, PageSource::Anonymous)));
        assert!(matches!(spt.find(PAGE).unwrap().source, PageSource::StackZero));
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn mark_swapped_requires_descriptor() {
        let mut spt = SupplementalPageTable::new();
        let slot = crate::swapping::test_slot(8);
        assert!(!spt.mark_swapped(PAGE, slot, true));
        assert!(spt.is_empty());
    }

    #[test]
    fn swap_cycle_keeps_dirty_flag() {
        let mut spt = SupplementalPageTable::new();
        let slot = crate::swapping::test_slot(0);
        assert!(spt.insert(PageDescriptor::stack(PAGE)));
        assert!(spt.mark_resident(PAGE, Frame::new(2)));

        assert!(spt.mark_swapped(PAGE, slot, true));
        let page = spt.find(PAGE).unwrap();
        assert!(page.dirty && page.frame.is_none());
        assert!(matches!(page.source, PageSource::Swapped(s) if s == slot));

        assert!(spt.mark_resident(PAGE, Frame::new(5)));
        assert!(spt.mark_swapped(PAGE, slot, false));
        assert!(spt.mark_resident(PAGE, Frame::new(1)));
        let page = spt.find(PAGE).unwrap();
        assert!(matches!(page.source, PageSource::Anonymous));
        assert!(page.dirty);
    }

    #[test]
    fn overlap_and_drain() {
        let mut spt = SupplementalPageTable::new();
        for i in 0..3 {
            assert!(spt.insert(PageDescriptor::stack(PAGE + i * PAGE_FRAME_SIZE)));
        }
        assert_eq!(
            spt.first_in(PAGE + PAGE_FRAME_SIZE..PAGE + 9 * PAGE_FRAME_SIZE),
            Some(PAGE + PAGE_FRAME_SIZE)
        );
        assert_eq!(spt.first_in(PAGE + 3 * PAGE_FRAME_SIZE..PAGE + 9 * PAGE_FRAME_SIZE), None);

        let drained: Vec<_> = spt.drain().into_iter().map(|p| p.upage).collect();
        assert_eq!(
            drained,
            [PAGE, PAGE + PAGE_FRAME_SIZE, PAGE + 2 * PAGE_FRAME_SIZE]
        );
        assert!(spt.is_empty());
    }
}
