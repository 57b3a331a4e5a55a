//! A software page directory for user address spaces.
//!
//! Entries use the hardware [`PageTableEntry`] layout so the accessed and
//! dirty bits behave the way the eviction code expects. Only present entries
//! are stored; an absent key is a not-present page.

// Frame numbers come from `PhysicalMemory`, which never holds more than
// 2^20 frames, so narrowing them into the 20-bit address field is lossless.
#![allow(clippy::cast_possible_truncation)]

use crate::mem::Frame;
use alloc::collections::BTreeMap;
use arbitrary_int::u20;
use pagewright_shared::{
    mem::{is_page_aligned, is_user_vaddr},
    paging::{page_number, PageTableEntry},
};

#[derive(Default)]
pub struct PageDirectory {
    entries: BTreeMap<usize, PageTableEntry>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps the user page `upage` to `frame`.
    ///
    /// Returns `false` without changing anything if `upage` is already mapped.
    #[must_use]
    pub fn map(&mut self, upage: usize, frame: Frame, writable: bool) -> bool {
        assert!(is_page_aligned(upage) && is_user_vaddr(upage));
        let vpn = page_number(upage);
        if self.entries.contains_key(&vpn) {
            return false;
        }
        let pte = PageTableEntry::user(u20::new(frame.index() as u32), writable);
        self.entries.insert(vpn, pte);
        true
    }

    /// Marks `upage` not present. Returns the frame it was mapped to.
    pub fn unmap(&mut self, upage: usize) -> Option<Frame> {
        self.entries
            .remove(&page_number(upage))
            .map(|pte| Frame::new(pte.page_frame_address().value() as usize))
    }

    pub fn lookup(&self, upage: usize) -> Option<PageTableEntry> {
        self.entries.get(&page_number(upage)).copied()
    }

    pub fn frame_of(&self, upage: usize) -> Option<Frame> {
        self.lookup(upage)
            .map(|pte| Frame::new(pte.page_frame_address().value() as usize))
    }

    pub fn is_accessed(&self, upage: usize) -> bool {
        self.lookup(upage).is_some_and(|pte| pte.accessed())
    }

    pub fn set_accessed(&mut self, upage: usize, accessed: bool) {
        if let Some(pte) = self.entries.get_mut(&page_number(upage)) {
            *pte = pte.with_accessed(accessed);
        }
    }

    pub fn is_dirty(&self, upage: usize) -> bool {
        self.lookup(upage).is_some_and(|pte| pte.dirty())
    }

    pub fn set_dirty(&mut self, upage: usize, dirty: bool) {
        if let Some(pte) = self.entries.get_mut(&page_number(upage)) {
            *pte = pte.with_dirty(dirty);
        }
    }

    /// Performs the translation the MMU does for a user access to `upage`,
    /// setting the accessed bit (and the dirty bit for writes).
    ///
    /// Returns `None` where the hardware would raise a page fault.
    pub fn translate(&mut self, upage: usize, write: bool) -> Option<Frame> {
        let pte = self.entries.get_mut(&page_number(upage))?;
        if write && !pte.read_write() {
            return None;
        }
        *pte = pte.with_accessed(true).with_dirty(pte.dirty() || write);
        Some(Frame::new(pte.page_frame_address().value() as usize))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PAGE: usize = 0x0804_8000;

    #[test]
    fn map_is_exclusive() {
        let mut pd = PageDirectory::new();
        assert!(pd.map(PAGE, Frame::new(3), false));
        assert!(!pd.map(PAGE, Frame::new(4), true));
        assert_eq!(pd.frame_of(PAGE), Some(Frame::new(3)));
        assert_eq!(pd.unmap(PAGE), Some(Frame::new(3)));
        assert_eq!(pd.unmap(PAGE), None);
        assert!(pd.is_empty());
    }

    #[test]
    fn translation_sets_hardware_bits() {
        let mut pd = PageDirectory::new();
        assert!(pd.map(PAGE, Frame::new(1), true));
        assert!(!pd.is_accessed(PAGE));

        assert_eq!(pd.translate(PAGE + 0x10, false), Some(Frame::new(1)));
        assert!(pd.is_accessed(PAGE));
        assert!(!pd.is_dirty(PAGE));

        pd.translate(PAGE, true);
        assert!(pd.is_dirty(PAGE));

        pd.set_accessed(PAGE, false);
        assert!(!pd.is_accessed(PAGE));
        assert!(pd.is_dirty(PAGE));
    }

    #[test]
    fn write_to_read_only_page_faults() {
        let mut pd = PageDirectory::new();
        assert!(pd.map(PAGE, Frame::new(1), false));
        assert_eq!(pd.translate(PAGE, true), None);
        assert!(!pd.is_accessed(PAGE));
        assert_eq!(pd.translate(PAGE + 0x1000, false), None);
    }
}
