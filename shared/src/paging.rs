// https://wiki.osdev.org/Paging

use crate::mem::PAGE_FRAME_SIZE;
use arbitrary_int::u20;
use bitbybit::bitfield;

/// An x86 page table entry.
///
/// Only the bits the virtual memory code inspects are named. `accessed` and
/// `dirty` are set by the MMU and cleared by software.
#[bitfield(u32, default = 0)]
pub struct PageTableEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    read_write: bool,
    #[bit(2, rw)]
    user_supervisor: bool,
    #[bit(5, rw)]
    accessed: bool,
    #[bit(6, rw)]
    dirty: bool,
    #[bits(12..=31, rw)]
    page_frame_address: u20,
}

impl PageTableEntry {
    /// A present, user-accessible entry pointing at frame number `frame`.
    pub fn user(frame: u20, writable: bool) -> Self {
        Self::default()
            .with_present(true)
            .with_user_supervisor(true)
            .with_read_write(writable)
            .with_page_frame_address(frame)
    }
}

/// Index of the page containing `addr`.
#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr / PAGE_FRAME_SIZE
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn user_entry_bits() {
        let entry = PageTableEntry::user(u20::new(0x12345), true);
        assert_eq!(entry.raw_value(), 0x1234_5007);
        assert!(entry.present());
        assert!(!entry.accessed());

        let touched = entry.with_accessed(true).with_dirty(true);
        assert_eq!(touched.raw_value(), 0x1234_5067);
        assert_eq!(touched.page_frame_address().value(), 0x12345);
    }

    #[test]
    fn read_only_entry() {
        let entry = PageTableEntry::user(u20::new(1), false);
        assert!(!entry.read_write());
        assert!(entry.user_supervisor());
    }
}
