use crate::sizes::{KB, MB};

// Page size is 4KB. This is a property of x86 processors.
pub const PAGE_FRAME_SIZE: usize = 4 * KB;

// Any virtual address at or above OFFSET is a kernel address.
pub const OFFSET: usize = 0x80000000;

/// Frames handed to user processes when no explicit configuration is given.
pub const USER_POOL_FRAMES: usize = 256;

/// The furthest the user stack may grow below [`OFFSET`].
pub const STACK_LIMIT: usize = 8 * MB;

/// How far below the stack pointer an access may land and still count as a
/// stack access. `pusha` touches 32 bytes below `esp` before moving it.
pub const STACK_SLACK: usize = 32;

#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_FRAME_SIZE - 1)
}

/// Returns `None` if rounding up would wrap past the top of the address space.
#[inline]
pub const fn page_round_up(addr: usize) -> Option<usize> {
    match addr.checked_add(PAGE_FRAME_SIZE - 1) {
        Some(v) => Some(page_round_down(v)),
        None => None,
    }
}

#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_FRAME_SIZE - 1)
}

#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < OFFSET
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0x1234), 0x1000);
        assert_eq!(page_round_down(0x2000), 0x2000);
        assert_eq!(page_round_up(0x1001), Some(0x2000));
        assert_eq!(page_round_up(0x1000), Some(0x1000));
        assert_eq!(page_round_up(usize::MAX), None);
        assert_eq!(page_offset(0x0804_80f0), 0xf0);
    }

    #[test]
    fn user_space_boundary() {
        assert!(is_user_vaddr(OFFSET - 1));
        assert!(!is_user_vaddr(OFFSET));
        assert!(is_page_aligned(OFFSET - PAGE_FRAME_SIZE));
    }
}
