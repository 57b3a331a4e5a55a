pub mod address_space;
pub mod fault;
pub mod frame_allocator;
pub mod frame_table;
pub mod page_replacement;
pub mod spt;
pub mod user;
pub mod vma;

use crate::sync::mutex::{Mutex, MutexGuard};
use alloc::{boxed::Box, vec::Vec};
use core::fmt;
use pagewright_shared::mem::PAGE_FRAME_SIZE;

pub type FrameBytes = [u8; PAGE_FRAME_SIZE];

/// A physical frame in the user pool, identified by its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Frame(usize);

impl Frame {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}", self.0)
    }
}

/// The memory backing the user pool.
///
/// Each frame has its own lock so a fault filling one frame does not block
/// eviction writing another to swap.
pub struct PhysicalMemory {
    frames: Box<[Mutex<FrameBytes>]>,
}

impl PhysicalMemory {
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| Mutex::new([0; PAGE_FRAME_SIZE]))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Locks and returns the bytes of `frame`.
    ///
    /// Panics if `frame` was not handed out by this pool's allocator.
    pub fn frame(&self, frame: Frame) -> MutexGuard<'_, FrameBytes> {
        self.frames[frame.index()].lock()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
