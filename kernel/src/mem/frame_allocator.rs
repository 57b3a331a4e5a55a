//! The user pool's core map.
//!
//! One [`CoreMapEntry`] per frame records whether it is handed out and whether
//! the frame table has pinned it against eviction.

pub mod placement_algorithms;

use crate::mem::Frame;
use alloc::{boxed::Box, vec};
use bitbybit::bitfield;
use placement_algorithms::{NextFit, PlacementAlgorithm};

#[bitfield(u8, default = 0)]
pub struct CoreMapEntry {
    #[bit(0, rw)]
    allocated: bool,
    #[bit(1, rw)]
    pinned: bool,
}

pub struct UserPool<P: PlacementAlgorithm = NextFit> {
    core_map: Box<[CoreMapEntry]>,
    placement: P,
    frames_allocated: usize,
}

impl<P: PlacementAlgorithm> UserPool<P> {
    pub fn new(frames: usize) -> Self {
        Self {
            core_map: vec![CoreMapEntry::default(); frames].into_boxed_slice(),
            placement: P::default(),
            frames_allocated: 0,
        }
    }

    /// Hands out a free frame, or `None` when every frame is in use.
    pub fn alloc(&mut self) -> Option<Frame> {
        if self.frames_allocated == self.core_map.len() {
            return None;
        }
        let index = self.placement.place(&self.core_map)?;
        debug_assert!(!self.core_map[index].allocated());
        self.core_map[index] = CoreMapEntry::default().with_allocated(true);
        self.frames_allocated += 1;
        Some(Frame::new(index))
    }

    pub fn dealloc(&mut self, frame: Frame) {
        let entry = &mut self.core_map[frame.index()];
        assert!(entry.allocated(), "double free of {frame}");
        *entry = CoreMapEntry::default();
        self.frames_allocated -= 1;
    }

    pub fn pin(&mut self, frame: Frame) {
        let entry = &mut self.core_map[frame.index()];
        debug_assert!(entry.allocated());
        *entry = entry.with_pinned(true);
    }

    pub fn unpin(&mut self, frame: Frame) {
        let entry = &mut self.core_map[frame.index()];
        *entry = entry.with_pinned(false);
    }

    pub fn is_pinned(&self, frame: Frame) -> bool {
        self.core_map[frame.index()].pinned()
    }

    pub fn frames_allocated(&self) -> usize {
        self.frames_allocated
    }

    pub fn capacity(&self) -> usize {
        self.core_map.len()
    }
}

#[cfg(test)]
mod test {
    use super::placement_algorithms::FirstFit;
    use super::*;

    #[test]
    fn exhausts_then_recycles() {
        let mut pool = UserPool::<NextFit>::new(3);
        let frames: alloc::vec::Vec<_> = (0..3).map(|_| pool.alloc().unwrap()).collect();
        assert_eq!(pool.alloc(), None);
        assert_eq!(pool.frames_allocated(), 3);

        pool.dealloc(frames[1]);
        assert_eq!(pool.alloc(), Some(frames[1]));
    }

    #[test]
    fn dealloc_clears_pin() {
        let mut pool = UserPool::<FirstFit>::new(2);
        let frame = pool.alloc().unwrap();
        pool.pin(frame);
        assert!(pool.is_pinned(frame));
        pool.dealloc(frame);
        assert!(!pool.is_pinned(frame));
        assert_eq!(pool.frames_allocated(), 0);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut pool = UserPool::<NextFit>::new(1);
        let frame = pool.alloc().unwrap();
        pool.dealloc(frame);
        pool.dealloc(frame);
    }
}
