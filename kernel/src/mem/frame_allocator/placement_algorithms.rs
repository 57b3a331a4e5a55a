//! Frame placement policies for the user pool.
//!
//! User pages are always allocated one frame at a time, so a policy only
//! decides where the search for a free core map entry starts.

use super::CoreMapEntry;

pub trait PlacementAlgorithm: Default {
    /// Returns the index of a free frame, or `None` if every frame is
    /// allocated.
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize>;
}

/// Resumes the search just past the previous allocation, spreading
/// allocations across the pool.
#[derive(Default)]
pub struct NextFit {
    position: usize,
}

/// Always takes the lowest free frame.
#[derive(Default)]
pub struct FirstFit;

impl PlacementAlgorithm for NextFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        let total_frames = core_map.len();
        let found = (0..total_frames)
            .map(|i| (self.position + i) % total_frames)
            .find(|&i| !core_map[i].allocated())?;
        self.position = (found + 1) % total_frames;
        Some(found)
    }
}

impl PlacementAlgorithm for FirstFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        core_map.iter().position(|entry| !entry.allocated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ops::Range;

    fn fill_coremap_range(core_map: &mut [CoreMapEntry], range: Range<usize>) {
        for entry in &mut core_map[range] {
            assert!(!entry.allocated());
            *entry = entry.with_allocated(true);
        }
    }

    #[test]
    fn test_next_fit() {
        let mut core_map = [CoreMapEntry::default(); 8];
        fill_coremap_range(&mut core_map, 1..4);
        fill_coremap_range(&mut core_map, 5..8);

        // Frames left are 0 and 4
        let mut algorithm = NextFit::default();
        assert_eq!(algorithm.place(&core_map), Some(0));
        fill_coremap_range(&mut core_map, 0..1);
        assert_eq!(algorithm.place(&core_map), Some(4));
        fill_coremap_range(&mut core_map, 4..5);
        assert_eq!(algorithm.place(&core_map), None);
    }

    #[test]
    fn test_next_fit_wrap_around() {
        let mut core_map = [CoreMapEntry::default(); 8];
        fill_coremap_range(&mut core_map, 6..8);
        let mut algorithm = NextFit { position: 6 };
        assert_eq!(algorithm.place(&core_map), Some(0));
        assert_eq!(algorithm.position, 1);
    }

    #[test]
    fn test_first_fit() {
        let mut core_map = [CoreMapEntry::default(); 8];
        fill_coremap_range(&mut core_map, 0..3);
        let mut algorithm = FirstFit;
        assert_eq!(algorithm.place(&core_map), Some(3));

        fill_coremap_range(&mut core_map, 3..8);
        assert_eq!(algorithm.place(&core_map), None);
    }

    #[test]
    fn empty_pool() {
        assert_eq!(NextFit::default().place(&[]), None);
    }
}
