use alloc::{vec, vec::Vec};

const BITS: usize = u64::BITS as usize;

/// A free-sector bitmap. A set bit is an allocated sector.
pub struct SectorMap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl SectorMap {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(BITS)],
            len,
            used: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn test(&self, index: usize) -> bool {
        self.words[index / BITS] & (1 << (index % BITS)) != 0
    }

    fn set(&mut self, index: usize, value: bool) {
        let word = &mut self.words[index / BITS];
        let mask = 1 << (index % BITS);
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// True if every bit in `start..start + count` equals `value`.
    pub fn all(&self, start: usize, count: usize, value: bool) -> bool {
        start + count <= self.len && (start..start + count).all(|i| self.test(i) == value)
    }

    pub fn set_range(&mut self, start: usize, count: usize, value: bool) {
        debug_assert!(self.all(start, count, !value));
        for i in start..start + count {
            self.set(i, value);
        }
        if value {
            self.used += count;
        } else {
            self.used -= count;
        }
    }

    /// Finds the first run of `count` clear bits, sets them and returns the
    /// index of the first.
    pub fn scan_and_set(&mut self, count: usize) -> Option<usize> {
        let mut start = 0;
        while start + count <= self.len {
            match (start..start + count).find(|&i| self.test(i)) {
                // Restart just past the first set bit in the window.
                Some(taken) => start = taken + 1,
                None => {
                    self.set_range(start, count, true);
                    return Some(start);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_fit_runs() {
        let mut map = SectorMap::new(24);
        assert_eq!(map.scan_and_set(8), Some(0));
        assert_eq!(map.scan_and_set(8), Some(8));
        map.set_range(0, 8, false);
        map.set_range(4, 1, true);
        // 0..4 is too short, 5..13 collides with the second run
        assert_eq!(map.scan_and_set(8), Some(16));
        assert_eq!(map.scan_and_set(8), None);
        assert_eq!(map.used(), 17);
    }

    #[test]
    fn crosses_word_boundaries() {
        let mut map = SectorMap::new(130);
        map.set_range(0, 60, true);
        assert_eq!(map.scan_and_set(8), Some(60));
        assert!(map.all(60, 8, true));
        assert!(map.all(68, 62, false));
        assert!(!map.all(125, 8, false));
    }
}
