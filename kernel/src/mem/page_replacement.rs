//! Victim selection for the frame table.
//!
//! Every frame holding a user page sits on an [`EvictionRing`]. A
//! [`PageReplacementPolicy`] walks the ring and asks the frame table about
//! each entry through a probe callback, so policies never touch page
//! directories themselves.

use crate::mem::Frame;
use alloc::{boxed::Box, vec};
use core::fmt;

#[derive(Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

/// A circular list of frames with a clock hand.
///
/// Links live in an arena indexed by frame number, so insertion and removal
/// are constant time and need no allocation.
pub struct EvictionRing {
    links: Box<[Option<Link>]>,
    hand: Option<usize>,
    len: usize,
}

impl EvictionRing {
    pub fn new(frames: usize) -> Self {
        Self {
            links: vec![None; frames].into_boxed_slice(),
            hand: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, frame: Frame) -> bool {
        self.links[frame.index()].is_some()
    }

    /// The frame the hand points at.
    pub fn hand(&self) -> Option<Frame> {
        self.hand.map(Frame::new)
    }

    /// Adds `frame` just behind the hand, so it is the last entry the hand
    /// reaches.
    pub fn insert(&mut self, frame: Frame) {
        let new = frame.index();
        assert!(self.links[new].is_none(), "{frame} is already on the ring");

        match self.hand {
            None => {
                self.links[new] = Some(Link {
                    prev: new,
                    next: new,
                });
                self.hand = Some(new);
            }
            Some(hand) => {
                let prev = self.link(hand).prev;
                self.links[new] = Some(Link { prev, next: hand });
                self.link_mut(prev).next = new;
                self.link_mut(hand).prev = new;
            }
        }
        self.len += 1;
    }

    /// Unlinks `frame`. If the hand pointed at it, the hand moves on to the
    /// next entry. Returns `false` if `frame` was not on the ring.
    pub fn remove(&mut self, frame: Frame) -> bool {
        let old = frame.index();
        let Some(Link { prev, next }) = self.links[old].take() else {
            return false;
        };
        self.len -= 1;

        if next == old {
            self.hand = None;
            return true;
        }
        self.link_mut(prev).next = next;
        self.link_mut(next).prev = prev;
        if self.hand == Some(old) {
            self.hand = Some(next);
        }
        true
    }

    /// Returns the frame under the hand and moves the hand one step.
    pub fn advance(&mut self) -> Option<Frame> {
        let hand = self.hand?;
        self.hand = Some(self.link(hand).next);
        Some(Frame::new(hand))
    }

    fn link(&self, index: usize) -> &Link {
        self.links[index]
            .as_ref()
            .unwrap_or_else(|| unreachable!("eviction ring links to frame {index}, which is not on it"))
    }

    fn link_mut(&mut self, index: usize) -> &mut Link {
        self.links[index]
            .as_mut()
            .unwrap_or_else(|| unreachable!("eviction ring links to frame {index}, which is not on it"))
    }
}

/// What the frame table reports about a ring entry when the hand passes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Being filled or written back; never a victim.
    Pinned,
    /// Referenced since the hand last passed. The probe has cleared the
    /// accessed bit.
    Accessed,
    /// Not referenced since the hand last passed.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Victim {
    pub frame: Frame,
    /// How many entries the hand examined, the victim included.
    pub advances: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementError {
    Empty,
    AllPinned,
}

impl fmt::Display for ReplacementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no frames to evict"),
            Self::AllPinned => write!(f, "every frame is pinned"),
        }
    }
}

pub trait PageReplacementPolicy {
    fn select_victim(
        &mut self,
        ring: &mut EvictionRing,
        probe: &mut dyn FnMut(Frame) -> Reference,
    ) -> Result<Victim, ReplacementError>;
}

/// The clock algorithm.
///
/// With `N` unpinned entries the hand finds a victim within `2N` steps:
/// the first lap clears every accessed bit it meets. Should other CPUs keep
/// re-referencing pages so that two laps find nothing, a third lap takes the
/// first unpinned entry regardless of its accessed bit.
#[derive(Default)]
pub struct SecondChance;

impl PageReplacementPolicy for SecondChance {
    fn select_victim(
        &mut self,
        ring: &mut EvictionRing,
        probe: &mut dyn FnMut(Frame) -> Reference,
    ) -> Result<Victim, ReplacementError> {
        let n = ring.len();
        if n == 0 {
            return Err(ReplacementError::Empty);
        }

        for advances in 1..=2 * n {
            let frame = ring.advance().ok_or(ReplacementError::Empty)?;
            if probe(frame) == Reference::Idle {
                return Ok(Victim { frame, advances });
            }
        }

        for extra in 1..=n {
            let frame = ring.advance().ok_or(ReplacementError::Empty)?;
            if probe(frame) != Reference::Pinned {
                return Ok(Victim {
                    frame,
                    advances: 2 * n + extra,
                });
            }
        }

        Err(ReplacementError::AllPinned)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::{vec, vec::Vec};

    fn ring_of(frames: &[usize]) -> EvictionRing {
        let mut ring = EvictionRing::new(16);
        for &f in frames {
            ring.insert(Frame::new(f));
        }
        ring
    }

    fn walk(ring: &mut EvictionRing) -> Vec<usize> {
        (0..ring.len())
            .map(|_| ring.advance().unwrap().index())
            .collect()
    }

    #[test]
    fn insert_goes_behind_hand() {
        let mut ring = ring_of(&[3, 5, 7]);
        assert_eq!(ring.hand(), Some(Frame::new(3)));
        ring.advance();
        ring.insert(Frame::new(9));
        // Hand is on 5, so 9 lands between 3 and 5 and is reached last.
        assert_eq!(walk(&mut ring), vec![5, 7, 3, 9]);
    }

    #[test]
    fn removing_hand_moves_it_forward() {
        let mut ring = ring_of(&[1, 2, 3]);
        assert!(ring.remove(Frame::new(1)));
        assert_eq!(ring.hand(), Some(Frame::new(2)));
        assert!(!ring.remove(Frame::new(1)));
        assert!(ring.remove(Frame::new(3)));
        assert!(ring.remove(Frame::new(2)));
        assert!(ring.is_empty());
        assert_eq!(ring.hand(), None);
        assert_eq!(ring.advance(), None);
    }

    #[test]
    fn single_idle_frame_chosen_on_first_advance() {
        let mut ring = ring_of(&[4]);
        let victim = SecondChance
            .select_victim(&mut ring, &mut |_| Reference::Idle)
            .unwrap();
        assert_eq!(
            victim,
            Victim {
                frame: Frame::new(4),
                advances: 1
            }
        );
    }

    #[test]
    fn all_accessed_costs_one_extra_step() {
        let frames = [0, 1, 2, 3, 4];
        let mut ring = ring_of(&frames);
        let mut accessed = [true; 5];
        let victim = SecondChance
            .select_victim(&mut ring, &mut |f| {
                if core::mem::replace(&mut accessed[f.index()], false) {
                    Reference::Accessed
                } else {
                    Reference::Idle
                }
            })
            .unwrap();
        assert_eq!(victim.frame, Frame::new(0));
        assert_eq!(victim.advances, frames.len() + 1);
        assert!(accessed.iter().all(|&a| !a));
    }

    #[test]
    fn pinned_frames_are_skipped() {
        let mut ring = ring_of(&[0, 1, 2]);
        let victim = SecondChance
            .select_victim(&mut ring, &mut |f| {
                if f.index() < 2 {
                    Reference::Pinned
                } else {
                    Reference::Idle
                }
            })
            .unwrap();
        assert_eq!(victim.frame, Frame::new(2));
        assert_eq!(victim.advances, 3);
    }

    #[test]
    fn rereferenced_frames_fall_back_to_first_unpinned() {
        let mut ring = ring_of(&[0, 1]);
        let victim = SecondChance
            .select_victim(&mut ring, &mut |f| {
                if f.index() == 0 {
                    Reference::Pinned
                } else {
                    Reference::Accessed
                }
            })
            .unwrap();
        assert_eq!(victim.frame, Frame::new(1));
        assert_eq!(victim.advances, 6);
    }

    #[test]
    fn empty_and_all_pinned_rings() {
        let mut ring = ring_of(&[]);
        assert_eq!(
            SecondChance.select_victim(&mut ring, &mut |_| Reference::Idle),
            Err(ReplacementError::Empty)
        );
        let mut ring = ring_of(&[1, 2]);
        assert_eq!(
            SecondChance.select_victim(&mut ring, &mut |_| Reference::Pinned),
            Err(ReplacementError::AllPinned)
        );
    }
}
