//! The global frame table.
//!
//! Tracks which user page occupies each frame of the user pool and evicts a
//! page to swap when the pool runs dry. All of it sits behind one lock in
//! [`VmSystem`](crate::system::VmSystem); while that lock is held, eviction
//! may additionally lock the victim's page tables (supplemental table first,
//! then page directory).

use crate::mem::{
    address_space::AddressSpace,
    frame_allocator::UserPool,
    page_replacement::{
        EvictionRing, PageReplacementPolicy, Reference, ReplacementError, SecondChance,
    },
    Frame, PhysicalMemory,
};
use crate::swapping::{SwapError, SwapSpace};
use crate::user_program::process::Pid;
use alloc::{
    boxed::Box,
    sync::{Arc, Weak},
    vec,
};
use core::fmt;
use pagewright_shared::eprintln;

#[derive(Clone)]
pub struct FrameTableEntry {
    owner: Weak<AddressSpace>,
    pid: Pid,
    upage: usize,
}

impl FrameTableEntry {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn upage(&self) -> usize {
        self.upage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The pool is empty and no page is resident to evict.
    OutOfFrames,
    /// Every resident page is pinned by a fill in progress. Transient.
    AllPinned,
    /// The frame is not registered in the frame table.
    NotTracked(Frame),
    Swap(SwapError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "out of user frames"),
            Self::AllPinned => write!(f, "every user frame is pinned"),
            Self::NotTracked(frame) => write!(f, "{frame} is not in the frame table"),
            Self::Swap(e) => write!(f, "eviction failed: {e}"),
        }
    }
}

impl core::error::Error for FrameError {}

impl From<SwapError> for FrameError {
    fn from(e: SwapError) -> Self {
        Self::Swap(e)
    }
}

impl From<ReplacementError> for FrameError {
    fn from(e: ReplacementError) -> Self {
        match e {
            ReplacementError::Empty => Self::OutOfFrames,
            ReplacementError::AllPinned => Self::AllPinned,
        }
    }
}

pub struct FrameTable {
    pool: UserPool,
    entries: Box<[Option<FrameTableEntry>]>,
    ring: EvictionRing,
    policy: Box<dyn PageReplacementPolicy + Send>,
}

impl FrameTable {
    pub fn new(frames: usize) -> Self {
        Self::with_policy(frames, Box::new(SecondChance))
    }

    pub fn with_policy(frames: usize, policy: Box<dyn PageReplacementPolicy + Send>) -> Self {
        Self {
            pool: UserPool::new(frames),
            entries: vec![None; frames].into_boxed_slice(),
            ring: EvictionRing::new(frames),
            policy,
        }
    }

    /// Gets a frame for `upage` of `owner`, evicting another page if the pool
    /// is empty.
    ///
    /// The frame comes back pinned: it cannot be chosen for eviction until
    /// [`Self::unpin`] is called, which the caller does once the page is
    /// filled and mapped. Fails with [`FrameError::AllPinned`] when every
    /// resident page is mid-fill; the caller should drop the lock and retry.
    pub fn alloc_frame(
        &mut self,
        owner: &Arc<AddressSpace>,
        upage: usize,
        zero: bool,
        memory: &PhysicalMemory,
        swap: &SwapSpace,
    ) -> Result<Frame, FrameError> {
        let frame = match self.pool.alloc() {
            Some(frame) => frame,
            None => {
                self.evict(memory, swap)?;
                self.pool.alloc().ok_or(FrameError::OutOfFrames)?
            }
        };

        debug_assert!(self.entries[frame.index()].is_none());
        self.entries[frame.index()] = Some(FrameTableEntry {
            owner: Arc::downgrade(owner),
            pid: owner.pid(),
            upage,
        });
        self.ring.insert(frame);
        self.pool.pin(frame);

        if zero {
            memory.frame(frame).fill(0);
        }
        Ok(frame)
    }

    /// Unregisters `frame` and returns it to the pool.
    ///
    /// The caller must already have unmapped it.
    pub fn free_frame(&mut self, frame: Frame) -> Result<(), FrameError> {
        if self.entries[frame.index()].take().is_none() {
            eprintln!("frame table: free of untracked {frame}");
            if cfg!(debug_assertions) {
                panic!("frame table: free of untracked {frame}");
            }
            return Err(FrameError::NotTracked(frame));
        }
        self.ring.remove(frame);
        self.pool.dealloc(frame);
        Ok(())
    }

    pub fn unpin(&mut self, frame: Frame) {
        self.pool.unpin(frame);
    }

    pub fn is_pinned(&self, frame: Frame) -> bool {
        self.pool.is_pinned(frame)
    }

    pub fn entry(&self, frame: Frame) -> Option<&FrameTableEntry> {
        self.entries.get(frame.index())?.as_ref()
    }

    /// Number of frames currently holding a user page.
    pub fn resident(&self) -> usize {
        self.ring.len()
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// Moves one resident page to swap and releases its frame.
    fn evict(&mut self, memory: &PhysicalMemory, swap: &SwapSpace) -> Result<(), FrameError> {
        let pool = &self.pool;
        let entries = &self.entries;
        let victim = self.policy.select_victim(&mut self.ring, &mut |frame| {
            if pool.is_pinned(frame) {
                return Reference::Pinned;
            }
            let Some((owner, upage)) = entries[frame.index()]
                .as_ref()
                .and_then(|entry| Some((entry.owner.upgrade()?, entry.upage)))
            else {
                return Reference::Idle;
            };
            let mut page_dir = owner.page_dir().lock();
            if page_dir.is_accessed(upage) {
                page_dir.set_accessed(upage, false);
                Reference::Accessed
            } else {
                Reference::Idle
            }
        })?;

        let frame = victim.frame;
        let FrameTableEntry { owner, pid, upage } = self.entries[frame.index()]
            .clone()
            .ok_or(FrameError::NotTracked(frame))?;

        let Some(owner) = owner.upgrade() else {
            // The owner is gone without having released its frames.
            eprintln!("frame table: reclaiming {frame} from exited process {pid}");
            return self.free_frame(frame);
        };

        let mut spt = owner.spt().lock();
        let mut page_dir = owner.page_dir().lock();

        let slot = swap.alloc_slot()?;
        if let Err(e) = swap.write_out(slot, &memory.frame(frame)) {
            swap.free_slot(slot);
            return Err(e.into());
        }
        let dirty = page_dir.is_dirty(upage);
        page_dir.unmap(upage);
        drop(page_dir);

        self.free_frame(frame)?;
        let marked = spt.mark_swapped(upage, slot, dirty);
        debug_assert!(marked, "evicted page {upage:#x} of {pid} has no descriptor");

        vm_trace!(
            "evicted {upage:#x} of pid {pid} from {frame} to {slot} after {} steps",
            victim.advances
        );
        Ok(())
    }
}
