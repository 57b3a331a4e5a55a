use crate::block::block_core::Block;
use crate::mem::{
    address_space::AddressSpace,
    frame_table::{FrameError, FrameTable},
    Frame, PhysicalMemory,
};
use crate::swapping::{SwapError, SwapSpace};
use crate::sync::mutex::{Mutex, MutexGuard};
use alloc::{boxed::Box, sync::Arc};
use once_cell::race::OnceBox;
use pagewright_shared::{
    mem::{PAGE_FRAME_SIZE, STACK_LIMIT, USER_POOL_FRAMES},
    println,
};

/// Boot-time tunables for the virtual memory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames in the user pool.
    pub user_frames: usize,
    /// Largest size, in bytes, the user stack may grow to.
    pub stack_limit: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_frames: USER_POOL_FRAMES,
            stack_limit: STACK_LIMIT,
        }
    }
}

/// The state shared by every address space: physical memory, the frame
/// table and swap.
pub struct VmSystem {
    config: VmConfig,
    memory: PhysicalMemory,
    frame_table: Mutex<FrameTable>,
    swap: SwapSpace,
}

impl VmSystem {
    pub fn new(config: VmConfig, swap_device: Block) -> Result<Self, SwapError> {
        let swap = SwapSpace::new(swap_device)?;
        println!(
            "vm: {} user frames ({} KiB), stack limit {} KiB",
            config.user_frames,
            config.user_frames * PAGE_FRAME_SIZE / 1024,
            config.stack_limit / 1024
        );
        Ok(Self {
            config,
            memory: PhysicalMemory::new(config.user_frames),
            frame_table: Mutex::new(FrameTable::new(config.user_frames)),
            swap,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn swap(&self) -> &SwapSpace {
        &self.swap
    }

    /// Locks the frame table. Take this before any address space lock.
    pub fn frame_table(&self) -> MutexGuard<'_, FrameTable> {
        self.frame_table.lock()
    }

    /// See [`FrameTable::alloc_frame`]. The frame comes back pinned.
    ///
    /// Pins only last for one fill, so while every frame is pinned this
    /// spins with the frame table unlocked until one is released.
    pub fn alloc_frame(
        &self,
        owner: &Arc<AddressSpace>,
        upage: usize,
        zero: bool,
    ) -> Result<Frame, FrameError> {
        loop {
            let result = self
                .frame_table()
                .alloc_frame(owner, upage, zero, &self.memory, &self.swap);
            match result {
                Err(FrameError::AllPinned) => core::hint::spin_loop(),
                result => return result,
            }
        }
    }

    pub fn free_frame(&self, frame: Frame) -> Result<(), FrameError> {
        self.frame_table().free_frame(frame)
    }

    pub fn unpin_frame(&self, frame: Frame) {
        self.frame_table().unpin(frame);
    }
}

static SYSTEM: OnceBox<VmSystem> = OnceBox::new();

/// Installs the system-wide [`VmSystem`]. Panics if called twice.
pub fn init_system(system: VmSystem) -> &'static VmSystem {
    if SYSTEM.set(Box::new(system)).is_err() {
        panic!("VM system initialized twice");
    }
    unwrap_system()
}

pub fn unwrap_system() -> &'static VmSystem {
    SYSTEM.get().expect("VM system not initialized.")
}

#[cfg(test)]
pub mod test {
    use super::*;
    use crate::block::block_core::{BlockSector, BlockType};
    use crate::drivers::ram_disk::RamDisk;
    use crate::swapping::SECTORS_PER_PAGE;

    /// A system with `frames` user frames and room for `swap_slots` pages of
    /// swap.
    pub fn system_with(frames: usize, swap_slots: usize) -> VmSystem {
        let sectors = BlockSector::try_from(swap_slots * SECTORS_PER_PAGE).unwrap();
        let device = Block::new("swap", BlockType::Swap, sectors, Box::new(RamDisk::new(sectors)));
        let config = VmConfig {
            user_frames: frames,
            ..VmConfig::default()
        };
        VmSystem::new(config, device).unwrap()
    }

    #[test]
    fn global_system_is_installed_once() {
        let system = init_system(system_with(2, 2));
        assert!(core::ptr::eq(system, unwrap_system()));
        assert_eq!(system.frame_table().capacity(), 2);
        assert_eq!(system.swap().capacity(), 2);
        assert_eq!(system.config().stack_limit, STACK_LIMIT);
    }
}
