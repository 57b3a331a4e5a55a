//! Page fault resolution.

use crate::mem::{
    address_space::AddressSpace,
    frame_table::FrameError,
    spt::{PageDescriptor, PageSource},
    Frame,
};
use crate::swapping::SwapError;
use crate::system::{VmConfig, VmSystem};
use crate::vfs;
use alloc::sync::Arc;
use core::fmt;
use pagewright_shared::mem::{is_user_vaddr, page_round_down, OFFSET, STACK_SLACK};

/// What the CPU reports about a fault in user space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// The faulting address (`cr2`).
    pub addr: usize,
    /// The user stack pointer at the time of the fault.
    pub esp: usize,
    pub write: bool,
}

/// Every variant is fatal to the faulting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    KernelAddress(usize),
    /// No descriptor, and not a plausible stack access.
    NotManaged(usize),
    ReadOnly(usize),
    /// The file ended before the bytes the descriptor promised.
    ShortRead { upage: usize, expected: usize, read: usize },
    Frame(FrameError),
    Swap(SwapError),
    File(vfs::Error),
}

impl fmt::Display for FaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelAddress(addr) => write!(f, "user access to kernel address {addr:#x}"),
            Self::NotManaged(addr) => write!(f, "no page at {addr:#x}"),
            Self::ReadOnly(addr) => write!(f, "write to read-only page at {addr:#x}"),
            Self::ShortRead {
                upage,
                expected,
                read,
            } => write!(
                f,
                "page {upage:#x}: file gave {read} of {expected} bytes"
            ),
            Self::Frame(e) => write!(f, "{e}"),
            Self::Swap(e) => write!(f, "{e}"),
            Self::File(e) => write!(f, "file read failed: {e}"),
        }
    }
}

impl core::error::Error for FaultError {}

impl From<FrameError> for FaultError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<SwapError> for FaultError {
    fn from(e: SwapError) -> Self {
        Self::Swap(e)
    }
}

impl From<vfs::Error> for FaultError {
    fn from(e: vfs::Error) -> Self {
        Self::File(e)
    }
}

/// Makes `upage` resident according to its descriptor and maps it.
///
/// No address space lock is held while the frame table is locked, or while
/// the frame is filled. The frame stays pinned until it is mapped, so
/// eviction cannot take it half-filled.
pub fn resolve(
    system: &VmSystem,
    space: &Arc<AddressSpace>,
    upage: usize,
) -> Result<Frame, FaultError> {
    let (source, writable) = {
        let spt = space.spt().lock();
        let page = spt.find(upage).ok_or(FaultError::NotManaged(upage))?;
        if let Some(frame) = page.frame {
            return Ok(frame);
        }
        (page.source.clone(), page.writable)
    };

    let zero = matches!(source, PageSource::StackZero);
    let frame = system.alloc_frame(space, upage, zero)?;

    if let Err(e) = fill(system, frame, upage, &source) {
        // The frame was never mapped, so releasing it is all the cleanup.
        let _ = system.free_frame(frame);
        return Err(e);
    }

    {
        let mut spt = space.spt().lock();
        let mut page_dir = space.page_dir().lock();
        // The descriptor can only vanish if the process tore down its own
        // mapping mid-fault; the page directory entry should never exist.
        let installed = spt.find(upage).is_some() && page_dir.map(upage, frame, writable);
        if installed {
            let marked = spt.mark_resident(upage, frame);
            debug_assert!(marked);
        } else {
            drop(page_dir);
            drop(spt);
            let _ = system.free_frame(frame);
            return Err(FaultError::NotManaged(upage));
        }
    }
    system.unpin_frame(frame);

    vm_trace!(
        "pid {} loaded {upage:#x} into {frame} from {source:?}",
        space.pid()
    );
    Ok(frame)
}

fn fill(
    system: &VmSystem,
    frame: Frame,
    upage: usize,
    source: &PageSource,
) -> Result<(), FaultError> {
    match source {
        // Already zeroed by the frame table.
        PageSource::StackZero => Ok(()),
        PageSource::FileBacked(segment) => {
            let mut bytes = system.memory().frame(frame);
            let (head, tail) = bytes.split_at_mut(segment.read_bytes);
            let read = segment.file.read_at(segment.offset, head)?;
            if read != segment.read_bytes {
                return Err(FaultError::ShortRead {
                    upage,
                    expected: segment.read_bytes,
                    read,
                });
            }
            tail.fill(0);
            Ok(())
        }
        PageSource::Swapped(slot) => {
            let mut bytes = system.memory().frame(frame);
            system.swap().read_in(*slot, &mut bytes)?;
            Ok(())
        }
        PageSource::Anonymous => {
            panic!("page {upage:#x} is anonymous but not resident")
        }
    }
}

fn is_stack_access(config: &VmConfig, fault: &PageFault) -> bool {
    fault.addr >= fault.esp.saturating_sub(STACK_SLACK)
        && fault.addr >= OFFSET.saturating_sub(config.stack_limit)
}

/// Handles a page fault raised by user code in `space`.
///
/// Returns the frame now backing the faulting page. On error the caller
/// terminates the process.
pub fn handle_fault(
    system: &VmSystem,
    space: &Arc<AddressSpace>,
    fault: PageFault,
) -> Result<Frame, FaultError> {
    if !is_user_vaddr(fault.addr) {
        return Err(FaultError::KernelAddress(fault.addr));
    }
    let upage = page_round_down(fault.addr);

    let writable = space.spt().lock().find(upage).map(|page| page.writable);
    match writable {
        Some(false) if fault.write => Err(FaultError::ReadOnly(fault.addr)),
        Some(_) => resolve(system, space, upage),
        None if is_stack_access(system.config(), &fault) => {
            // A concurrent fault on the same page may have won the insert.
            let _ = space.spt().lock().insert(PageDescriptor::stack(upage));
            vm_trace!("pid {} grew its stack to {upage:#x}", space.pid());
            resolve(system, space, upage)
        }
        None => Err(FaultError::NotManaged(fault.addr)),
    }
}
