use crate::mem::spt::SupplementalPageTable;
use crate::paging::PageDirectory;
use crate::sync::mutex::Mutex;
use crate::user_program::process::Pid;
use alloc::sync::Arc;

/// Everything eviction needs to reach in another process.
///
/// The frame table keeps only weak references to address spaces, so a
/// process that has exited never has its pages evicted.
pub struct AddressSpace {
    pid: Pid,
    page_dir: Mutex<PageDirectory>,
    spt: Mutex<SupplementalPageTable>,
}

impl AddressSpace {
    pub fn new(pid: Pid) -> Arc<Self> {
        Arc::new(Self {
            pid,
            page_dir: Mutex::new(PageDirectory::new()),
            spt: Mutex::new(SupplementalPageTable::new()),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Lock after [`Self::spt`] when both are needed.
    pub fn page_dir(&self) -> &Mutex<PageDirectory> {
        &self.page_dir
    }

    pub fn spt(&self) -> &Mutex<SupplementalPageTable> {
        &self.spt
    }
}
