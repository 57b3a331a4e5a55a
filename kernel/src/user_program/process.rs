use crate::mem::{address_space::AddressSpace, spt::PageSource, vma::MmapTable};
use crate::system::VmSystem;
use crate::vfs::FileRef;
use alloc::{collections::BTreeMap, sync::Arc};
use pagewright_shared::{eprintln, println};

pub type Pid = u16;
pub type Fd = i32;

/// Descriptors 0, 1 and 2 are the console.
pub const FIRST_FILE_FD: Fd = 3;
pub const MAX_FD: Fd = 127;

/// A process's open files, by descriptor.
#[derive(Default)]
pub struct FileTable {
    files: BTreeMap<Fd, FileRef>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `file` at the lowest free descriptor. Returns `None` when
    /// every descriptor is taken.
    pub fn open(&mut self, file: FileRef) -> Option<Fd> {
        let fd = (FIRST_FILE_FD..=MAX_FD).find(|fd| !self.files.contains_key(fd))?;
        self.files.insert(fd, file);
        Some(fd)
    }

    pub fn get(&self, fd: Fd) -> Option<&FileRef> {
        self.files.get(&fd)
    }

    pub fn close(&mut self, fd: Fd) -> bool {
        self.files.remove(&fd).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn clear(&mut self) {
        self.files.clear();
    }
}

/// The per-process state the virtual memory system works with.
pub struct Process {
    pid: Pid,
    space: Arc<AddressSpace>,
    pub files: FileTable,
    pub mappings: MmapTable,
    /// Open with writes denied while the process runs.
    executable: Option<FileRef>,
    /// Saved on entry to the kernel, for stack growth during system calls.
    user_esp: usize,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            space: AddressSpace::new(pid),
            files: FileTable::new(),
            mappings: MmapTable::new(),
            executable: None,
            user_esp: 0,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub fn user_esp(&self) -> usize {
        self.user_esp
    }

    pub fn set_user_esp(&mut self, esp: usize) {
        self.user_esp = esp;
    }

    pub(super) fn set_executable(&mut self, file: FileRef) {
        debug_assert!(self.executable.is_none(), "process {} loaded twice", self.pid);
        self.executable = Some(file);
    }
}

/// Releases everything `process` holds in the virtual memory system.
///
/// Mapped files are written back first. Then every remaining page gives up
/// its frame or swap slot, the executable becomes writable again and the
/// open files are closed.
pub fn on_process_exit(system: &VmSystem, process: &mut Process) {
    let space = process.space.clone();
    process.mappings.unmap_all(system, &space);

    let (mut frames, mut slots) = (0, 0);
    {
        let mut frame_table = system.frame_table();
        let pages = space.spt().lock().drain();
        let mut page_dir = space.page_dir().lock();
        for page in pages {
            match (page.frame, page.source) {
                (Some(frame), _) => {
                    page_dir.unmap(page.upage);
                    if let Err(e) = frame_table.free_frame(frame) {
                        eprintln!("process {}: {e}", process.pid);
                    }
                    frames += 1;
                }
                (None, PageSource::Swapped(slot)) => {
                    system.swap().free_slot(slot);
                    slots += 1;
                }
                (None, _) => {}
            }
        }
        debug_assert!(page_dir.is_empty(), "process {} left pages mapped", process.pid);
    }

    if let Some(executable) = process.executable.take() {
        executable.allow_write();
    }
    process.files.clear();

    println!(
        "process {}: exited, released {frames} frames and {slots} swap slots",
        process.pid
    );
}
