//! The memory system calls and the page fault entry point.
//!
//! Failures here are user errors: the system calls answer `-1` and leave
//! the caller running. A fault that cannot be resolved is fatal, and the
//! caller is expected to terminate the process.

use super::process::{Fd, Process};
use crate::mem::{
    fault::{handle_fault, FaultError, PageFault},
    vma::{MapId, MmapError},
    Frame,
};
use crate::system::VmSystem;
use pagewright_shared::eprintln;

/// Descriptors below this are the console and cannot be mapped.
const STD_STREAMS: Fd = 3;

fn mmap(process: &mut Process, fd: Fd, addr: usize) -> Result<MapId, MmapError> {
    if (0..STD_STREAMS).contains(&fd) {
        return Err(MmapError::StdStream(fd));
    }
    let file = process.files.get(fd).ok_or(MmapError::BadFd(fd))?.clone();
    let space = process.space().clone();
    process.mappings.mmap(&space, file, addr)
}

/// Maps the whole file open as `fd` at `addr`. Returns the new mapping's
/// id, or `-1`.
pub fn sys_mmap(process: &mut Process, fd: Fd, addr: usize) -> MapId {
    match mmap(process, fd, addr) {
        Ok(id) => {
            vm_trace!("pid {}: mmap fd {fd} at {addr:#x} -> {id}", process.pid());
            id
        }
        Err(e) => {
            vm_trace!("pid {}: mmap fd {fd} at {addr:#x} failed: {e}", process.pid());
            -1
        }
    }
}

/// Writes back and removes mapping `id`. Unknown ids are ignored.
pub fn sys_munmap(system: &VmSystem, process: &mut Process, id: MapId) {
    let space = process.space().clone();
    if !process.mappings.munmap(system, &space, id) {
        vm_trace!("pid {}: munmap of unknown mapping {id}", process.pid());
    }
}

/// Handles a user page fault in `process`. On error the process must be
/// terminated.
pub fn handle_page_fault(
    system: &VmSystem,
    process: &Process,
    fault: PageFault,
) -> Result<Frame, FaultError> {
    handle_fault(system, process.space(), fault).inspect_err(|e| {
        eprintln!(
            "process {}: page fault at {:#x} ({}): {e}",
            process.pid(),
            fault.addr,
            if fault.write { "write" } else { "read" }
        );
    })
}
