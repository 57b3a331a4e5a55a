//! Checked copies between kernel buffers and user memory.
//!
//! System calls never dereference user pointers directly. The whole range
//! is validated against the user/kernel split before any byte moves, and
//! each page is reached through the process's page directory, faulting it
//! in on demand exactly as a user access would.

use crate::mem::{
    address_space::AddressSpace,
    fault::{handle_fault, FaultError, PageFault},
};
use crate::system::VmSystem;
use alloc::sync::Arc;
use core::{cmp::min, fmt};
use pagewright_shared::mem::{page_offset, page_round_down, OFFSET, PAGE_FRAME_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAccessError {
    /// Part of the range lies outside user space.
    BadAddress(usize),
    Fault(FaultError),
}

impl fmt::Display for UserAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAddress(addr) => write!(f, "bad user address {addr:#x}"),
            Self::Fault(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for UserAccessError {}

impl From<FaultError> for UserAccessError {
    fn from(e: FaultError) -> Self {
        Self::Fault(e)
    }
}

/// A view of one process's user memory from the kernel.
pub struct UserMemory<'a> {
    system: &'a VmSystem,
    space: &'a Arc<AddressSpace>,
    /// The user stack pointer saved on kernel entry, for stack growth.
    esp: usize,
}

impl<'a> UserMemory<'a> {
    pub fn new(system: &'a VmSystem, space: &'a Arc<AddressSpace>, esp: usize) -> Self {
        Self { system, space, esp }
    }

    pub fn read(&self, uaddr: usize, buf: &mut [u8]) -> Result<(), UserAccessError> {
        self.walk(uaddr, buf.len(), false, |done, page| {
            buf[done..done + page.len()].copy_from_slice(page);
        })
    }

    pub fn write(&self, uaddr: usize, data: &[u8]) -> Result<(), UserAccessError> {
        self.walk(uaddr, data.len(), true, |done, page| {
            page.copy_from_slice(&data[done..done + page.len()]);
        })
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&self, uaddr: usize) -> Result<u32, UserAccessError> {
        let mut word = [0; 4];
        self.read(uaddr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Calls `copy` once per page touched by `uaddr..uaddr + len`, with the
    /// number of bytes already handled and the part of the frame to use.
    fn walk(
        &self,
        uaddr: usize,
        len: usize,
        write: bool,
        mut copy: impl FnMut(usize, &mut [u8]),
    ) -> Result<(), UserAccessError> {
        match uaddr.checked_add(len) {
            Some(end) if end <= OFFSET => {}
            _ => return Err(UserAccessError::BadAddress(uaddr)),
        }

        let mut done = 0;
        while done < len {
            let addr = uaddr + done;
            let upage = page_round_down(addr);
            let start = page_offset(addr);
            let chunk = min(len - done, PAGE_FRAME_SIZE - start);

            // Copy under the page directory lock so the frame cannot be
            // evicted between translation and access.
            let copied = {
                let mut page_dir = self.space.page_dir().lock();
                match page_dir.translate(upage, write) {
                    Some(frame) => {
                        let mut bytes = self.system.memory().frame(frame);
                        copy(done, &mut bytes[start..start + chunk]);
                        true
                    }
                    None => false,
                }
            };

            if copied {
                done += chunk;
            } else {
                let fault = PageFault {
                    addr,
                    esp: self.esp,
                    write,
                };
                handle_fault(self.system, self.space, fault)?;
            }
        }
        Ok(())
    }
}
