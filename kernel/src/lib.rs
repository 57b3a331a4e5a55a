//! Demand-paged virtual memory for a small x86 teaching kernel.
//!
//! User pages are described by a per-process supplemental page table and
//! loaded on first touch from the executable, a mapped file or swap. Frames
//! for user pages come from a fixed pool. When the pool runs dry, a
//! second-chance clock picks a victim to write out to the swap device.

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
mod macros;

pub mod block;
pub mod drivers;
pub mod mem;
pub mod paging;
pub mod swapping;
pub mod sync;
pub mod system;
pub mod user_program;
pub mod vfs;
