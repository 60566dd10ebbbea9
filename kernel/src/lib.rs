//! Mica kernel library
//!
//! Memory management and process lifecycle for a 32-bit MIPS machine with a
//! software-refilled TLB. The library provides the coremap physical frame
//! allocator, per-process address spaces, the TLB miss handler, the process
//! table, and the lifecycle system calls (`fork`, `_exit`, `waitpid`,
//! `getpid`, `execv`).
//!
//! The trap entry/exit path, the thread scheduler, the VFS, and the ELF
//! loader live outside this crate; their contracts are declared where they
//! are consumed (`arch::mips`, `sched`, `fs`).

#![no_std]
#![cfg_attr(all(test, target_os = "none"), no_main)]

extern crate alloc;

// On bare-metal targets use the kernel heap allocator.
// On host targets (unit tests run on the build machine) delegate to the
// system allocator so test code using Vec/String/alloc compiles and runs.
#[cfg(target_os = "none")]
use linked_list_allocator::LockedHeap;

#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hand the kernel heap its backing range. Called once from early boot,
/// after the coremap bootstrap has reserved the range.
///
/// # Safety
///
/// `start..start + size` must be unused, writable memory that stays owned
/// by the allocator for the lifetime of the kernel.
#[cfg(target_os = "none")]
pub unsafe fn heap_init(start: *mut u8, size: usize) {
    // SAFETY: forwarded verbatim to the allocator; the caller guarantees
    // exclusive ownership of the range.
    unsafe { ALLOCATOR.lock().init(start, size) }
}

// Host target: use the system allocator so unit tests can allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;
#[cfg(not(target_os = "none"))]
#[global_allocator]
static SYSTEM_ALLOCATOR: std::alloc::System = std::alloc::System;

pub mod arch;
pub mod error;
pub mod fs;
pub mod mm;
pub mod process;
pub mod raii;
pub mod sched;
pub mod sync;
pub mod syscall;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export the types almost every consumer needs.
pub use error::{KernelError, KernelResult};
pub use mm::{PhysicalAddress, VirtualAddress, PAGE_SIZE};
