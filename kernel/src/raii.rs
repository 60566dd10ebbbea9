//! RAII wrappers for kernel resources
//!
//! Frames and multi-step operations are owned by guards so that every error
//! path, however deep, releases what it acquired. The address space layer
//! holds one [`PageGuard`] per mapped page; `execv` and `fork` use
//! [`ScopeGuard`] for their unwind steps.

use core::ptr;

use crate::arch::mips::PAGE_SIZE;
use crate::error::KernelResult;
use crate::mm::{Coremap, PhysicalAddress};

/// Owned physical frame.
///
/// Dropping the guard returns the frame to the coremap it came from.
pub struct PageGuard {
    paddr: PhysicalAddress,
    coremap: &'static Coremap,
}

impl PageGuard {
    /// Allocate a single frame from `coremap`.
    pub fn alloc(coremap: &'static Coremap) -> KernelResult<Self> {
        let paddr = coremap.get_ppages(1)?;
        Ok(Self { paddr, coremap })
    }

    /// Physical address of the frame.
    pub fn paddr(&self) -> PhysicalAddress {
        self.paddr
    }

    /// Zero the frame through its kernel-virtual alias.
    pub fn zero(&self) {
        // SAFETY: the guard owns the frame, and the direct-mapped alias of
        // an owned frame is valid for PAGE_SIZE bytes.
        unsafe { ptr::write_bytes(self.paddr.kvaddr(), 0, PAGE_SIZE) }
    }

    /// Copy a whole page from another frame into this one.
    pub fn copy_page_from(&self, src: PhysicalAddress) {
        debug_assert!(src.is_page_aligned());
        // SAFETY: both aliases cover PAGE_SIZE bytes of distinct owned
        // frames; distinct frames cannot overlap.
        unsafe { ptr::copy_nonoverlapping(src.kvaddr() as *const u8, self.paddr.kvaddr(), PAGE_SIZE) }
    }

    /// Release ownership without freeing the frame.
    pub fn leak(self) -> PhysicalAddress {
        let paddr = self.paddr;
        core::mem::forget(self);
        paddr
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.coremap.free_ppages(self.paddr);
    }
}

/// Generic scope guard that runs cleanup code on drop.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Arm a cleanup action.
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Disarm: the operation succeeded, keep its effects.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}
