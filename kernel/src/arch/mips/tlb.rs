//! Software-managed TLB
//!
//! The r3000 TLB holds `NUM_TLB` entry pairs `(entryhi, entrylo)`. The
//! kernel refills it from `vm_fault` and flushes it wholesale on address
//! space activation. Bare-metal builds bind to the cop0 accessors; hosted
//! builds keep one simulated TLB per host thread, matching the "one CPU per
//! kernel thread" model the VM code assumes.
//!
//! Callers are responsible for holding interrupts off (see [`super::spl`])
//! across any sequence of TLB operations.

use bitflags::bitflags;

/// Number of TLB entry pairs.
pub const NUM_TLB: usize = 64;

bitflags! {
    /// Bits of the `entrylo` word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryLo: u32 {
        /// Entry may be used for translation.
        const VALID = 0x0000_0200;
        /// Page is writable. (MIPS convention: "dirty" means writable.)
        const DIRTY = 0x0000_0400;
        /// Accesses bypass the cache.
        const NOCACHE = 0x0000_0800;
        /// Entry matches regardless of address space id.
        const GLOBAL = 0x0000_0100;
    }
}

/// `entryhi` value that can never match a translation: an address inside
/// the direct-mapped kernel segment, distinct per slot.
pub fn invalid_entryhi(slot: usize) -> u32 {
    0x8000_0000 + (slot as u32) * 0x1000
}

#[cfg(target_os = "none")]
extern "C" {
    fn tlb_read(entryhi: *mut u32, entrylo: *mut u32, index: u32);
    fn tlb_write(entryhi: u32, entrylo: u32, index: u32);
    fn tlb_random(entryhi: u32, entrylo: u32);
}

/// Read the entry pair at `index`.
pub fn read(index: usize) -> (u32, u32) {
    debug_assert!(index < NUM_TLB);
    #[cfg(target_os = "none")]
    {
        let mut ehi = 0u32;
        let mut elo = 0u32;
        // SAFETY: both out-pointers reference live locals; index is in range.
        unsafe { tlb_read(&mut ehi, &mut elo, index as u32) };
        (ehi, elo)
    }
    #[cfg(not(target_os = "none"))]
    {
        host::with_tlb(|tlb| tlb[index])
    }
}

/// Write the entry pair at `index`.
pub fn write(index: usize, entryhi: u32, entrylo: u32) {
    debug_assert!(index < NUM_TLB);
    #[cfg(target_os = "none")]
    // SAFETY: plain cop0 write; index is in range.
    unsafe {
        tlb_write(entryhi, entrylo, index as u32)
    };
    #[cfg(not(target_os = "none"))]
    host::with_tlb(|tlb| tlb[index] = (entryhi, entrylo));
}

/// Write the entry pair into a hardware-chosen slot.
pub fn random(entryhi: u32, entrylo: u32) {
    #[cfg(target_os = "none")]
    // SAFETY: plain cop0 write.
    unsafe {
        tlb_random(entryhi, entrylo)
    };
    #[cfg(not(target_os = "none"))]
    {
        let slot = host::next_random_slot();
        host::with_tlb(|tlb| tlb[slot] = (entryhi, entrylo));
    }
}

/// Invalidate every entry of this CPU's TLB.
pub fn invalidate_all() {
    for i in 0..NUM_TLB {
        write(i, invalid_entryhi(i), 0);
    }
}

#[cfg(not(target_os = "none"))]
mod host {
    use core::cell::{Cell, RefCell};

    use super::NUM_TLB;

    std::thread_local! {
        // One simulated TLB per host thread: each kernel thread models a CPU.
        static TLB: RefCell<[(u32, u32); NUM_TLB]> =
            const { RefCell::new([(0, 0); NUM_TLB]) };
        static RANDOM_STATE: Cell<usize> = const { Cell::new(0) };
    }

    pub(super) fn with_tlb<R>(f: impl FnOnce(&mut [(u32, u32); NUM_TLB]) -> R) -> R {
        TLB.with(|tlb| f(&mut tlb.borrow_mut()))
    }

    /// Deterministic stand-in for the hardware random register.
    pub(super) fn next_random_slot() -> usize {
        RANDOM_STATE.with(|state| {
            let s = state.get();
            state.set(s.wrapping_add(1));
            // Stride co-prime to NUM_TLB, so every slot comes up eventually.
            s.wrapping_mul(13).wrapping_add(7) % NUM_TLB
        })
    }
}
