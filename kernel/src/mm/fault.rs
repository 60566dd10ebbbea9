//! TLB miss handling
//!
//! The MMU raises a fault whenever a user translation is missing or
//! forbidden; [`vm_fault`] resolves the address through the current
//! process's address space and installs the entry. The trap dispatcher
//! owns the conversion of the returned error into a user-visible signal or
//! a kernel panic.

use crate::arch::mips::{spl, tlb};
use crate::error::{KernelError, KernelResult};
use crate::process;

use super::{VirtualAddress, PAGE_FRAME};

/// Classified fault cause, as reported by the MMU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Missing translation on a load.
    Read,
    /// Missing translation on a store.
    Write,
    /// Store through a translation whose dirty (writable) bit is clear.
    ReadOnly,
}

impl FaultKind {
    /// Decode the fault code delivered by the trap path.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Read),
            1 => Some(Self::Write),
            2 => Some(Self::ReadOnly),
            _ => None,
        }
    }
}

/// Raw entry point for the trap dispatcher: decode, then handle.
pub fn handle_fault(code: u32, faultaddress: u32) -> KernelResult<()> {
    let kind = FaultKind::from_code(code).ok_or(KernelError::InvalidArgument {
        name: "faulttype",
    })?;
    vm_fault(kind, VirtualAddress(faultaddress))
}

/// Service a TLB miss at `faultaddress`.
///
/// Write faults to read-only text are rejected; the remaining kinds are
/// resolved through the current address space and answered by writing one
/// TLB entry (an invalid slot if one exists, a random slot otherwise).
pub fn vm_fault(kind: FaultKind, faultaddress: VirtualAddress) -> KernelResult<()> {
    let fault_page = faultaddress.page_base();
    log::debug!("vm: fault {:?} at {:#x}", kind, faultaddress.0);

    if let FaultKind::ReadOnly = kind {
        // Tells the trap path to kill the offending process; getting here
        // for a text page before load completion would be a kernel bug, as
        // those entries are installed writable.
        return Err(KernelError::ReadOnlyViolation {
            addr: faultaddress.0,
        });
    }

    // A fault with no process or no address space is a stray kernel access
    // early in boot; report "bad address" so the dispatcher panics rather
    // than re-faulting forever.
    let proc = process::current().ok_or(KernelError::BadAddress {
        addr: faultaddress.0,
    })?;
    let guard = proc.aspace.lock();
    let aspace = guard.as_ref().ok_or(KernelError::BadAddress {
        addr: faultaddress.0,
    })?;

    let translation = aspace.translate(fault_page)?;
    debug_assert!(translation.paddr.is_page_aligned());

    let mut entrylo = translation.paddr.0 | tlb::EntryLo::VALID.bits() | tlb::EntryLo::DIRTY.bits();
    if !translation.writable {
        entrylo &= !tlb::EntryLo::DIRTY.bits();
    }
    debug_assert_eq!(fault_page.0 & !PAGE_FRAME, 0);

    let _spl = spl::raise();
    for slot in 0..tlb::NUM_TLB {
        let (_, elo) = tlb::read(slot);
        if elo & tlb::EntryLo::VALID.bits() != 0 {
            continue;
        }
        log::debug!("vm: {:#x} -> {:#x} (slot {})", fault_page.0, translation.paddr.0, slot);
        tlb::write(slot, fault_page.0, entrylo);
        return Ok(());
    }

    // Every slot is valid: evict a random one.
    log::debug!("vm: {:#x} -> {:#x} (random)", fault_page.0, translation.paddr.0);
    tlb::random(fault_page.0, entrylo);
    Ok(())
}

/// TLB shootdown request from another CPU.
///
/// This VM runs a single CPU; a shootdown arriving at all means the
/// configuration is wrong, and continuing would silently skew translations.
pub fn tlb_shootdown_all() -> ! {
    panic!("vm: tlb shootdown requested on a single-cpu vm");
}

/// Targeted TLB shootdown request. See [`tlb_shootdown_all`].
pub fn tlb_shootdown() -> ! {
    panic!("vm: tlb shootdown requested on a single-cpu vm");
}
