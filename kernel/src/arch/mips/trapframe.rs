//! Trap frame layout
//!
//! Register image saved by the (external) trap entry code on every
//! user-to-kernel crossing. The layout mirrors what the assembly stubs
//! push; the lifecycle syscalls only ever touch `v0`/`v1` (return values),
//! `a0`-`a3` (arguments and error flag), and `epc`.

/// Saved register file at trap time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trapframe {
    /// Coprocessor 0 vaddr register (faulting address, if any).
    pub vaddr: u32,
    /// Coprocessor 0 status register.
    pub status: u32,
    /// Coprocessor 0 cause register.
    pub cause: u32,
    pub lo: u32,
    pub hi: u32,
    pub ra: u32,
    pub at: u32,
    pub v0: u32,
    pub v1: u32,
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub t0: u32,
    pub t1: u32,
    pub t2: u32,
    pub t3: u32,
    pub t4: u32,
    pub t5: u32,
    pub t6: u32,
    pub t7: u32,
    pub s0: u32,
    pub s1: u32,
    pub s2: u32,
    pub s3: u32,
    pub s4: u32,
    pub s5: u32,
    pub s6: u32,
    pub s7: u32,
    pub t8: u32,
    pub t9: u32,
    pub gp: u32,
    pub sp: u32,
    pub s8: u32,
    /// Program counter to resume at.
    pub epc: u32,
}
