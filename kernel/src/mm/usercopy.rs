//! User/kernel copy primitives
//!
//! All data crossing the user/kernel boundary moves through these
//! functions. Addresses are translated page by page through the supplied
//! address space and accessed via the direct-mapped kernel alias, so a copy
//! can never fault: a bad user pointer surfaces as `EFAULT` before any byte
//! moves through the affected page.

use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};

use super::{AddressSpace, VirtualAddress, PAGE_SIZE};

/// Copy `dst.len()` bytes from user address `src` into kernel memory.
pub fn copyin(aspace: &AddressSpace, src: VirtualAddress, dst: &mut [u8]) -> KernelResult<()> {
    let mut copied = 0usize;
    while copied < dst.len() {
        let va = src.add(copied as u32);
        let translation = aspace.translate(va)?;
        let chunk = chunk_len(va, dst.len() - copied);
        // SAFETY: translate() vouches for the frame behind this page; the
        // chunk never crosses the page boundary, and the destination is a
        // live kernel slice.
        unsafe {
            core::ptr::copy_nonoverlapping(
                translation.paddr.kvaddr() as *const u8,
                dst[copied..].as_mut_ptr(),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

/// Copy `src` out to user address `dst`.
///
/// Writing through a read-only mapping (text after load completion) is the
/// same fault a store from user mode would take.
pub fn copyout(aspace: &AddressSpace, src: &[u8], dst: VirtualAddress) -> KernelResult<()> {
    let mut copied = 0usize;
    while copied < src.len() {
        let va = dst.add(copied as u32);
        let translation = aspace.translate(va)?;
        if !translation.writable {
            return Err(KernelError::BadAddress { addr: va.0 });
        }
        let chunk = chunk_len(va, src.len() - copied);
        // SAFETY: translate() vouches for the frame and the writable check
        // above preserves the text-after-load policy; the chunk stays
        // within one page.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src[copied..].as_ptr(),
                translation.paddr.kvaddr(),
                chunk,
            );
        }
        copied += chunk;
    }
    Ok(())
}

/// Copy a NUL-terminated string in from user space, bounded by `maxlen`
/// bytes including the terminator.
///
/// Returns the string bytes without the terminator. A missing terminator
/// within the bound reports "name too long".
pub fn copyinstr(
    aspace: &AddressSpace,
    src: VirtualAddress,
    maxlen: usize,
) -> KernelResult<Vec<u8>> {
    let mut out = Vec::new();
    for i in 0..maxlen {
        let mut byte = [0u8; 1];
        copyin(aspace, src.add(i as u32), &mut byte)?;
        if byte[0] == 0 {
            return Ok(out);
        }
        out.push(byte[0]);
    }
    Err(KernelError::NameTooLong { max: maxlen })
}

/// Largest chunk starting at `va` that stays within one page.
fn chunk_len(va: VirtualAddress, remaining: usize) -> usize {
    let room = PAGE_SIZE - va.offset_in_page();
    room.min(remaining)
}
