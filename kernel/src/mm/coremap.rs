//! Coremap physical frame allocator
//!
//! One slot per managed frame, run-length encoded in place: `0` marks a
//! free frame, and an allocated run of `n` frames starting at slot `s`
//! carries `1, 2, …, n` in slots `s..s + n`. The run boundaries are thus
//! recoverable from the slots alone, which is what lets `free_ppages` take
//! only the address of the first frame.
//!
//! A single spinlock covers each whole scan-and-mark (or clear), so the
//! allocator never sleeps and is safe from interrupt-free contexts.

use alloc::boxed::Box;
use alloc::vec;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use super::{PhysicalAddress, PAGE_SIZE};

/// Bytes of bookkeeping per admitted frame: the frame itself plus one
/// 32-bit slot.
const BYTES_PER_FRAME: usize = PAGE_SIZE + 4;

/// Allocation state of every usable physical frame.
pub struct Coremap {
    slots: Mutex<Box<[u32]>>,
    frame_start: PhysicalAddress,
    frame_end: PhysicalAddress,
}

impl Coremap {
    /// Build a coremap over the physical range `lo..hi`.
    ///
    /// The slot table is budgeted out of the range first (one slot per
    /// admitted frame), and the first managed frame is rounded up to the
    /// next page boundary past it.
    pub fn new(lo: PhysicalAddress, hi: PhysicalAddress) -> Self {
        let span = (hi.0 - lo.0) as usize;
        let admitted = span / BYTES_PER_FRAME;
        let table_end = lo.0 + (admitted * 4) as u32;
        let frame_start = match table_end % PAGE_SIZE as u32 {
            0 => table_end,
            rem => table_end + (PAGE_SIZE as u32 - rem),
        };
        let nframes = ((hi.0 - frame_start) as usize) / PAGE_SIZE;
        let frame_end = frame_start + (nframes * PAGE_SIZE) as u32;
        Self {
            slots: Mutex::new(vec![0u32; nframes].into_boxed_slice()),
            frame_start: PhysicalAddress(frame_start),
            frame_end: PhysicalAddress(frame_end),
        }
    }

    /// First managed physical address.
    pub fn frame_start(&self) -> PhysicalAddress {
        self.frame_start
    }

    /// One past the last managed physical address.
    pub fn frame_end(&self) -> PhysicalAddress {
        self.frame_end
    }

    /// Number of managed frames.
    pub fn frame_count(&self) -> usize {
        ((self.frame_end.0 - self.frame_start.0) as usize) / PAGE_SIZE
    }

    /// Whether `paddr` lies inside the managed range.
    pub fn contains(&self, paddr: PhysicalAddress) -> bool {
        paddr >= self.frame_start && paddr < self.frame_end
    }

    /// Allocate `npages` contiguous frames, first fit from the bottom.
    ///
    /// Returns the physical address of the first frame.
    pub fn get_ppages(&self, npages: usize) -> KernelResult<PhysicalAddress> {
        if npages == 0 {
            return Err(KernelError::InvalidArgument { name: "npages" });
        }
        let mut slots = self.slots.lock();
        let total = slots.len();
        if npages > total {
            return Err(KernelError::OutOfMemory {
                requested_pages: npages,
            });
        }

        let mut start = 0usize;
        'candidate: while start + npages <= total {
            for offset in 0..npages {
                if slots[start + offset] != 0 {
                    // Restart just past the occupied slot.
                    start += offset + 1;
                    continue 'candidate;
                }
            }
            for (k, slot) in slots[start..start + npages].iter_mut().enumerate() {
                *slot = k as u32 + 1;
            }
            return Ok(self.paddr_of_slot(start));
        }

        Err(KernelError::OutOfMemory {
            requested_pages: npages,
        })
    }

    /// Free the run whose first frame is at `first`.
    ///
    /// The run length is recovered from the slot encoding: clearing stops
    /// at the first slot that does not continue the `1, 2, 3, …` sequence.
    /// Freeing an address that is not the head of a run is a detectable
    /// caller bug and frees nothing.
    pub fn free_ppages(&self, first: PhysicalAddress) {
        if !self.contains(first) || !first.is_page_aligned() {
            log::warn!("coremap: free of unmanaged address {:#x}", first.0);
            return;
        }
        let start = self.slot_of_paddr(first);
        let mut slots = self.slots.lock();
        if slots[start] != 1 {
            log::warn!(
                "coremap: free of non-head frame {:#x} (slot value {})",
                first.0,
                slots[start]
            );
            return;
        }
        let mut expected = 1u32;
        for slot in slots[start..].iter_mut() {
            if *slot != expected {
                break;
            }
            *slot = 0;
            expected += 1;
        }
    }

    /// Number of currently free frames.
    pub fn free_count(&self) -> usize {
        self.slots.lock().iter().filter(|&&s| s == 0).count()
    }

    fn paddr_of_slot(&self, slot: usize) -> PhysicalAddress {
        PhysicalAddress(self.frame_start.0 + (slot * PAGE_SIZE) as u32)
    }

    fn slot_of_paddr(&self, paddr: PhysicalAddress) -> usize {
        ((paddr.0 - self.frame_start.0) as usize) / PAGE_SIZE
    }

    /// Snapshot of the slot table, for invariant checks in tests.
    #[cfg(test)]
    pub(crate) fn slot_snapshot(&self) -> alloc::vec::Vec<u32> {
        self.slots.lock().to_vec()
    }
}
