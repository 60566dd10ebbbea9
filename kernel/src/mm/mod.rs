//! Memory management
//!
//! The VM layer of the kernel: the coremap physical frame allocator, the
//! per-process address space representation, the TLB refill handler, and
//! the user/kernel copy primitives.
//!
//! Bootstrap order matters. Before [`bootstrap`] runs, page allocation
//! falls back to stealing permanent pages from the RAM controller; after
//! it, every allocation goes through the coremap singleton.

pub mod addrspace;
pub mod coremap;
pub mod fault;
pub mod usercopy;

use spin::{Mutex, Once};

use crate::arch::mips::{self, ram};
use crate::error::KernelResult;

pub use crate::arch::mips::{PAGE_FRAME, PAGE_SIZE, USERSTACK};
pub use addrspace::{AddressSpace, RegionFlags, STACK_PAGES};
pub use coremap::Coremap;
pub use fault::{vm_fault, FaultKind};

/// Physical memory address.
///
/// Address 0 is never handed out, so it can serve as the "no frame" value
/// in raw interfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 & !PAGE_FRAME == 0
    }

    /// Kernel-virtual alias through the direct-mapped segment.
    pub fn kvaddr(&self) -> *mut u8 {
        mips::paddr_to_kvaddr(*self)
    }
}

/// User-space virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u32);

impl VirtualAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Base address of the page containing this address.
    pub const fn page_base(&self) -> Self {
        Self(self.0 & PAGE_FRAME)
    }

    pub const fn offset_in_page(&self) -> usize {
        (self.0 & !PAGE_FRAME) as usize
    }

    pub const fn add(&self, offset: u32) -> Self {
        Self(self.0 + offset)
    }
}

// ---------------------------------------------------------------------------
// Boot-time singletons
// ---------------------------------------------------------------------------

/// The system coremap, published exactly once by [`bootstrap`].
static COREMAP: Once<Coremap> = Once::new();

/// Serializes the pre-bootstrap `stealmem` fallback.
static STEALMEM_LOCK: Mutex<()> = Mutex::new(());

/// VM bootstrap: consume the RAM layout and build the coremap.
///
/// Idempotent; the first caller wins. Every page allocated before this call
/// is permanent.
pub fn bootstrap() {
    COREMAP.call_once(|| {
        let (lo, hi) = ram::getsize();
        let map = Coremap::new(lo, hi);
        log::info!(
            "vm: coremap manages {} frames at {:#x}..{:#x}",
            map.frame_count(),
            map.frame_start().0,
            map.frame_end().0,
        );
        map
    });
}

/// The coremap, if the VM bootstrap has run.
pub fn coremap() -> Option<&'static Coremap> {
    COREMAP.get()
}

/// The coremap. Panics if the VM bootstrap has not run: callers on the
/// syscall path can only exist after boot, so a miss is a kernel bug.
pub fn kernel_coremap() -> &'static Coremap {
    COREMAP
        .get()
        .expect("vm: kernel_coremap called before bootstrap")
}

// ---------------------------------------------------------------------------
// Page allocation entry points
// ---------------------------------------------------------------------------

/// Allocate `npages` contiguous physical pages.
///
/// Falls back to stealing permanent pages until the coremap exists.
pub fn get_ppages(npages: usize) -> KernelResult<PhysicalAddress> {
    match COREMAP.get() {
        Some(map) => map.get_ppages(npages),
        None => {
            let _guard = STEALMEM_LOCK.lock();
            ram::stealmem(npages)
        }
    }
}

/// Allocate `npages` contiguous pages and return their kernel-virtual
/// address.
pub fn alloc_kpages(npages: usize) -> KernelResult<*mut u8> {
    let paddr = get_ppages(npages)?;
    Ok(paddr.kvaddr())
}

/// Free a run previously returned by [`alloc_kpages`], given the
/// kernel-virtual address of its first page.
///
/// Pages stolen before bootstrap are permanent: freeing them is a no-op
/// beyond a log line.
pub fn free_kpages(kvaddr: *mut u8) {
    let paddr = mips::kvaddr_to_paddr(kvaddr);
    match COREMAP.get() {
        Some(map) if map.contains(paddr) => map.free_ppages(paddr),
        _ => log::warn!(
            "vm: free_kpages({:#x}) outside the coremap; leaking",
            paddr.0
        ),
    }
}
