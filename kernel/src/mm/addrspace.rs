//! Per-process address spaces
//!
//! An address space maps at most two loadable regions (text, then data) plus
//! a fixed-size stack ending at [`USERSTACK`]. Each region keeps one owned
//! frame per virtual page, so physical placement can be fully fragmented and
//! a deep copy never needs contiguous memory. Frames are [`PageGuard`]s:
//! dropping an address space (or abandoning a half-built one on an error
//! path) returns every frame to the coremap.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::arch::mips::{spl, tlb};
use crate::error::{KernelError, KernelResult};
use crate::process;
use crate::raii::PageGuard;

use super::{Coremap, PhysicalAddress, VirtualAddress, PAGE_SIZE, USERSTACK};

/// Pages in the user stack region.
pub const STACK_PAGES: usize = 12;

bitflags! {
    /// Region permission bits, as declared by the executable.
    ///
    /// Accepted for interface compatibility with the loader; this VM grants
    /// read-write to everything except text after load completion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        const READ = 0x4;
        const WRITE = 0x2;
        const EXEC = 0x1;
    }
}

/// Result of translating a user virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub paddr: PhysicalAddress,
    pub writable: bool,
}

/// One loadable region: a page-aligned base and one optional frame per page.
///
/// All page slots are empty between `define_region` and `prepare_load`.
struct Segment {
    vbase: VirtualAddress,
    pages: Vec<Option<PageGuard>>,
}

impl Segment {
    fn new(vbase: VirtualAddress, npages: usize) -> Self {
        let mut pages = Vec::with_capacity(npages);
        pages.resize_with(npages, || None);
        Self { vbase, pages }
    }

    fn npages(&self) -> usize {
        self.pages.len()
    }

    fn vtop(&self) -> VirtualAddress {
        VirtualAddress(self.vbase.0 + (self.npages() * PAGE_SIZE) as u32)
    }

    fn contains(&self, vaddr: VirtualAddress) -> bool {
        vaddr >= self.vbase && vaddr < self.vtop()
    }

    fn frame(&self, index: usize) -> Option<PhysicalAddress> {
        self.pages.get(index).and_then(|p| p.as_ref()).map(PageGuard::paddr)
    }

    fn translate(&self, vaddr: VirtualAddress) -> KernelResult<PhysicalAddress> {
        debug_assert!(self.contains(vaddr));
        let delta = (vaddr.0 - self.vbase.0) as usize;
        let frame = self
            .frame(delta / PAGE_SIZE)
            .ok_or(KernelError::BadAddress { addr: vaddr.0 })?;
        debug_assert!(frame.is_page_aligned());
        Ok(PhysicalAddress(frame.0 + (delta % PAGE_SIZE) as u32))
    }
}

/// A process's virtual memory layout and its backing frames.
pub struct AddressSpace {
    coremap: &'static Coremap,
    text: Option<Segment>,
    data: Option<Segment>,
    stack: Option<Vec<PageGuard>>,
    loadelf_done: bool,
}

impl AddressSpace {
    /// Create an empty address space drawing frames from `coremap`.
    pub fn new(coremap: &'static Coremap) -> Self {
        Self {
            coremap,
            text: None,
            data: None,
            stack: None,
            loadelf_done: false,
        }
    }

    /// Declare a loadable region.
    ///
    /// The base is aligned down and the size up to page granularity. The
    /// first call defines the text region, the second the data region; a
    /// third region is not supported. No frames are allocated yet.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: usize,
        _flags: RegionFlags,
    ) -> KernelResult<()> {
        let skew = vaddr.offset_in_page();
        let vbase = vaddr.page_base();
        let size = size + skew;
        let npages = (size + PAGE_SIZE - 1) / PAGE_SIZE;

        let slot = if self.text.is_none() {
            &mut self.text
        } else if self.data.is_none() {
            &mut self.data
        } else {
            log::warn!("addrspace: more than two regions requested");
            return Err(KernelError::TooManyRegions);
        };
        *slot = Some(Segment::new(vbase, npages));
        Ok(())
    }

    /// Back every declared page, and the stack, with fresh zeroed frames.
    ///
    /// On allocation failure the address space is left partially backed;
    /// the caller is expected to discard it, which frees the part that was
    /// built.
    pub fn prepare_load(&mut self) -> KernelResult<()> {
        debug_assert!(self.stack.is_none());
        for segment in [self.text.as_mut(), self.data.as_mut()].into_iter().flatten() {
            for page in segment.pages.iter_mut() {
                debug_assert!(page.is_none());
                *page = Some(alloc_zeroed(self.coremap)?);
            }
        }
        let mut stack = Vec::with_capacity(STACK_PAGES);
        for _ in 0..STACK_PAGES {
            stack.push(alloc_zeroed(self.coremap)?);
        }
        self.stack = Some(stack);
        Ok(())
    }

    /// Loading is finished: text becomes read-only for every TLB entry
    /// installed from now on.
    pub fn complete_load(&mut self) {
        self.loadelf_done = true;
    }

    /// Whether the loader has finished populating this address space.
    pub fn loadelf_done(&self) -> bool {
        self.loadelf_done
    }

    /// Initial user stack pointer.
    ///
    /// The stack must have been allocated by [`Self::prepare_load`].
    pub fn define_stack(&self) -> VirtualAddress {
        assert!(
            self.stack.is_some(),
            "addrspace: define_stack before prepare_load"
        );
        VirtualAddress(USERSTACK)
    }

    /// Lowest address of the stack region.
    pub fn stack_base() -> VirtualAddress {
        VirtualAddress(USERSTACK - (STACK_PAGES * PAGE_SIZE) as u32)
    }

    /// Translate a user virtual address to its physical counterpart.
    pub fn translate(&self, vaddr: VirtualAddress) -> KernelResult<Translation> {
        if let Some(text) = self.text.as_ref() {
            if text.contains(vaddr) {
                return Ok(Translation {
                    paddr: text.translate(vaddr)?,
                    writable: !self.loadelf_done,
                });
            }
        }
        if let Some(data) = self.data.as_ref() {
            if data.contains(vaddr) {
                return Ok(Translation {
                    paddr: data.translate(vaddr)?,
                    writable: true,
                });
            }
        }
        if vaddr >= Self::stack_base() && vaddr.0 < USERSTACK {
            let delta = (vaddr.0 - Self::stack_base().0) as usize;
            let stack = self
                .stack
                .as_ref()
                .ok_or(KernelError::BadAddress { addr: vaddr.0 })?;
            let frame = stack[delta / PAGE_SIZE].paddr();
            return Ok(Translation {
                paddr: PhysicalAddress(frame.0 + (delta % PAGE_SIZE) as u32),
                writable: true,
            });
        }
        Err(KernelError::BadAddress { addr: vaddr.0 })
    }

    /// Physical frame backing text page `index`, if mapped.
    pub fn text_frame(&self, index: usize) -> Option<PhysicalAddress> {
        self.text.as_ref().and_then(|s| s.frame(index))
    }

    /// Physical frame backing data page `index`, if mapped.
    pub fn data_frame(&self, index: usize) -> Option<PhysicalAddress> {
        self.data.as_ref().and_then(|s| s.frame(index))
    }

    /// Physical frame backing stack page `index`, if mapped.
    pub fn stack_frame(&self, index: usize) -> Option<PhysicalAddress> {
        self.stack.as_ref().map(|s| s[index].paddr())
    }

    /// Deep copy: identical geometry and byte-identical contents in freshly
    /// allocated frames.
    pub fn try_clone(&self) -> KernelResult<AddressSpace> {
        let mut new = AddressSpace::new(self.coremap);
        if let Some(text) = self.text.as_ref() {
            new.text = Some(Segment::new(text.vbase, text.npages()));
        }
        if let Some(data) = self.data.as_ref() {
            new.data = Some(Segment::new(data.vbase, data.npages()));
        }
        // Reuse prepare_load to back the copy; a failure drops `new` and
        // with it every frame allocated so far.
        new.prepare_load()?;

        for (old_seg, new_seg) in [
            (self.text.as_ref(), new.text.as_ref()),
            (self.data.as_ref(), new.data.as_ref()),
        ] {
            let (Some(old_seg), Some(new_seg)) = (old_seg, new_seg) else {
                continue;
            };
            for (old_page, new_page) in old_seg.pages.iter().zip(new_seg.pages.iter()) {
                let src = old_page
                    .as_ref()
                    .ok_or(KernelError::BadAddress {
                        addr: old_seg.vbase.0,
                    })?
                    .paddr();
                new_page
                    .as_ref()
                    .expect("prepare_load backed every page")
                    .copy_page_from(src);
            }
        }
        if let (Some(old_stack), Some(new_stack)) = (self.stack.as_ref(), new.stack.as_ref()) {
            for (old_page, new_page) in old_stack.iter().zip(new_stack.iter()) {
                new_page.copy_page_from(old_page.paddr());
            }
        }
        new.loadelf_done = self.loadelf_done;
        Ok(new)
    }
}

fn alloc_zeroed(coremap: &'static Coremap) -> KernelResult<PageGuard> {
    let page = PageGuard::alloc(coremap)?;
    page.zero();
    Ok(page)
}

/// Flush this CPU's TLB on behalf of the current thread's address space.
///
/// Called on every dispatch into a user thread; kernel-only threads have no
/// address space and skip the flush.
pub fn as_activate() {
    let Some(proc) = process::current() else {
        return;
    };
    if proc.aspace.lock().is_none() {
        return;
    }
    let _spl = spl::raise();
    tlb::invalidate_all();
}

/// Address space switch-away hook. Nothing to do on this MMU.
pub fn as_deactivate() {}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::collections::BTreeSet;

    use super::*;
    use crate::test_support;

    const TEXT_BASE: u32 = 0x0040_0000;
    const DATA_BASE: u32 = 0x1000_0000;

    fn two_region_space(map: &'static Coremap) -> AddressSpace {
        let mut aspace = AddressSpace::new(map);
        aspace
            .define_region(
                VirtualAddress(TEXT_BASE),
                2 * PAGE_SIZE,
                RegionFlags::READ | RegionFlags::EXEC,
            )
            .expect("first region is text");
        aspace
            .define_region(
                VirtualAddress(DATA_BASE),
                2 * PAGE_SIZE,
                RegionFlags::READ | RegionFlags::WRITE,
            )
            .expect("second region is data");
        aspace
    }

    #[test]
    fn define_region_aligns_base_and_size() {
        let map = test_support::leak_coremap(20);
        let mut aspace = AddressSpace::new(map);
        // Unaligned base and a size that spills onto a third page once the
        // base skew is folded in.
        aspace
            .define_region(VirtualAddress(0x0040_0123), 2 * PAGE_SIZE, RegionFlags::READ)
            .expect("unaligned request is legal");
        aspace.prepare_load().expect("20 frames cover 3 + 12 pages");

        let tr = aspace
            .translate(VirtualAddress(0x0040_0000))
            .expect("aligned-down base belongs to the region");
        assert!(tr.paddr.is_page_aligned());
        // 0x123 + 2 pages rounds to 3 pages.
        assert!(aspace.text_frame(2).is_some());
        assert!(aspace.text_frame(3).is_none());
    }

    #[test]
    fn third_region_is_unsupported() {
        let map = test_support::leak_coremap(8);
        let mut aspace = two_region_space(map);
        let err = aspace
            .define_region(VirtualAddress(0x2000_0000), PAGE_SIZE, RegionFlags::READ)
            .expect_err("only two loadable regions exist");
        assert_eq!(err, KernelError::TooManyRegions);
    }

    #[test]
    fn prepare_load_backs_every_page_with_distinct_frames() {
        let map = test_support::leak_coremap(24);
        let mut aspace = two_region_space(map);
        assert!(aspace.text_frame(0).is_none(), "no frames before prepare_load");
        aspace.prepare_load().expect("24 frames cover 4 + 12 pages");

        let mut seen = BTreeSet::new();
        for i in 0..2 {
            let frame = aspace.text_frame(i).expect("text page backed");
            assert!(frame.is_page_aligned());
            assert!(seen.insert(frame.0), "frame {:#x} mapped twice", frame.0);
        }
        for i in 0..2 {
            let frame = aspace.data_frame(i).expect("data page backed");
            assert!(seen.insert(frame.0), "frame {:#x} mapped twice", frame.0);
        }
        for i in 0..STACK_PAGES {
            let frame = aspace.stack_frame(i).expect("stack page backed");
            assert!(seen.insert(frame.0), "frame {:#x} mapped twice", frame.0);
        }
    }

    #[test]
    fn prepare_load_failure_leaves_space_discardable() {
        // 10 frames cannot back 4 region pages + 12 stack pages.
        let map = test_support::leak_coremap(10);
        let mut aspace = two_region_space(map);
        let err = aspace.prepare_load().expect_err("10 frames are not enough");
        assert!(matches!(err, KernelError::OutOfMemory { .. }));
        drop(aspace);
        assert_eq!(map.free_count(), 10, "partial allocation fully returned");
    }

    #[test]
    fn copy_is_deep_and_byte_identical() {
        let map = test_support::leak_coremap(40);
        let mut aspace = two_region_space(map);
        aspace.prepare_load().expect("backing the original");

        // Scribble a recognizable pattern through the kernel alias.
        for i in 0..2 {
            let frame = aspace.data_frame(i).expect("data backed");
            // SAFETY: the frame is owned by `aspace` and direct-mapped.
            unsafe {
                core::ptr::write_bytes(frame.kvaddr(), 0xA0 + i as u8, PAGE_SIZE);
            }
        }

        let copy = aspace.try_clone().expect("deep copy fits in 40 frames");

        for i in 0..2 {
            let old = aspace.data_frame(i).expect("old data frame");
            let new = copy.data_frame(i).expect("new data frame");
            assert_ne!(old, new, "copy must not share frames");
            // SAFETY: both frames are live and direct-mapped.
            let identical = unsafe {
                core::slice::from_raw_parts(old.kvaddr() as *const u8, PAGE_SIZE)
                    == core::slice::from_raw_parts(new.kvaddr() as *const u8, PAGE_SIZE)
            };
            assert!(identical, "data page {} differs after copy", i);
        }

        // Translation agrees between the two spaces, page by page.
        let va = VirtualAddress(DATA_BASE + 0x234);
        let old_tr = aspace.translate(va).expect("old translates");
        let new_tr = copy.translate(va).expect("copy translates");
        assert_eq!(old_tr.paddr.0 & 0xfff, new_tr.paddr.0 & 0xfff);

        drop(copy);
        drop(aspace);
        assert_eq!(map.free_count(), 40, "both spaces returned their frames");
    }

    #[test]
    fn translate_covers_stack_and_rejects_holes() {
        let map = test_support::leak_coremap(20);
        let mut aspace = two_region_space(map);
        aspace.prepare_load().expect("backing");

        let sp = aspace.define_stack();
        assert_eq!(sp.0, USERSTACK);
        let in_stack = VirtualAddress(USERSTACK - 16);
        assert!(aspace.translate(in_stack).is_ok());

        let below_stack = VirtualAddress(AddressSpace::stack_base().0 - 4);
        assert!(matches!(
            aspace.translate(below_stack),
            Err(KernelError::BadAddress { .. })
        ));
        let wild = VirtualAddress(0x7000_0000);
        assert!(matches!(
            aspace.translate(wild),
            Err(KernelError::BadAddress { .. })
        ));
    }

    #[test]
    fn text_becomes_read_only_after_complete_load() {
        let map = test_support::leak_coremap(20);
        let mut aspace = two_region_space(map);
        aspace.prepare_load().expect("backing");

        let va = VirtualAddress(TEXT_BASE + 8);
        assert!(
            aspace.translate(va).expect("text translates").writable,
            "text stays writable while the loader populates it"
        );
        aspace.complete_load();
        assert!(
            !aspace.translate(va).expect("text translates").writable,
            "text is read-only once loading completes"
        );
        assert!(
            aspace
                .translate(VirtualAddress(DATA_BASE))
                .expect("data translates")
                .writable,
            "data stays writable"
        );
    }
}
