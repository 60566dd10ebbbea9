//! Shared fixtures for unit tests
//!
//! Tests get private coremaps carved out of the simulated RAM (so they
//! never contend over frame accounting) and process fixtures registered in
//! the real process table. "Current process" is per host thread, mirroring
//! the one-CPU-per-thread model of the hosted build.

#![cfg(all(test, not(target_os = "none")))]

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::arch::mips::ram;
use crate::mm::{AddressSpace, Coremap, RegionFlags, VirtualAddress, PAGE_SIZE, STACK_PAGES};
use crate::process::pcb::Process;
use crate::process::{self, table, ProcessId};

/// Text region base used by fixtures.
pub const TEXT_BASE: u32 = 0x0040_0000;
/// Data region base used by fixtures.
pub const DATA_BASE: u32 = 0x1000_0000;

/// Bootstrap the global VM singletons (idempotent).
pub fn ensure_vm() {
    crate::mm::bootstrap();
}

/// A private coremap managing exactly `frames` frames, leaked so address
/// spaces and guards can hold the usual `'static` reference.
pub fn leak_coremap(frames: usize) -> &'static Coremap {
    // One extra page covers the slot-table reservation the coremap carves
    // off the front of its range.
    let lo = ram::stealmem(frames + 1).expect("simulated RAM exhausted");
    let hi = crate::mm::PhysicalAddress(lo.0 + ((frames + 1) * PAGE_SIZE) as u32);
    let map = Box::leak(Box::new(Coremap::new(lo, hi)));
    assert_eq!(map.frame_count(), frames, "lease arithmetic drifted");
    map
}

/// A registered process, optionally with a prepared two-region address
/// space, plus the coremap backing it.
pub struct Fixture {
    pub proc: Arc<Process>,
    pub coremap: &'static Coremap,
}

impl Fixture {
    /// Run `f` with this fixture's process installed as current on the
    /// calling thread.
    pub fn with_current<R>(&self, f: impl FnOnce() -> R) -> R {
        process::set_current(Some(self.proc.pid));
        let result = f();
        process::set_current(None);
        result
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        // Exit paths may have removed the record already.
        table::remove(self.proc.pid);
    }
}

/// Process with a prepared address space: `text_pages` + `data_pages` +
/// the stack, over a private coremap sized generously enough for one deep
/// copy on top.
pub fn process_with_aspace(name: &str, text_pages: usize, data_pages: usize) -> Fixture {
    let frames = 2 * (text_pages + data_pages + STACK_PAGES) + 8;
    process_with_aspace_sized(name, text_pages, data_pages, frames)
}

/// Same as [`process_with_aspace`] with an explicit coremap size, for
/// exhaustion tests.
pub fn process_with_aspace_sized(
    name: &str,
    text_pages: usize,
    data_pages: usize,
    coremap_frames: usize,
) -> Fixture {
    let coremap = leak_coremap(coremap_frames);
    let mut aspace = AddressSpace::new(coremap);
    aspace
        .define_region(
            VirtualAddress(TEXT_BASE),
            text_pages * PAGE_SIZE,
            RegionFlags::READ | RegionFlags::EXEC,
        )
        .expect("fixture text region");
    aspace
        .define_region(
            VirtualAddress(DATA_BASE),
            data_pages * PAGE_SIZE,
            RegionFlags::READ | RegionFlags::WRITE,
        )
        .expect("fixture data region");
    aspace.prepare_load().expect("fixture backing frames");

    let proc = Arc::new(Process::new(name, None));
    *proc.aspace.lock() = Some(aspace);
    table::insert(Arc::clone(&proc)).expect("fixture registers");
    Fixture { proc, coremap }
}

/// Registered process with no address space at all.
pub fn process_without_aspace(name: &str) -> Fixture {
    let coremap = leak_coremap(2);
    let proc = Arc::new(Process::new(name, None));
    table::insert(Arc::clone(&proc)).expect("fixture registers");
    Fixture { proc, coremap }
}

/// Run `f` on the calling thread as process `pid`.
pub fn run_as(pid: ProcessId, f: impl FnOnce()) {
    process::set_current(Some(pid));
    f();
    process::set_current(None);
}

/// Spin (politely) until `predicate` holds; panics after ten seconds.
pub fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = std::time::Instant::now() + core::time::Duration::from_secs(10);
    while !predicate() {
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for condition"
        );
        std::thread::yield_now();
    }
}
