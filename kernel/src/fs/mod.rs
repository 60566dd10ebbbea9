//! Program store
//!
//! The contract `execv` needs from the filesystem and loader layers, which
//! live outside this crate: resolve a path to an executable image and load
//! that image into an address space. The boot filesystem registers its
//! images here; `open_program` is the read-only `vfs_open` + `load_elf`
//! seam, and dropping the returned handle is the close.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::{AddressSpace, VirtualAddress};

/// An executable image the loader knows how to place into an address space.
pub trait ExecFile: Send + Sync {
    /// Define and populate the image's regions inside `aspace` (regions,
    /// `prepare_load`, segment bytes, `complete_load`) and return the entry
    /// point.
    fn load_into(&self, aspace: &mut AddressSpace) -> KernelResult<VirtualAddress>;
}

/// Registered executables, keyed by absolute path.
static PROGRAMS: Mutex<BTreeMap<String, Arc<dyn ExecFile>>> = Mutex::new(BTreeMap::new());

/// Make an executable reachable by path. Boot code (or a test) calls this
/// for every image in the boot filesystem.
pub fn register_program(path: &str, file: Arc<dyn ExecFile>) {
    PROGRAMS.lock().insert(String::from(path), file);
}

/// Open an executable for loading.
pub fn open_program(path: &str) -> KernelResult<Arc<dyn ExecFile>> {
    PROGRAMS
        .lock()
        .get(path)
        .cloned()
        .ok_or(KernelError::NoSuchFile)
}
