//! Global process table
//!
//! Every live (or zombie awaiting reap) process is registered here by PID.
//! The table holds the owning reference; parents and the scheduler hold
//! clones that keep a record alive across its removal.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

use super::pcb::{Process, ProcessId};

/// PID-indexed registry of processes.
pub struct ProcessTable {
    entries: Mutex<BTreeMap<u32, Arc<Process>>>,
    count: AtomicUsize,
}

impl ProcessTable {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            count: AtomicUsize::new(0),
        }
    }

    /// Register a process under its PID.
    pub fn insert(&self, process: Arc<Process>) -> KernelResult<ProcessId> {
        let pid = process.pid;
        let mut entries = self.entries.lock();
        if entries.contains_key(&pid.0) {
            return Err(KernelError::ResourceExhausted {
                resource: "process id",
            });
        }
        entries.insert(pid.0, process);
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(pid)
    }

    /// Look up a process by PID.
    pub fn get(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.entries.lock().get(&pid.0).cloned()
    }

    /// Unregister and return a process.
    pub fn remove(&self, pid: ProcessId) -> Option<Arc<Process>> {
        let removed = self.entries.lock().remove(&pid.0);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Whether a PID is registered.
    pub fn exists(&self, pid: ProcessId) -> bool {
        self.entries.lock().contains_key(&pid.0)
    }

    /// Number of registered processes.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Global process table instance.
pub static PROCESS_TABLE: ProcessTable = ProcessTable::new();

/// Register a process in the global table.
pub fn insert(process: Arc<Process>) -> KernelResult<ProcessId> {
    PROCESS_TABLE.insert(process)
}

/// Look up a process in the global table.
pub fn get(pid: ProcessId) -> Option<Arc<Process>> {
    PROCESS_TABLE.get(pid)
}

/// Remove a process from the global table.
pub fn remove(pid: ProcessId) -> Option<Arc<Process>> {
    PROCESS_TABLE.remove(pid)
}
