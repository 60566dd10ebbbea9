//! Process management
//!
//! The process table, the PCB, and the lifecycle operations behind the
//! process system calls. One user process runs one kernel thread; the
//! scheduler (external) tells this module which process a CPU is running
//! via [`set_current`].

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

pub mod exit;
pub mod fork;
pub mod pcb;
pub mod table;
pub mod wait;

pub use exit::exit_process;
pub use fork::fork_process;
pub use pcb::{Process, ProcessId};
pub use wait::WaitStatus;

/// Process ID allocator. PID 0 is never assigned.
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// Allocate a new process ID.
pub fn alloc_pid() -> ProcessId {
    ProcessId(NEXT_PID.fetch_add(1, Ordering::Relaxed))
}

// ---------------------------------------------------------------------------
// Current process
// ---------------------------------------------------------------------------
//
// The machine runs one CPU; hosted builds model each kernel thread as its
// own CPU, so "current" is per host thread there.

#[cfg(target_os = "none")]
static CURRENT: spin::Mutex<Option<u32>> = spin::Mutex::new(None);

#[cfg(not(target_os = "none"))]
std::thread_local! {
    static CURRENT: core::cell::Cell<Option<u32>> = const { core::cell::Cell::new(None) };
}

/// The process this CPU is executing on behalf of, if any.
pub fn current() -> Option<Arc<Process>> {
    let pid = {
        #[cfg(target_os = "none")]
        {
            *CURRENT.lock()
        }
        #[cfg(not(target_os = "none"))]
        {
            CURRENT.with(|c| c.get())
        }
    };
    pid.and_then(|pid| table::get(ProcessId(pid)))
}

/// Install (or clear) the current process for this CPU.
///
/// Called by the scheduler on dispatch, and by the exit path to detach the
/// dying thread from its process.
pub fn set_current(pid: Option<ProcessId>) {
    #[cfg(target_os = "none")]
    {
        *CURRENT.lock() = pid.map(|p| p.0);
    }
    #[cfg(not(target_os = "none"))]
    {
        CURRENT.with(|c| c.set(pid.map(|p| p.0)));
    }
}
