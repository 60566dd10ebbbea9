//! Process control block
//!
//! The record behind a PID: identity, the parent/child links, the owned
//! address space, and the exit rendezvous state. The exit state has its own
//! mutex + condition variable pair; `terminated` and `exit_code` are only
//! ever written under that mutex, and the notification is sent while it is
//! still held, so a waiter that wakes is guaranteed to observe the final
//! state.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::mm::AddressSpace;
use crate::sync::Condvar;

/// Process ID. Always positive for live processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exit rendezvous state, guarded by [`Process::exit_lock`].
#[derive(Debug, Clone, Copy)]
pub struct ExitState {
    /// Monotonic: set once, never cleared.
    pub terminated: bool,
    /// Meaningful only once `terminated` is observed true under the lock.
    pub exit_code: i32,
}

/// Process record.
pub struct Process {
    /// Process ID, unique among live processes.
    pub pid: ProcessId,

    /// Process name, for diagnostics.
    pub name: String,

    /// Back-link to the parent; `None` once orphaned (or for the first
    /// process).
    pub parent: Mutex<Option<ProcessId>>,

    /// PIDs of live (or not-yet-reaped) children.
    pub children: Mutex<Vec<ProcessId>>,

    /// Owned address space; detached (set to `None`) during exit so a
    /// half-destroyed space can never be re-activated.
    pub aspace: Mutex<Option<AddressSpace>>,

    exit: Mutex<ExitState>,
    exit_cv: Condvar,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .finish()
    }
}

impl Process {
    /// Create a fresh record with a newly assigned PID.
    pub fn new(name: &str, parent: Option<ProcessId>) -> Self {
        Self {
            pid: super::alloc_pid(),
            name: String::from(name),
            parent: Mutex::new(parent),
            children: Mutex::new(Vec::new()),
            aspace: Mutex::new(None),
            exit: Mutex::new(ExitState {
                terminated: false,
                exit_code: 0,
            }),
            exit_cv: Condvar::new(),
        }
    }

    /// Whether this process has terminated.
    pub fn is_terminated(&self) -> bool {
        self.exit.lock().terminated
    }

    /// Publish termination: set the exit state under the lock, then wake
    /// any waiter while still holding it.
    pub fn mark_terminated(&self, exit_code: i32) {
        let mut state = self.exit.lock();
        debug_assert!(!state.terminated, "process terminated twice");
        state.terminated = true;
        state.exit_code = exit_code;
        self.exit_cv.notify_all();
    }

    /// Block until this process terminates; returns its exit code.
    pub fn wait_for_exit(&self) -> i32 {
        let mut state = self.exit.lock();
        while !state.terminated {
            state = self.exit_cv.wait(&self.exit, state);
        }
        state.exit_code
    }

    /// Exit code, if the process has terminated.
    pub fn exit_code(&self) -> Option<i32> {
        let state = self.exit.lock();
        state.terminated.then_some(state.exit_code)
    }

    /// Drop the parent link; called when the parent exits first.
    pub fn orphan(&self) {
        *self.parent.lock() = None;
    }

    /// Whether `pid` is a registered child of this process.
    pub fn has_child(&self, pid: ProcessId) -> bool {
        self.children.lock().contains(&pid)
    }

    /// Unregister a child (reaped, or being unwound from a failed fork).
    pub fn remove_child(&self, pid: ProcessId) {
        self.children.lock().retain(|&p| p != pid);
    }
}
