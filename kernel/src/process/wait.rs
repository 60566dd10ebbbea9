//! Child wait support
//!
//! The blocking half of `waitpid`: find the child, sleep on its condition
//! variable until it terminates, and hand the encoded status back. Copying
//! the status to user space and reaping the record stay in the syscall
//! layer so the record survives a faulting status pointer.

use alloc::sync::Arc;

use crate::error::{KernelError, KernelResult};

use super::pcb::{Process, ProcessId};
use super::table;

/// How a waited-on child changed state.
///
/// Only normal exit exists in this kernel; the encoding leaves room for the
/// other POSIX forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Child exited normally with the given code.
    Exited(i32),
}

impl WaitStatus {
    /// Encode as the raw `wstatus` word written to user space.
    ///
    /// Normal exit: `(code & 0xFF) << 8`.
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
        }
    }
}

/// Block until `pid`, a child of `parent`, terminates.
///
/// Returns the terminated child record alongside its encoded status. The
/// child remains registered; the caller reaps it once the status has been
/// delivered.
pub fn collect_child(parent: &Process, pid: ProcessId) -> KernelResult<(Arc<Process>, WaitStatus)> {
    if !parent.has_child(pid) {
        return Err(KernelError::NoChild { pid: pid.0 });
    }
    let child = table::get(pid).ok_or(KernelError::NoChild { pid: pid.0 })?;
    let code = child.wait_for_exit();
    Ok((child, WaitStatus::Exited(code)))
}

/// Remove a collected child from its parent and the process table.
pub fn reap_child(parent: &Process, pid: ProcessId) {
    parent.remove_child(pid);
    table::remove(pid);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn raw_encoding_masks_and_shifts() {
        assert_eq!(WaitStatus::Exited(0).to_raw(), 0);
        assert_eq!(WaitStatus::Exited(7).to_raw(), 7 << 8);
        assert_eq!(WaitStatus::Exited(0x1FF).to_raw(), 0xFF << 8);
        assert_eq!(WaitStatus::Exited(-1).to_raw(), 0xFF << 8);
    }

    #[test]
    fn collect_rejects_non_children() {
        let parent = Process::new("wait-parent", None);
        let stranger = Arc::new(Process::new("stranger", None));
        let pid = table::insert(Arc::clone(&stranger)).expect("insert stranger");
        let err = collect_child(&parent, pid).expect_err("stranger is not a child");
        assert_eq!(err, KernelError::NoChild { pid: pid.0 });
        table::remove(pid);
    }

    #[test]
    fn collect_returns_exit_code_of_terminated_child() {
        let parent = Process::new("wait-parent", None);
        let child = Arc::new(Process::new("wait-child", Some(parent.pid)));
        let pid = table::insert(Arc::clone(&child)).expect("insert child");
        parent.children.lock().push(pid);
        child.mark_terminated(23);

        let (collected, status) = collect_child(&parent, pid).expect("child is terminated");
        assert_eq!(collected.pid, pid);
        assert_eq!(status, WaitStatus::Exited(23));

        reap_child(&parent, pid);
        assert!(!parent.has_child(pid));
        assert!(table::get(pid).is_none());
    }
}
