//! Process forking
//!
//! `fork` duplicates the calling process: a fresh record, a deep copy of
//! the address space, and a new thread that re-enters user mode through the
//! saved trapframe with a return value of 0. The trapframe is copied to the
//! kernel heap first so the child never reads through the parent's stack.

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;

use crate::arch::mips::trapframe::Trapframe;
use crate::arch::mips::usermode;
use crate::error::{KernelError, KernelResult};
use crate::raii::ScopeGuard;
use crate::sched;

use super::pcb::{Process, ProcessId};
use super::table;

/// Duplicate the current process; returns the child's PID to the caller.
///
/// The child observes the same trapframe with `v0 = 0`. Every failure path
/// releases whatever had been built by the time it failed.
pub fn fork_process(tf: &Trapframe) -> KernelResult<ProcessId> {
    let parent = super::current().ok_or(KernelError::NoSuchProcess { pid: 0 })?;

    // New process record.
    let child = Arc::new(Process::new(
        &format!("{}-fork", parent.name),
        Some(parent.pid),
    ));
    let child_pid = child.pid;

    // Deep-copy the address space. A failure drops the half-built copy,
    // which returns its frames.
    let child_aspace = {
        let guard = parent.aspace.lock();
        let parent_aspace = guard.as_ref().ok_or(KernelError::BadAddress { addr: 0 })?;
        parent_aspace.try_clone()?
    };

    // Attach the copy, then wire the parent/child link.
    *child.aspace.lock() = Some(child_aspace);
    parent.children.lock().push(child_pid);
    let unlink = {
        let parent = Arc::clone(&parent);
        ScopeGuard::new(move || {
            parent.remove_child(child_pid);
            table::remove(child_pid);
        })
    };
    table::insert(Arc::clone(&child))?;

    // Stable trapframe copy for the child thread.
    let tf_copy = Box::new(*tf);

    sched::thread_fork(&child.name, child_pid, move || {
        usermode::enter_forked_process(tf_copy)
    })?;

    unlink.cancel();
    log::debug!("process {} forked child {}", parent.pid, child_pid);
    Ok(child_pid)
}
