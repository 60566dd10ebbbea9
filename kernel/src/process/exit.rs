//! Process exit
//!
//! Termination order matters here:
//!
//! 1. publish the exit state and wake the parent (under the exit mutex);
//! 2. orphan or reap the children;
//! 3. detach the address space from the record *before* destroying it, so
//!    a reschedule mid-teardown can never re-activate a half-destroyed
//!    space;
//! 4. detach the thread, and self-reap when no parent is left to do it;
//! 5. leave through the scheduler, never to return.

use crate::mm::addrspace;
use crate::process;
use crate::sched;

use super::table;

/// Terminate the current process with `exit_code`.
pub fn exit_process(exit_code: i32) -> ! {
    let proc = match process::current() {
        Some(p) => p,
        None => panic!("exit_process: no current process"),
    };
    log::debug!("process {} exiting with code {}", proc.pid, exit_code);

    let has_parent = proc.parent.lock().is_some();

    // Publish the exit state; the notification happens under the exit
    // mutex so the parent cannot observe `terminated` without the final
    // exit code.
    proc.mark_terminated(exit_code);

    // The children lose their parent. Anything that already terminated
    // will never be waited on, so reap it here.
    let children = core::mem::take(&mut *proc.children.lock());
    for child_pid in children {
        if let Some(child) = table::get(child_pid) {
            if child.is_terminated() {
                table::remove(child_pid);
            } else {
                child.orphan();
            }
        }
    }

    // Detach before destroying.
    addrspace::as_deactivate();
    let aspace = proc.aspace.lock().take();
    drop(aspace);

    // Detach this thread from the process; `current()` is gone after this.
    process::set_current(None);

    // With no parent to reap it, the record leaves the table now. The
    // parent's waitpid performs this removal otherwise.
    if !has_parent {
        table::remove(proc.pid);
    }

    sched::thread_exit()
}
