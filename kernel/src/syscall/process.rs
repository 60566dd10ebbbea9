//! Process system calls
//!
//! `getpid`, `fork`, `_exit`, and `waitpid`. The lifecycle mechanics live
//! in [`crate::process`]; this layer validates arguments and moves data
//! across the user boundary.

use crate::arch::mips::trapframe::Trapframe;
use crate::error::{KernelError, KernelResult};
use crate::mm::{usercopy, VirtualAddress};
use crate::process::{self, ProcessId, WaitStatus};

/// PID of the calling process.
pub fn sys_getpid() -> KernelResult<ProcessId> {
    process::current()
        .map(|p| p.pid)
        .ok_or(KernelError::NoSuchProcess { pid: 0 })
}

/// Duplicate the calling process. Returns the child PID to the parent; the
/// child re-enters user mode with a return value of 0.
pub fn sys_fork(tf: &Trapframe) -> KernelResult<ProcessId> {
    process::fork_process(tf)
}

/// Terminate the calling process. Never returns.
pub fn sys_exit(exit_code: i32) -> ! {
    process::exit_process(exit_code)
}

/// Wait for child `pid` to terminate; write the encoded exit status to
/// `status_ptr` and return the pid.
///
/// Only `options == 0` is supported. On failure nothing is written to
/// `status_ptr`.
pub fn sys_waitpid(
    pid: i32,
    status_ptr: VirtualAddress,
    options: u32,
) -> KernelResult<ProcessId> {
    if options != 0 {
        return Err(KernelError::InvalidArgument { name: "options" });
    }
    if pid < 0 {
        return Err(KernelError::NoSuchProcess { pid: pid as u32 });
    }
    let pid = ProcessId(pid as u32);

    let parent = process::current().ok_or(KernelError::NoSuchProcess { pid: 0 })?;
    let (_child, status) = process::wait::collect_child(&parent, pid)?;

    // Deliver the status before reaping: a faulting pointer leaves the
    // child collectible by a later, correct waitpid.
    let raw = status.to_raw();
    {
        let guard = parent.aspace.lock();
        let aspace = guard.as_ref().ok_or(KernelError::BadAddress {
            addr: status_ptr.0,
        })?;
        usercopy::copyout(aspace, &raw.to_ne_bytes(), status_ptr)?;
    }

    process::wait::reap_child(&parent, pid);
    Ok(pid)
}

/// Encode an exit code the way `waitpid` reports a normal exit.
pub fn mkwait_exit(code: i32) -> i32 {
    WaitStatus::Exited(code).to_raw()
}
