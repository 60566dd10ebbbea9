//! User mode entry
//!
//! The two one-way doors out of the kernel: resuming a forked child at the
//! instruction after its parent's `fork`, and starting a freshly exec'd
//! program at its entry point. Bare-metal builds hand the register state to
//! the external low-level return path. Hosted builds cannot drop to user
//! mode; instead they run a continuation registered by the test, which
//! stands in for the user program (and typically ends by calling back into
//! the kernel, e.g. `exit_process`).

use alloc::boxed::Box;

use crate::mm::VirtualAddress;

use super::trapframe::Trapframe;

#[cfg(target_os = "none")]
extern "C" {
    fn mips_usermode(tf: *const Trapframe) -> !;
}

/// Entry point of the thread created by `fork`.
///
/// Takes ownership of the heap trapframe copy made by the parent, fixes it
/// up so the child observes a return value of 0, and enters user mode. The
/// heap copy is released before the crossing.
pub fn enter_forked_process(tf: Box<Trapframe>) -> ! {
    let mut frame = *tf;
    drop(tf);
    frame.v0 = 0; // fork returns 0 in the child
    frame.a3 = 0; // no error
    frame.epc = frame.epc.wrapping_add(4); // skip the syscall instruction
    enter(&frame)
}

/// Start a brand-new process image: `argc`/`argv` in the argument
/// registers, the stack pointer below the argument block, pc at the entry
/// point.
pub fn enter_new_process(
    argc: usize,
    argv: VirtualAddress,
    stackptr: VirtualAddress,
    entrypoint: VirtualAddress,
) -> ! {
    let mut frame = Trapframe::default();
    frame.a0 = argc as u32;
    frame.a1 = argv.0;
    frame.sp = stackptr.0;
    frame.epc = entrypoint.0;
    #[cfg(not(target_os = "none"))]
    if let Some(hook) = host::take_exec_entry() {
        hook(argc, argv, stackptr, entrypoint);
    }
    enter(&frame)
}

fn enter(frame: &Trapframe) -> ! {
    #[cfg(target_os = "none")]
    // SAFETY: the frame is fully initialized and lives on this thread's
    // stack until the crossing, which never returns.
    unsafe {
        mips_usermode(frame)
    }
    #[cfg(not(target_os = "none"))]
    {
        if let Some(hook) = host::take_user_program() {
            hook(frame);
        }
        // No user program registered (or it returned): this "CPU" idles.
        loop {
            std::thread::park();
        }
    }
}

#[cfg(not(target_os = "none"))]
pub use host::{set_exec_entry, set_forked_child_program};

#[cfg(not(target_os = "none"))]
mod host {
    use alloc::boxed::Box;
    use alloc::collections::BTreeMap;

    use spin::Mutex;

    use super::Trapframe;
    use crate::mm::VirtualAddress;
    use crate::process;

    type UserProgram = Box<dyn FnOnce(&Trapframe) + Send>;
    type ExecEntry =
        Box<dyn FnOnce(usize, VirtualAddress, VirtualAddress, VirtualAddress) + Send>;

    // Hosted stand-ins for user programs, keyed so concurrent tests cannot
    // steal each other's continuation: fork continuations by the parent's
    // pid, exec continuations by the exec'ing process's own pid.
    static USER_PROGRAMS: Mutex<BTreeMap<u32, UserProgram>> = Mutex::new(BTreeMap::new());
    static EXEC_ENTRIES: Mutex<BTreeMap<u32, ExecEntry>> = Mutex::new(BTreeMap::new());

    /// Register the user program any forked child of `parent` will run on
    /// its first user-mode entry.
    pub fn set_forked_child_program(
        parent: process::ProcessId,
        f: impl FnOnce(&Trapframe) + Send + 'static,
    ) {
        USER_PROGRAMS.lock().insert(parent.0, Box::new(f));
    }

    /// Register the continuation process `pid` will run when it enters its
    /// new image after `execv`.
    pub fn set_exec_entry(
        pid: process::ProcessId,
        f: impl FnOnce(usize, VirtualAddress, VirtualAddress, VirtualAddress) + Send + 'static,
    ) {
        EXEC_ENTRIES.lock().insert(pid.0, Box::new(f));
    }

    pub(super) fn take_user_program() -> Option<UserProgram> {
        let parent = process::current().and_then(|p| *p.parent.lock())?;
        USER_PROGRAMS.lock().remove(&parent.0)
    }

    pub(super) fn take_exec_entry() -> Option<ExecEntry> {
        let pid = process::current()?.pid;
        EXEC_ENTRIES.lock().remove(&pid.0)
    }
}
