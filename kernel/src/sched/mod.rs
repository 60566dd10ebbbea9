//! Thread scheduler contract
//!
//! The scheduler proper lives outside this crate; these are the two calls
//! the lifecycle code needs from it. On bare metal they bind to the
//! external scheduler's C symbols. Hosted builds back each kernel thread
//! with a host thread, which is what lets the fork/exit/wait round trip run
//! under `cargo test`.

use crate::error::KernelResult;
use crate::process::ProcessId;

#[cfg(target_os = "none")]
use alloc::boxed::Box;
#[cfg(target_os = "none")]
use crate::error::KernelError;

#[cfg(target_os = "none")]
extern "C" {
    fn thread_fork_raw(
        name: *const u8,
        name_len: usize,
        pid: u32,
        entry: extern "C" fn(*mut u8),
        data: *mut u8,
    ) -> i32;
    fn thread_exit_raw() -> !;
}

#[cfg(target_os = "none")]
extern "C" fn trampoline(data: *mut u8) {
    // SAFETY: `data` is the Box::into_raw of the closure built in
    // thread_fork below, passed through the scheduler untouched and
    // consumed exactly once, here.
    let entry = unsafe { Box::from_raw(data as *mut Box<dyn FnOnce() + Send>) };
    entry();
}

/// Create a kernel thread running `entry` inside process `pid`.
pub fn thread_fork(
    name: &str,
    pid: ProcessId,
    entry: impl FnOnce() + Send + 'static,
) -> KernelResult<()> {
    #[cfg(target_os = "none")]
    {
        let boxed: Box<Box<dyn FnOnce() + Send>> = Box::new(Box::new(entry));
        let data = Box::into_raw(boxed) as *mut u8;
        // SAFETY: name points at a live str for the duration of the call;
        // the scheduler either runs the trampoline (which consumes `data`)
        // or returns nonzero, in which case we reclaim it below.
        let rc = unsafe { thread_fork_raw(name.as_ptr(), name.len(), pid.0, trampoline, data) };
        if rc != 0 {
            // SAFETY: the scheduler rejected the thread, so the trampoline
            // will never run and the box is still ours.
            drop(unsafe { Box::from_raw(data as *mut Box<dyn FnOnce() + Send>) });
            return Err(KernelError::ResourceExhausted {
                resource: "kernel threads",
            });
        }
        Ok(())
    }
    #[cfg(not(target_os = "none"))]
    {
        let name = alloc::string::String::from(name);
        std::thread::Builder::new()
            .name(name)
            .spawn(move || {
                crate::process::set_current(Some(pid));
                entry();
            })
            .map(|_| ())
            .map_err(|_| crate::error::KernelError::ResourceExhausted {
                resource: "kernel threads",
            })
    }
}

/// Terminate the current kernel thread. Never returns.
pub fn thread_exit() -> ! {
    #[cfg(target_os = "none")]
    // SAFETY: plain diverging call into the scheduler.
    unsafe {
        thread_exit_raw()
    }
    #[cfg(not(target_os = "none"))]
    {
        // The thread has already published its final state; an idle park
        // is termination as far as the host model is concerned.
        loop {
            std::thread::park();
        }
    }
}
