//! System call interface
//!
//! Kernel-side implementation of the process system calls, plus the
//! dispatcher the trap path calls with the saved user registers: call
//! number in `v0`, arguments in `a0`-`a2`, result back in `v0` with `a3`
//! as the success/error flag, and `epc` advanced past the syscall
//! instruction so the program does not re-execute it.

use crate::arch::mips::trapframe::Trapframe;
use crate::error::{KernelError, KernelResult};
use crate::mm::VirtualAddress;

pub mod exec;
pub mod process;

pub use exec::{sys_execv, ARG_MAX_LEN, PATH_MAX_LEN};
pub use process::{sys_exit, sys_fork, sys_getpid, sys_waitpid};

/// System call numbers (the user-side libc stubs load these into `v0`).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Fork = 0,
    Execv = 2,
    Exit = 3,
    Waitpid = 4,
    GetPid = 5,
}

impl Syscall {
    /// Decode a call number.
    pub fn from_number(number: u32) -> Option<Self> {
        match number {
            0 => Some(Self::Fork),
            2 => Some(Self::Execv),
            3 => Some(Self::Exit),
            4 => Some(Self::Waitpid),
            5 => Some(Self::GetPid),
            _ => None,
        }
    }
}

/// Handle the syscall recorded in `tf`, writing the result back into it.
pub fn dispatch(tf: &mut Trapframe) {
    // Handlers see the frame as of syscall entry; fork in particular
    // snapshots it for the child before any result is written back.
    let entry_frame = *tf;

    let result: KernelResult<u32> = match Syscall::from_number(entry_frame.v0) {
        Some(Syscall::Fork) => sys_fork(&entry_frame).map(|pid| pid.0),
        Some(Syscall::Execv) => sys_execv(
            VirtualAddress(entry_frame.a0),
            VirtualAddress(entry_frame.a1),
        )
        .map(|never| match never {}),
        Some(Syscall::Exit) => sys_exit(entry_frame.a0 as i32),
        Some(Syscall::Waitpid) => sys_waitpid(
            entry_frame.a0 as i32,
            VirtualAddress(entry_frame.a1),
            entry_frame.a2,
        )
        .map(|pid| pid.0),
        Some(Syscall::GetPid) => sys_getpid().map(|pid| pid.0),
        None => Err(KernelError::UnknownSyscall {
            number: entry_frame.v0,
        }),
    };

    match result {
        Ok(value) => {
            tf.v0 = value;
            tf.a3 = 0;
        }
        Err(err) => {
            tf.v0 = err.errno() as u32;
            tf.a3 = 1;
        }
    }
    tf.epc = tf.epc.wrapping_add(4);
}
