//! The execv system call
//!
//! Replaces the current process image: marshal the program name and
//! argument vector into the kernel, load the new image into a fresh
//! address space, rebuild the argument block on the new user stack, and
//! enter user mode at the image's entry point. Until the point of no
//! return every failure swaps the old address space back in, so a failed
//! execv leaves the caller exactly as it was.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::convert::Infallible;

use crate::arch::mips::usermode;
use crate::error::{KernelError, KernelResult};
use crate::fs;
use crate::mm::{self, addrspace, usercopy, AddressSpace, VirtualAddress};
use crate::process;
use crate::raii::ScopeGuard;

/// Upper bound on one argument string, terminator included.
pub const ARG_MAX_LEN: usize = 128;

/// Upper bound on the program path, terminator included.
pub const PATH_MAX_LEN: usize = 1024;

/// Replace the current process image. Does not return on success.
pub fn sys_execv(progname: VirtualAddress, args: VirtualAddress) -> KernelResult<Infallible> {
    let proc = process::current().ok_or(KernelError::NoSuchProcess { pid: 0 })?;

    // Marshal the path and the argument strings out of the old image.
    let (path, kargs) = {
        let guard = proc.aspace.lock();
        let aspace = guard.as_ref().ok_or(KernelError::BadAddress {
            addr: progname.0,
        })?;
        let path_bytes = usercopy::copyinstr(aspace, progname, PATH_MAX_LEN)?;
        let path = String::from_utf8(path_bytes)
            .map_err(|_| KernelError::InvalidArgument { name: "progname" })?;
        (path, copy_in_args(aspace, args)?)
    };

    let file = fs::open_program(&path)?;

    // Swap in a fresh address space and activate it; from here on, any
    // failure restores the old image before returning.
    let old_aspace = {
        let mut guard = proc.aspace.lock();
        core::mem::replace(
            &mut *guard,
            Some(AddressSpace::new(mm::kernel_coremap())),
        )
    };
    addrspace::as_activate();
    let restore = {
        let proc = Arc::clone(&proc);
        ScopeGuard::new(move || {
            *proc.aspace.lock() = old_aspace;
            addrspace::as_activate();
        })
    };

    // Load the executable, then build the stack image.
    let entrypoint = {
        let mut guard = proc.aspace.lock();
        let aspace = guard.as_mut().ok_or(KernelError::BadAddress { addr: 0 })?;
        file.load_into(aspace)?
    };
    drop(file);

    let (argc, argv_ptr, stackptr) = {
        let guard = proc.aspace.lock();
        let aspace = guard.as_ref().ok_or(KernelError::BadAddress { addr: 0 })?;
        let stacktop = aspace.define_stack();
        copyout_args(aspace, &kargs, stacktop)?
    };

    // Point of no return: keep the new image, release the old one.
    restore.cancel();
    log::debug!(
        "process {} execs '{}' with {} args, entry {:#x}",
        proc.pid,
        path,
        argc,
        entrypoint.0
    );
    usermode::enter_new_process(argc, argv_ptr, stackptr, entrypoint)
}

/// Copy the NULL-terminated user argument vector into kernel buffers.
///
/// Each argument is bounded by [`ARG_MAX_LEN`]; overrunning it is an error
/// rather than a silent truncation.
fn copy_in_args(aspace: &AddressSpace, argv: VirtualAddress) -> KernelResult<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    let mut index = 0u32;
    loop {
        let mut raw = [0u8; 4];
        usercopy::copyin(aspace, argv.add(index * 4), &mut raw)?;
        let ptr = u32::from_ne_bytes(raw);
        if ptr == 0 {
            return Ok(out);
        }
        let arg = usercopy::copyinstr(aspace, VirtualAddress(ptr), ARG_MAX_LEN).map_err(|err| {
            match err {
                KernelError::NameTooLong { max } => KernelError::ArgumentTooLong { max },
                other => other,
            }
        })?;
        out.push(arg);
        index += 1;
    }
}

/// Build the argument block on a fresh user stack.
///
/// From the stack top downward: the argument strings (NUL-terminated, last
/// argument pushed first), padding down to a 4-byte boundary, then the
/// argv pointer vector pushed in reverse with its terminating NULL at the
/// highest slot. The returned stack pointer is the vector's base aligned
/// down to the 8-byte entry convention.
fn copyout_args(
    aspace: &AddressSpace,
    kargs: &[Vec<u8>],
    stacktop: VirtualAddress,
) -> KernelResult<(usize, VirtualAddress, VirtualAddress)> {
    let mut sp = stacktop.0;

    // String area, last argument first; remember where each string landed.
    let mut user_ptrs: Vec<u32> = alloc::vec![0; kargs.len() + 1];
    for (i, arg) in kargs.iter().enumerate().rev() {
        let mut bytes = arg.clone();
        bytes.push(0);
        sp -= bytes.len() as u32;
        user_ptrs[i] = sp;
        usercopy::copyout(aspace, &bytes, VirtualAddress(sp))?;
    }

    // Pointer vector, reverse-pushed so the terminating NULL sits highest.
    sp &= !3;
    for ptr in user_ptrs.iter().rev() {
        sp -= 4;
        usercopy::copyout(aspace, &ptr.to_ne_bytes(), VirtualAddress(sp))?;
    }

    let argv_ptr = VirtualAddress(sp);
    let entry_sp = VirtualAddress(sp & !7);
    Ok((kargs.len(), argv_ptr, entry_sp))
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::mm::{RegionFlags, PAGE_SIZE, USERSTACK};
    use crate::test_support;

    const NEW_TEXT_BASE: u32 = 0x0040_0000;
    const NEW_DATA_BASE: u32 = 0x1000_0000;
    const NEW_ENTRY: u32 = 0x0040_0040;

    /// Minimal executable: one text page with a recognizable first word,
    /// one data page.
    struct FakeProgram;

    impl fs::ExecFile for FakeProgram {
        fn load_into(&self, aspace: &mut AddressSpace) -> KernelResult<VirtualAddress> {
            aspace.define_region(
                VirtualAddress(NEW_TEXT_BASE),
                PAGE_SIZE,
                RegionFlags::READ | RegionFlags::EXEC,
            )?;
            aspace.define_region(
                VirtualAddress(NEW_DATA_BASE),
                PAGE_SIZE,
                RegionFlags::READ | RegionFlags::WRITE,
            )?;
            aspace.prepare_load()?;
            usercopy::copyout(aspace, b"MICAPROG", VirtualAddress(NEW_TEXT_BASE))?;
            aspace.complete_load();
            Ok(VirtualAddress(NEW_ENTRY))
        }
    }

    /// Loader that fails after the swap, to exercise the restore path.
    struct BrokenProgram;

    impl fs::ExecFile for BrokenProgram {
        fn load_into(&self, _aspace: &mut AddressSpace) -> KernelResult<VirtualAddress> {
            Err(KernelError::OutOfMemory { requested_pages: 1 })
        }
    }

    /// Write `strings` and an argv vector pointing at them into the
    /// fixture's data region; returns (progname_va, argv_va).
    fn stage_user_args(
        aspace: &AddressSpace,
        path: &[u8],
        args: &[&[u8]],
    ) -> (VirtualAddress, VirtualAddress) {
        let base = test_support::DATA_BASE;
        let progname_va = VirtualAddress(base);
        let mut with_nul = path.to_vec();
        with_nul.push(0);
        usercopy::copyout(aspace, &with_nul, progname_va).expect("stage progname");

        let mut cursor = base + 256;
        let mut ptrs: Vec<u32> = Vec::new();
        for arg in args {
            let mut bytes = arg.to_vec();
            bytes.push(0);
            usercopy::copyout(aspace, &bytes, VirtualAddress(cursor)).expect("stage arg");
            ptrs.push(cursor);
            cursor += 64;
        }
        ptrs.push(0);
        let argv_va = VirtualAddress(cursor);
        for (i, ptr) in ptrs.iter().enumerate() {
            usercopy::copyout(
                aspace,
                &ptr.to_ne_bytes(),
                VirtualAddress(argv_va.0 + (i * 4) as u32),
            )
            .expect("stage argv slot");
        }
        (progname_va, argv_va)
    }

    #[test]
    fn argument_block_layout_matches_the_entry_convention() {
        let fixture = test_support::process_with_aspace("exec-layout", 1, 2);
        let guard = fixture.proc.aspace.lock();
        let aspace = guard.as_ref().expect("fixture has aspace");

        let kargs: Vec<Vec<u8>> = vec![b"/bin/x".to_vec(), b"hi".to_vec()];
        let (argc, argv_ptr, sp) =
            copyout_args(aspace, &kargs, VirtualAddress(USERSTACK)).expect("stack fits");

        assert_eq!(argc, 2);
        assert_eq!(sp.0 % 8, 0, "entry stack pointer is 8-byte aligned");
        assert!(sp.0 <= argv_ptr.0);
        assert_eq!(argv_ptr.0 % 4, 0, "pointer vector is word aligned");

        // Vector: argv[0], argv[1], NULL.
        let mut vector = [0u8; 12];
        usercopy::copyin(aspace, argv_ptr, &mut vector).expect("vector readable");
        let argv0 = u32::from_ne_bytes(vector[0..4].try_into().expect("4 bytes"));
        let argv1 = u32::from_ne_bytes(vector[4..8].try_into().expect("4 bytes"));
        let argv2 = u32::from_ne_bytes(vector[8..12].try_into().expect("4 bytes"));
        assert_eq!(argv2, 0, "argv[argc] is NULL");
        assert!(argv0 > argv_ptr.0 && argv0 < USERSTACK, "argv[0] above vector");

        // Strings: byte-identical, NUL-terminated, in the staged order.
        let aspace_strings = [
            (argv0, b"/bin/x".as_slice()),
            (argv1, b"hi".as_slice()),
        ];
        for (ptr, expected) in aspace_strings {
            let got = usercopy::copyinstr(aspace, VirtualAddress(ptr), ARG_MAX_LEN)
                .expect("string readable");
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn execv_replaces_image_and_enters_with_marshalled_args() {
        test_support::ensure_vm();
        fs::register_program("/bin/argtest", Arc::new(FakeProgram));

        let fixture = test_support::process_with_aspace("exec-full", 1, 2);
        let proc = Arc::clone(&fixture.proc);
        let pid = proc.pid;

        let (progname_va, argv_va) = {
            let guard = proc.aspace.lock();
            let aspace = guard.as_ref().expect("old image");
            stage_user_args(aspace, b"/bin/argtest", &[b"/bin/argtest", b"hi"])
        };

        let (tx, rx) = std::sync::mpsc::channel();
        usermode::set_exec_entry(pid, move |argc, argv, sp, entry| {
            // Runs on the exec'ing thread, inside the new image.
            let proc = process::current().expect("exec keeps the process current");
            let guard = proc.aspace.lock();
            let aspace = guard.as_ref().expect("new image installed");

            let mut strings = Vec::new();
            let mut null_slot = u32::MAX;
            for i in 0..=argc {
                let mut raw = [0u8; 4];
                usercopy::copyin(aspace, argv.add((i * 4) as u32), &mut raw)
                    .expect("argv slot readable");
                let ptr = u32::from_ne_bytes(raw);
                if i == argc {
                    null_slot = ptr;
                } else {
                    strings.push(
                        usercopy::copyinstr(aspace, VirtualAddress(ptr), ARG_MAX_LEN)
                            .expect("argv string readable"),
                    );
                }
            }
            let mut text_word = [0u8; 8];
            usercopy::copyin(aspace, VirtualAddress(NEW_TEXT_BASE), &mut text_word)
                .expect("new text readable");
            tx.send((argc, strings, null_slot, sp.0, entry.0, text_word))
                .expect("report back to the test");
        });

        std::thread::spawn(move || {
            test_support::run_as(pid, || {
                // Errors would fall through to the park below; the test
                // then fails on the receive timeout.
                let _ = sys_execv(progname_va, argv_va);
            });
        });

        let (argc, strings, null_slot, sp, entry, text_word) = rx
            .recv_timeout(core::time::Duration::from_secs(30))
            .expect("exec'd program reached its entry hook");
        assert_eq!(argc, 2);
        assert_eq!(strings[0], b"/bin/argtest");
        assert_eq!(strings[1], b"hi");
        assert_eq!(null_slot, 0, "argv[argc] is NULL");
        assert_eq!(sp % 8, 0, "initial stack pointer is 8-byte aligned");
        assert_eq!(entry, NEW_ENTRY);
        assert_eq!(&text_word, b"MICAPROG", "new text is in place");
    }

    #[test]
    fn failed_load_restores_the_old_image() {
        test_support::ensure_vm();
        fs::register_program("/bin/broken", Arc::new(BrokenProgram));

        let fixture = test_support::process_with_aspace("exec-broken", 1, 2);
        let marker_va = VirtualAddress(test_support::DATA_BASE + 512);
        {
            let guard = fixture.proc.aspace.lock();
            usercopy::copyout(guard.as_ref().expect("aspace"), b"old-image", marker_va)
                .expect("stage marker");
        }

        let err = fixture.with_current(|| {
            let guard = fixture.proc.aspace.lock();
            let aspace = guard.as_ref().expect("aspace");
            let (progname_va, argv_va) = stage_user_args(aspace, b"/bin/broken", &[]);
            drop(guard);
            sys_execv(progname_va, argv_va).expect_err("loader fails")
        });
        assert!(matches!(err, KernelError::OutOfMemory { .. }));

        let guard = fixture.proc.aspace.lock();
        let mut marker = [0u8; 9];
        usercopy::copyin(guard.as_ref().expect("old image back"), marker_va, &mut marker)
            .expect("old mapping still valid");
        assert_eq!(&marker, b"old-image");
    }

    #[test]
    fn unknown_program_and_oversized_argument_fail_early() {
        test_support::ensure_vm();
        let fixture = test_support::process_with_aspace("exec-errors", 1, 2);
        fixture.with_current(|| {
            let guard = fixture.proc.aspace.lock();
            let aspace = guard.as_ref().expect("aspace");

            let (progname_va, argv_va) = stage_user_args(aspace, b"/bin/nonexistent", &[]);
            drop(guard);
            let err = sys_execv(progname_va, argv_va).expect_err("no such program");
            assert_eq!(err, KernelError::NoSuchFile);

            // One argument of ARG_MAX_LEN bytes with no terminator in range.
            let guard = fixture.proc.aspace.lock();
            let aspace = guard.as_ref().expect("aspace");
            let big = vec![b'x'; ARG_MAX_LEN];
            let arg_va = test_support::DATA_BASE + 2048;
            usercopy::copyout(aspace, &big, VirtualAddress(arg_va)).expect("stage big arg");
            let argv2_va = VirtualAddress(arg_va + 512);
            usercopy::copyout(aspace, &arg_va.to_ne_bytes(), argv2_va).expect("slot 0");
            usercopy::copyout(aspace, &0u32.to_ne_bytes(), argv2_va.add(4)).expect("slot 1");
            let (progname_va, _) = stage_user_args(aspace, b"/bin/anything", &[]);
            drop(guard);

            let err = sys_execv(progname_va, argv2_va).expect_err("argument too long");
            assert_eq!(err, KernelError::ArgumentTooLong { max: ARG_MAX_LEN });
        });
    }
}
