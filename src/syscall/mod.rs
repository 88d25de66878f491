//! The system-call surface.
//!
//! Arguments arrive as the raw A0–A5 register values of the calling
//! process and every call collapses to a single unsigned result, with
//! `usize::MAX` (-1) for all failures. Pointer arguments are addresses in
//! the *caller's* address space; the kernel touches them directly, relying
//! on the caller's inherited kernel mappings and identity-mapped buffers.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::fs::{resolve_path, FileType};
use crate::kernel::Kernel;
use crate::mm::page::PageAllocator;
use crate::proc::{elf, Pid, FILE_DESCRIPTOR_COUNT};

pub const SYS_READ: usize = 0;
pub const SYS_WRITE: usize = 1;
pub const SYS_OPEN: usize = 2;
pub const SYS_CLOSE: usize = 3;
pub const SYS_MMAP: usize = 9;
pub const SYS_MPROTECT: usize = 10;
pub const SYS_MUNMAP: usize = 11;
pub const SYS_GETPID: usize = 39;
pub const SYS_EXIT: usize = 60;
pub const SYS_GETPPID: usize = 110;
pub const SYS_SPAWN: usize = 314;

/// Every failure becomes -1 at this boundary.
pub const SYSCALL_ERROR: usize = usize::MAX;

/// Longest path accepted from userspace.
const PATH_MAX: usize = 4096;

/// Stack pages given to a spawned child.
const SPAWN_STACK_PAGES: usize = 1;

/// Copy a NUL-terminated string out of the caller's address space.
fn user_cstr(ptr: usize) -> Option<String> {
    if ptr == 0 {
        return None;
    }
    let mut bytes = Vec::new();
    for i in 0..PATH_MAX {
        let b = unsafe { *((ptr + i) as *const u8) };
        if b == 0 {
            return String::from_utf8(bytes).ok();
        }
        bytes.push(b);
    }
    None
}

/// Dispatch one system call for `pid`.
pub fn user_syscall(
    pid: Pid,
    number: usize,
    args: [usize; 6],
    kernel: &mut Kernel,
    alloc: &mut dyn PageAllocator,
) -> usize {
    match number {
        SYS_READ => {
            let (fd, buf, count) = (args[0], args[1], args[2]);
            if fd >= FILE_DESCRIPTOR_COUNT || (buf == 0 && count > 0) {
                return SYSCALL_ERROR;
            }
            let Some(file) = kernel
                .procs
                .fetch_mut(pid)
                .and_then(|p| p.fds_mut())
                .and_then(|fds| fds.get_mut(fd))
            else {
                return SYSCALL_ERROR;
            };
            let out = unsafe { core::slice::from_raw_parts_mut(buf as *mut u8, count) };
            file.read(out)
        }

        SYS_WRITE => {
            let (fd, buf, count) = (args[0], args[1], args[2]);
            if fd >= FILE_DESCRIPTOR_COUNT || (buf == 0 && count > 0) {
                return SYSCALL_ERROR;
            }
            let Some(file) = kernel
                .procs
                .fetch_mut(pid)
                .and_then(|p| p.fds_mut())
                .and_then(|fds| fds.get_mut(fd))
            else {
                return SYSCALL_ERROR;
            };
            let data = unsafe { core::slice::from_raw_parts(buf as *const u8, count) };
            file.write(data)
        }

        SYS_OPEN => {
            // Flags and mode are accepted but ignored: the volume is
            // read-only and permissions are not enforced.
            let Some(path) = user_cstr(args[0]) else {
                return SYSCALL_ERROR;
            };
            let Some(root) = kernel.root_dir.as_mut() else {
                return SYSCALL_ERROR;
            };
            let Some(entry) = resolve_path(root, &path) else {
                return SYSCALL_ERROR;
            };
            if entry.kind != FileType::Regular {
                return SYSCALL_ERROR;
            }
            let Some(fds) = kernel.procs.fetch_mut(pid).and_then(|p| p.fds_mut()) else {
                return SYSCALL_ERROR;
            };
            match fds.first_free(3) {
                Some(fd) => {
                    fds.set(fd, entry.file);
                    fd
                }
                None => SYSCALL_ERROR,
            }
        }

        SYS_CLOSE => {
            let fd = args[0];
            if fd >= FILE_DESCRIPTOR_COUNT {
                return SYSCALL_ERROR;
            }
            match kernel
                .procs
                .fetch_mut(pid)
                .and_then(|p| p.fds_mut())
                .and_then(|fds| fds.take(fd))
            {
                Some(file) => {
                    drop(file);
                    0
                }
                None => SYSCALL_ERROR,
            }
        }

        SYS_MMAP | SYS_MPROTECT | SYS_MUNMAP => SYSCALL_ERROR,

        SYS_GETPID => pid,

        SYS_EXIT => {
            kernel.procs.kill(pid, alloc);
            kernel.jobs.remove(pid);
            #[cfg(target_arch = "riscv64")]
            crate::arch::sbi::clear_timer();
            0
        }

        SYS_GETPPID => match kernel.procs.fetch(pid) {
            Some(p) => p.parent_pid(),
            None => SYSCALL_ERROR,
        },

        SYS_SPAWN => {
            let (stdin, stdout, stderr) = (args[3], args[4], args[5]);
            let Some(path) = user_cstr(args[0]) else {
                return SYSCALL_ERROR;
            };
            let Some(root) = kernel.root_dir.as_mut() else {
                return SYSCALL_ERROR;
            };
            let Some(mut entry) = resolve_path(root, &path) else {
                return SYSCALL_ERROR;
            };
            if entry.kind != FileType::Regular {
                return SYSCALL_ERROR;
            }

            let size = entry.file.size() as usize;
            let mut image = vec![0u8; size];
            if entry.file.read(&mut image) != size {
                return SYSCALL_ERROR;
            }
            let parsed = match elf::parse(&image) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("spawn of {}: not an executable ({})", path, e);
                    return SYSCALL_ERROR;
                }
            };

            let child = kernel
                .procs
                .load_elf(pid, &parsed, SPAWN_STACK_PAGES, alloc);
            if child == 0 {
                return SYSCALL_ERROR;
            }
            kernel.procs.init_kernel_mmu(child, &kernel.mmu_root);

            for (from, to) in [(stdin, 0), (stdout, 1), (stderr, 2)] {
                if from < FILE_DESCRIPTOR_COUNT {
                    kernel.procs.copy_fd((pid, from), (child, to));
                }
            }

            kernel.jobs.add(child);
            child
        }

        unknown => {
            log::warn!(
                "unknown syscall {:#x} (args {:#x} {:#x} {:#x} {:#x} {:#x} {:#x})",
                unknown,
                args[0],
                args[1],
                args[2],
                args[3],
                args[4],
                args[5]
            );
            SYSCALL_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ext2::fixtures;
    use crate::kernel::Kernel;
    use crate::mm::mmu::RootTable;
    use crate::mm::page::mock::MockArena;
    use crate::proc::{ProcessState, ProcessTable};
    use crate::sched::JobQueue;
    use crate::trap::plic::IrqTable;

    fn boot_kernel(arena: &mut MockArena) -> (Kernel, Pid) {
        let mut kernel = Kernel {
            procs: ProcessTable::new(8),
            jobs: JobQueue::new(16),
            irqs: IrqTable::new(),
            mmu_root: RootTable::new(arena).unwrap(),
            root_dir: Some(fixtures::mount_fixture()),
        };
        let image = elf::fixtures::echo_elf();
        let parsed = elf::parse(&image).unwrap();
        let pid = kernel.procs.load_elf(0, &parsed, 1, arena);
        assert_ne!(pid, 0);
        kernel.jobs.add(pid);
        (kernel, pid)
    }

    fn call(
        kernel: &mut Kernel,
        arena: &mut MockArena,
        pid: Pid,
        number: usize,
        args: [usize; 6],
    ) -> usize {
        user_syscall(pid, number, args, kernel, arena)
    }

    #[test]
    fn open_read_close_round_trip() {
        let mut arena = MockArena::with_pages(64);
        let (mut kernel, pid) = boot_kernel(&mut arena);

        let path = b"/hello.txt\0";
        let fd = call(
            &mut kernel,
            &mut arena,
            pid,
            SYS_OPEN,
            [path.as_ptr() as usize, 0, 0, 0, 0, 0],
        );
        assert_eq!(fd, 3);

        let mut buf = [0u8; 64];
        let n = call(
            &mut kernel,
            &mut arena,
            pid,
            SYS_READ,
            [fd, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0],
        );
        assert_eq!(n, fixtures::HELLO.len());
        assert_eq!(&buf[..n], fixtures::HELLO);

        // At end of file another read returns 0 bytes.
        let n = call(
            &mut kernel,
            &mut arena,
            pid,
            SYS_READ,
            [fd, buf.as_mut_ptr() as usize, 1, 0, 0, 0],
        );
        assert_eq!(n, 0);

        assert_eq!(
            call(&mut kernel, &mut arena, pid, SYS_CLOSE, [fd, 0, 0, 0, 0, 0]),
            0
        );
        // Closing twice is an error.
        assert_eq!(
            call(&mut kernel, &mut arena, pid, SYS_CLOSE, [fd, 0, 0, 0, 0, 0]),
            SYSCALL_ERROR
        );
    }

    #[test]
    fn open_rejects_directories_and_misses() {
        let mut arena = MockArena::with_pages(64);
        let (mut kernel, pid) = boot_kernel(&mut arena);

        let dir = b"/a\0";
        assert_eq!(
            call(
                &mut kernel,
                &mut arena,
                pid,
                SYS_OPEN,
                [dir.as_ptr() as usize, 0, 0, 0, 0, 0]
            ),
            SYSCALL_ERROR
        );
        let missing = b"/nope\0";
        assert_eq!(
            call(
                &mut kernel,
                &mut arena,
                pid,
                SYS_OPEN,
                [missing.as_ptr() as usize, 0, 0, 0, 0, 0]
            ),
            SYSCALL_ERROR
        );
    }

    #[test]
    fn descriptor_validation() {
        let mut arena = MockArena::with_pages(64);
        let (mut kernel, pid) = boot_kernel(&mut arena);
        let mut buf = [0u8; 8];
        assert_eq!(
            call(
                &mut kernel,
                &mut arena,
                pid,
                SYS_READ,
                [3, buf.as_mut_ptr() as usize, 8, 0, 0, 0]
            ),
            SYSCALL_ERROR
        );
        assert_eq!(
            call(
                &mut kernel,
                &mut arena,
                pid,
                SYS_READ,
                [FILE_DESCRIPTOR_COUNT, buf.as_mut_ptr() as usize, 8, 0, 0, 0]
            ),
            SYSCALL_ERROR
        );
        assert_eq!(
            call(&mut kernel, &mut arena, pid, SYS_MMAP, [0; 6]),
            SYSCALL_ERROR
        );
    }

    #[test]
    fn pid_calls_report_the_family() {
        let mut arena = MockArena::with_pages(64);
        let (mut kernel, pid) = boot_kernel(&mut arena);
        assert_eq!(call(&mut kernel, &mut arena, pid, SYS_GETPID, [0; 6]), pid);
        assert_eq!(call(&mut kernel, &mut arena, pid, SYS_GETPPID, [0; 6]), 0);
    }

    #[test]
    fn spawn_creates_a_child_with_inherited_stdio() {
        let mut arena = MockArena::with_pages(128);
        let (mut kernel, pid) = boot_kernel(&mut arena);

        // Give the parent an open file to pass down as the child's stdout.
        let hello = b"/hello.txt\0";
        let fd = call(
            &mut kernel,
            &mut arena,
            pid,
            SYS_OPEN,
            [hello.as_ptr() as usize, 0, 0, 0, 0, 0],
        );
        assert_eq!(fd, 3);

        let path = b"/bin/echo\0";
        let child = call(
            &mut kernel,
            &mut arena,
            pid,
            SYS_SPAWN,
            [path.as_ptr() as usize, 0, 0, fd, fd, fd],
        );
        assert_ne!(child, SYSCALL_ERROR);
        assert_ne!(child, 0);
        assert_ne!(child, pid);

        let row = kernel.procs.fetch(child).unwrap();
        assert_eq!(row.state(), ProcessState::Wait);
        assert_eq!(row.parent_pid(), pid);
        assert!(row.fds().unwrap().get(0).is_some());
        assert!(row.fds().unwrap().get(1).is_some());
        assert!(row.fds().unwrap().get(2).is_some());

        // The child is queued for the scheduler.
        assert_eq!(kernel.jobs.next(), pid);
        assert_eq!(kernel.jobs.next(), child);

        // The parent's identity is untouched.
        assert_eq!(call(&mut kernel, &mut arena, pid, SYS_GETPID, [0; 6]), pid);
    }

    #[test]
    fn exit_releases_the_process() {
        let mut arena = MockArena::with_pages(64);
        let (mut kernel, pid) = boot_kernel(&mut arena);
        let hello = b"/hello.txt\0";
        call(
            &mut kernel,
            &mut arena,
            pid,
            SYS_OPEN,
            [hello.as_ptr() as usize, 0, 0, 0, 0, 0],
        );

        assert_eq!(call(&mut kernel, &mut arena, pid, SYS_EXIT, [0; 6]), 0);
        let row = kernel.procs.fetch(pid).unwrap();
        assert_eq!(row.state(), ProcessState::Dead);
        assert!(row.mmu_root().is_none());
        assert!(row.fds().is_none());
        assert_eq!(kernel.jobs.next(), 0);
        // The kernel root is the only arena allocation left.
        assert_eq!(arena.outstanding(), 1);
    }

    #[test]
    fn unknown_numbers_fail_loudly() {
        let mut arena = MockArena::with_pages(64);
        let (mut kernel, pid) = boot_kernel(&mut arena);
        assert_eq!(
            call(&mut kernel, &mut arena, pid, 0x5555, [1, 2, 3, 4, 5, 6]),
            SYSCALL_ERROR
        );
    }
}
