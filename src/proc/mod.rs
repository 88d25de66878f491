//! Process lifecycle: the process table, address-space construction from a
//! parsed executable, and per-process file descriptors.
//!
//! Rows of the table are an arena indexed by pid. Nothing ever hands out an
//! owning reference to a row; callers look processes up by pid each time.
//! A dead row is a free slot, so pids get reused once the monotonic
//! allocator has run the table down.

pub mod elf;

use alloc::boxed::Box;
use core::mem::size_of;

use crate::arch::cpu::{reg, Register};
use crate::fs::GenericFile;
use crate::mm::mmu::{EntryBits, RootTable};
use crate::mm::page::PageAllocator;
use crate::mm::{PAGE_ORDER, PAGE_SIZE};
use crate::trap::TrapFrame;
use crate::util::align::align_up;
use elf::LoadedElf;

/// Process identifier. Zero is reserved for "no process".
pub type Pid = usize;

/// File handles per process.
pub const FILE_DESCRIPTOR_COUNT: usize = 64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ProcessState {
    /// Runnable, waiting for the scheduler.
    Wait,
    /// Currently on the hart.
    Running,
    /// Finished; the row is free for reuse.
    Dead,
}

/// Per-process file descriptor table.
///
/// The struct is page-aligned (and page-granular via the allocator) so the
/// loader can identity-map its backing pages into the process address
/// space, letting syscall handlers touch the slots while the process's own
/// translation is installed.
#[repr(align(4096))]
pub struct FdTable {
    slots: [Option<GenericFile>; FILE_DESCRIPTOR_COUNT],
}

impl FdTable {
    pub fn new() -> FdTable {
        FdTable {
            slots: core::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, fd: usize) -> Option<&GenericFile> {
        self.slots.get(fd)?.as_ref()
    }

    pub fn get_mut(&mut self, fd: usize) -> Option<&mut GenericFile> {
        self.slots.get_mut(fd)?.as_mut()
    }

    pub fn set(&mut self, fd: usize, file: GenericFile) {
        if fd < FILE_DESCRIPTOR_COUNT {
            self.slots[fd] = Some(file);
        }
    }

    /// Release the handle in `fd`. Returns it so the caller decides when
    /// the drop (and possibly the unmount) happens.
    pub fn take(&mut self, fd: usize) -> Option<GenericFile> {
        self.slots.get_mut(fd)?.take()
    }

    /// Lowest free slot at or above `from`.
    pub fn first_free(&self, from: usize) -> Option<usize> {
        (from..FILE_DESCRIPTOR_COUNT).find(|&i| self.slots[i].is_none())
    }
}

/// One row of the process table.
pub struct Process {
    pid: Pid,
    parent_pid: Pid,
    state: ProcessState,
    /// Saved register frame; also holds the pc and the pid for the trap
    /// entry path.
    pub frame: TrapFrame,
    mmu_root: Option<RootTable>,
    fds: Option<Box<FdTable>>,
}

impl Process {
    fn vacant() -> Process {
        Process {
            pid: 0,
            parent_pid: 0,
            state: ProcessState::Dead,
            frame: TrapFrame::zeroed(),
            mmu_root: None,
            fds: None,
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn parent_pid(&self) -> Pid {
        self.parent_pid
    }

    #[inline]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: ProcessState) {
        self.state = state;
    }

    #[inline]
    pub fn mmu_root(&self) -> Option<&RootTable> {
        self.mmu_root.as_ref()
    }

    #[inline]
    pub fn fds(&self) -> Option<&FdTable> {
        self.fds.as_deref()
    }

    #[inline]
    pub fn fds_mut(&mut self) -> Option<&mut FdTable> {
        self.fds.as_deref_mut()
    }
}

/// The process arena. Sized to the requested maximum rounded up to a page
/// boundary, so the capacity may come out slightly above the request.
pub struct ProcessTable {
    entries: Box<[Process]>,
    next_pid: Pid,
}

impl ProcessTable {
    pub fn new(max_pids: usize) -> ProcessTable {
        let bytes = max_pids * size_of::<Process>();
        let pages = align_up(bytes, PAGE_ORDER) / PAGE_SIZE;
        let capacity = pages * PAGE_SIZE / size_of::<Process>();
        ProcessTable {
            entries: (0..capacity).map(|_| Process::vacant()).collect(),
            next_pid: 1,
        }
    }

    /// Number of rows (the effective maximum pid plus one).
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Claim a fresh row. Monotonic pids until the table has filled once,
    /// then dead rows are scavenged. Returns 0 when every row is live.
    pub fn spawn(&mut self, parent_pid: Pid) -> Pid {
        if self.next_pid < self.entries.len() {
            let pid = self.next_pid;
            self.next_pid += 1;
            self.reset_row(pid, parent_pid);
            return pid;
        }
        for pid in 1..self.entries.len() {
            if self.entries[pid].state == ProcessState::Dead {
                self.reset_row(pid, parent_pid);
                return pid;
            }
        }
        log::warn!("process table full");
        0
    }

    fn reset_row(&mut self, pid: Pid, parent_pid: Pid) {
        let row = &mut self.entries[pid];
        row.pid = pid;
        row.parent_pid = parent_pid;
        row.state = ProcessState::Wait;
        row.frame = TrapFrame::zeroed();
        row.frame.pid = pid;
        row.mmu_root = None;
        row.fds = None;
    }

    pub fn fetch(&self, pid: Pid) -> Option<&Process> {
        self.entries.get(pid).filter(|p| p.pid == pid && pid != 0)
    }

    pub fn fetch_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.entries
            .get_mut(pid)
            .filter(|p| p.pid == pid && pid != 0)
    }

    /// Build a process out of a parsed executable: fresh page table, the
    /// fd table identity-mapped into it, user pages for every segment with
    /// the bytes copied in, and `stack_pages` of stack above the highest
    /// loaded page. Returns 0 on failure.
    pub fn load_elf(
        &mut self,
        parent_pid: Pid,
        elf: &LoadedElf<'_>,
        stack_pages: usize,
        alloc: &mut dyn PageAllocator,
    ) -> Pid {
        let pid = self.spawn(parent_pid);
        if pid == 0 {
            return 0;
        }
        let Some(mut root) = RootTable::new(alloc) else {
            self.entries[pid].state = ProcessState::Dead;
            return 0;
        };

        let fds = Box::new(FdTable::new());
        let fd_base = &*fds as *const FdTable as usize;
        let mut offset = 0;
        while offset < size_of::<FdTable>() {
            root.map(
                fd_base + offset,
                fd_base + offset,
                EntryBits::ReadWrite.val(),
                alloc,
            );
            offset += PAGE_SIZE;
        }

        let mut top = 0usize;
        for segment in &elf.segments {
            let mut copied = 0;
            while copied < segment.data.len() {
                let va = segment.vaddr + copied;
                let Some(page) = root.alloc_page_and_map(
                    va,
                    EntryBits::UserReadWriteExecute.val(),
                    alloc,
                ) else {
                    root.destroy(alloc);
                    self.entries[pid].state = ProcessState::Dead;
                    return 0;
                };
                let page_offset = va & (PAGE_SIZE - 1);
                let chunk = (PAGE_SIZE - page_offset).min(segment.data.len() - copied);
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        segment.data.as_ptr().add(copied),
                        (page + page_offset) as *mut u8,
                        chunk,
                    );
                }
                copied += chunk;
            }
            let segment_top = align_up(segment.vaddr + segment.data.len(), PAGE_ORDER);
            top = top.max(segment_top);
        }

        let mut stack_top = top;
        for _ in 0..stack_pages {
            if root
                .alloc_page_and_map(stack_top, EntryBits::UserReadWrite.val(), alloc)
                .is_none()
            {
                root.destroy(alloc);
                self.entries[pid].state = ProcessState::Dead;
                return 0;
            }
            stack_top += PAGE_SIZE;
        }

        let row = &mut self.entries[pid];
        row.frame.pc = elf.entry;
        row.frame.xs[reg(Register::Sp)] = stack_top;
        row.frame.xs[reg(Register::Fp)] = stack_top;
        row.mmu_root = Some(root);
        row.fds = Some(fds);
        pid
    }

    /// Copy the kernel mappings into a process's root table so it can trap
    /// into supervisor code while its own translation is installed.
    pub fn init_kernel_mmu(&mut self, pid: Pid, kernel_root: &RootTable) {
        if let Some(row) = self.fetch_mut(pid) {
            if let Some(root) = row.mmu_root.as_mut() {
                root.copy_kernel_entries(kernel_root);
            }
        }
    }

    /// Duplicate the file behind `from` into slot `to`. Used to wire a
    /// child's standard descriptors from its parent.
    pub fn copy_fd(&mut self, from: (Pid, usize), to: (Pid, usize)) -> bool {
        let Some(dup) = self
            .fetch(from.0)
            .and_then(|p| p.fds())
            .and_then(|fds| fds.get(from.1))
            .and_then(|file| file.duplicate())
        else {
            return false;
        };
        match self.fetch_mut(to.0).and_then(|p| p.fds_mut()) {
            Some(fds) => {
                fds.set(to.1, dup);
                true
            }
            None => false,
        }
    }

    /// Mark the process dead and release everything it owns: the page
    /// table tree (with its pool-owned pages) and the open files.
    pub fn kill(&mut self, pid: Pid, alloc: &mut dyn PageAllocator) {
        let Some(row) = self.fetch_mut(pid) else {
            return;
        };
        row.state = ProcessState::Dead;
        if let Some(root) = row.mmu_root.take() {
            root.destroy(alloc);
        }
        row.fds = None;
    }
}
