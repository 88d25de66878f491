//! Cooperative round-robin scheduling.
//!
//! Runnable pids sit in a fixed ring; slot value 0 means empty. The
//! scheduler cursor walks the ring and every selection starts where the
//! previous one left off, so jobs are served strictly in turn. Nothing
//! here ever preempts: the CPU changes hands only when a process exits or
//! traps.

use alloc::boxed::Box;
use alloc::vec;

use crate::mm::{PAGE_ORDER, PAGE_SIZE};
use crate::proc::Pid;
use crate::util::align::align_up;

/// Ring of runnable pids.
pub struct JobQueue {
    jobs: Box<[Pid]>,
    cursor: usize,
}

impl JobQueue {
    /// The requested capacity is rounded up to fill whole pages, matching
    /// the granularity the slots are allocated with.
    pub fn new(capacity: usize) -> JobQueue {
        let bytes = align_up(capacity * core::mem::size_of::<Pid>(), PAGE_ORDER);
        let slots = bytes.max(PAGE_SIZE) / core::mem::size_of::<Pid>();
        JobQueue {
            jobs: vec![0; slots].into_boxed_slice(),
            cursor: 0,
        }
    }

    /// Put a pid into the first free slot. False when the ring is full.
    pub fn add(&mut self, pid: Pid) -> bool {
        if pid == 0 {
            return false;
        }
        for slot in self.jobs.iter_mut() {
            if *slot == 0 {
                *slot = pid;
                return true;
            }
        }
        log::warn!("job queue full, dropping pid {}", pid);
        false
    }

    /// Next runnable pid in ring order, or 0 when the ring is empty. The
    /// cursor advances past the returned slot so repeated calls rotate
    /// through every job.
    pub fn next(&mut self) -> Pid {
        let len = self.jobs.len();
        for i in 0..len {
            let index = (self.cursor + i) % len;
            if self.jobs[index] != 0 {
                self.cursor = (index + 1) % len;
                return self.jobs[index];
            }
        }
        0
    }

    /// Drop every occurrence of `pid` from the ring.
    pub fn remove(&mut self, pid: Pid) {
        if pid == 0 {
            return;
        }
        for slot in self.jobs.iter_mut() {
            if *slot == pid {
                *slot = 0;
            }
        }
    }
}

/// Install a process's translation and resume it in user mode. This is
/// the one place the kernel leaves Rust: the register restore and `sret`
/// live in the assembly stub.
#[cfg(target_arch = "riscv64")]
pub fn jump_to(kernel: &mut crate::kernel::Kernel, pid: Pid) -> ! {
    use crate::proc::ProcessState;

    let row = match kernel.procs.fetch_mut(pid) {
        Some(row) if row.mmu_root().is_some() => row,
        _ => {
            log::error!("jump_to: pid {} is not runnable", pid);
            crate::arch::halt();
        }
    };
    row.set_state(ProcessState::Running);
    let satp = row.mmu_root().map(|r| r.satp()).unwrap_or(0);
    let frame = &row.frame as *const crate::trap::TrapFrame;
    // satp_write fences, so the new tree is live before the sret.
    crate::arch::cpu::satp_write(satp);
    unsafe { crate::asm::enter_user_frame(frame) }
}

/// Pick jobs off the ring until one is runnable and enter it. Parks the
/// hart when the ring runs dry.
#[cfg(target_arch = "riscv64")]
pub fn schedule_loop(kernel: &mut crate::kernel::Kernel) -> ! {
    use crate::proc::ProcessState;

    loop {
        let pid = kernel.jobs.next();
        if pid == 0 {
            log::info!("no runnable processes; parking hart");
            crate::arch::halt();
        }
        match kernel.procs.fetch(pid).map(|p| p.state()) {
            Some(ProcessState::Wait) | Some(ProcessState::Running) => jump_to(kernel, pid),
            _ => kernel.jobs.remove(pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_in_insertion_order() {
        let mut queue = JobQueue::new(16);
        assert!(queue.add(1));
        assert!(queue.add(2));
        assert!(queue.add(3));

        assert_eq!(queue.next(), 1);
        assert_eq!(queue.next(), 2);
        assert_eq!(queue.next(), 3);
        // Fourth selection wraps around.
        assert_eq!(queue.next(), 1);
    }

    #[test]
    fn empty_ring_yields_zero() {
        let mut queue = JobQueue::new(4);
        assert_eq!(queue.next(), 0);
        queue.add(7);
        queue.remove(7);
        assert_eq!(queue.next(), 0);
    }

    #[test]
    fn removed_jobs_are_skipped() {
        let mut queue = JobQueue::new(8);
        queue.add(1);
        queue.add(2);
        queue.add(3);
        queue.remove(2);
        assert_eq!(queue.next(), 1);
        assert_eq!(queue.next(), 3);
        assert_eq!(queue.next(), 1);
    }

    #[test]
    fn zero_pid_is_rejected() {
        let mut queue = JobQueue::new(4);
        assert!(!queue.add(0));
        assert_eq!(queue.next(), 0);
    }
}
