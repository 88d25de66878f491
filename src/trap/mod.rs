//! Trap classification and dispatch.
//!
//! The assembly stub spills the whole register state into the running
//! process's [`TrapFrame`] and calls in here with `scause`. Asynchronous
//! causes go to the PLIC path; the one synchronous cause a healthy system
//! produces is the user `ecall`, which is bridged into the syscall layer.
//! Everything else is fatal by design: this is a bring-up kernel and an
//! unexpected trap means state corruption, not something to limp through.

pub mod plic;

use core::mem::size_of;

use static_assertions::const_assert_eq;

use crate::arch::cpu::{reg, Register};
use crate::kernel::Kernel;
use crate::mm::page::PageAllocator;
use crate::proc::Pid;

const ASYNC_FLAG: usize = 1 << 63;

/// Supervisor external interrupt.
const CAUSE_EXTERNAL: usize = 9;
/// Environment call from user mode.
const CAUSE_USER_ECALL: usize = 8;

/// Saved execution state of a process. The assembly stubs index into this
/// by fixed offsets: integer registers at 0, floating registers at 256,
/// pc at 512, pid at 520.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct TrapFrame {
    pub xs: [usize; 32],
    pub fs: [usize; 32],
    pub pc: usize,
    pub pid: Pid,
}

const_assert_eq!(size_of::<TrapFrame>(), 66 * 8);

impl TrapFrame {
    pub const fn zeroed() -> TrapFrame {
        TrapFrame {
            xs: [0; 32],
            fs: [0; 32],
            pc: 0,
            pid: 0,
        }
    }
}

/// Classify and service one trap against the kernel state. On return the
/// frame holds the state to resume with.
pub fn dispatch(
    scause: usize,
    frame: &mut TrapFrame,
    kernel: &mut Kernel,
    alloc: &mut dyn PageAllocator,
) {
    if scause & ASYNC_FLAG != 0 {
        match scause & !ASYNC_FLAG {
            CAUSE_EXTERNAL => plic::handle_mei(&kernel.irqs),
            other => {
                log::error!("unhandled asynchronous interrupt {:#x}", other);
                crate::arch::halt();
            }
        }
    } else {
        match scause {
            CAUSE_USER_ECALL => {
                let number = frame.xs[reg(Register::A7)];
                let args = [
                    frame.xs[reg(Register::A0)],
                    frame.xs[reg(Register::A1)],
                    frame.xs[reg(Register::A2)],
                    frame.xs[reg(Register::A3)],
                    frame.xs[reg(Register::A4)],
                    frame.xs[reg(Register::A5)],
                ];
                let result =
                    crate::syscall::user_syscall(frame.pid, number, args, kernel, alloc);
                frame.xs[reg(Register::A0)] = result;
                frame.pc += 4;
            }
            other => {
                log::error!("unhandled synchronous exception {:#x}", other);
                crate::arch::halt();
            }
        }
    }
}

/// Entry point called by the trap stub. Returns the pc to resume at; if
/// the trap left the current process dead, control never comes back here
/// and the scheduler picks the next job instead.
#[cfg(target_arch = "riscv64")]
#[no_mangle]
extern "C" fn ktrap_handler(
    scause: usize,
    _sepc: usize,
    _stval: usize,
    frame: *mut TrapFrame,
) -> usize {
    use crate::proc::ProcessState;

    let frame = unsafe { &mut *frame };
    let kernel = crate::kernel::kernel();
    let alloc = crate::mm::page::kernel_pool();
    dispatch(scause, frame, kernel, alloc);

    // pid 0 is the idle frame: the trap interrupted kernel code, which
    // just resumes. A process frame resumes too, unless the trap left the
    // process dead; then the next job runs instead.
    if frame.pid == 0 {
        return frame.pc;
    }
    match kernel.procs.fetch(frame.pid).map(|p| p.state()) {
        Some(ProcessState::Dead) | None => crate::sched::schedule_loop(kernel),
        _ => frame.pc,
    }
}
