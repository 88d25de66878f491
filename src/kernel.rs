//! The kernel's long-lived state, built once during bring-up.
//!
//! All process-wide tables live together in [`Kernel`] and are passed by
//! reference into the trap, syscall and scheduler paths. The binary keeps
//! exactly one instance behind [`install`]/[`kernel`]; tests construct
//! their own.

use crate::fs::GenericFile;
use crate::mm::mmu::RootTable;
use crate::proc::ProcessTable;
use crate::sched::JobQueue;
use crate::trap::plic::IrqTable;

pub struct Kernel {
    pub procs: ProcessTable,
    pub jobs: JobQueue,
    pub irqs: IrqTable,
    /// The kernel's own identity-mapped root table; processes inherit its
    /// kernel-space slots.
    pub mmu_root: RootTable,
    /// Root directory of the mounted boot volume.
    pub root_dir: Option<GenericFile>,
}

static mut KERNEL: Option<Kernel> = None;

/// Publish the kernel state. Called once at the end of bring-up, before
/// interrupts are enabled.
///
/// # Safety
///
/// Single hart, single call; nothing may hold a reference across it.
pub unsafe fn install(state: Kernel) {
    KERNEL = Some(state);
}

/// The installed kernel state. Panics before [`install`].
#[allow(static_mut_refs)]
pub fn kernel() -> &'static mut Kernel {
    unsafe { KERNEL.as_mut().expect("kernel state not installed") }
}
