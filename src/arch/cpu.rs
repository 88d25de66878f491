//! CPU register naming and supervisor CSR access for RV64.

/// Integer register indices in the canonical order used by the saved
/// register frame.
#[repr(usize)]
#[derive(Copy, Clone)]
pub enum Register {
    Zero = 0,
    Ra,
    Sp,
    Gp,
    Tp,
    T0,
    T1,
    T2,
    Fp, // s0
    S1,
    A0, /* 10 */
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
    S2,
    S3,
    S4, /* 20 */
    S5,
    S6,
    S7,
    S8,
    S9,
    S10,
    S11,
    T3,
    T4,
    T5, /* 30 */
    T6,
}

/// Convenience conversion for indexing a register frame.
#[inline(always)]
pub const fn reg(r: Register) -> usize {
    r as usize
}

#[cfg(target_arch = "riscv64")]
mod csr {
    use core::arch::asm;

    /// Read the `satp` register.
    pub fn satp_read() -> usize {
        let rval;
        unsafe {
            asm!("csrr {}, satp", out(reg) rval);
        }
        rval
    }

    /// Install a new address-translation root. The `sfence.vma` afterwards
    /// invalidates any translations cached for the old table.
    pub fn satp_write(val: usize) {
        unsafe {
            asm!("csrw satp, {}", in(reg) val);
            asm!("sfence.vma zero, zero");
        }
    }

    /// Point `sscratch` at the frame traps should spill into.
    pub fn sscratch_write(val: usize) {
        unsafe {
            asm!("csrw sscratch, {}", in(reg) val);
        }
    }

    /// Enable supervisor external interrupts (`sie.SEIE`).
    pub fn sie_enable_external() {
        let bit = 1usize << 9;
        unsafe {
            asm!("csrs sie, {}", in(reg) bit);
        }
    }

    /// Global supervisor interrupt enable (`sstatus.SIE`).
    pub fn sstatus_enable_interrupts() {
        let bit = 1usize << 1;
        unsafe {
            asm!("csrs sstatus, {}", in(reg) bit);
        }
    }
}

#[cfg(target_arch = "riscv64")]
pub use csr::*;
