//! Boot entry, trap entry/exit and the linker-script symbols.
//!
//! This is the only assembly in the kernel: the pieces that must run before
//! a stack exists, and the full register save/restore around traps (the
//! frame keeps *all* integer and floating registers, so the dispatcher can
//! hand a process frame around freely).

#[cfg(target_arch = "riscv64")]
core::arch::global_asm!(
    r#"
.option norvc
.altmacro

.macro save_gp i, basereg=t6
    sd x\i, ((\i) * 8)(\basereg)
.endm
.macro load_gp i, basereg=t6
    ld x\i, ((\i) * 8)(\basereg)
.endm
.macro save_fp i, basereg=t6
    fsd f\i, ((32 + (\i)) * 8)(\basereg)
.endm
.macro load_fp i, basereg=t6
    fld f\i, ((32 + (\i)) * 8)(\basereg)
.endm

.section .text.init
.global _start
_start:
    // a0 = hart id, a1 = device tree blob (from SBI firmware).
    la      gp, _global_pointer
    la      sp, _stack_end

    // Secondary harts park; this kernel is single-hart.
    bnez    a0, 3f

    // Clear .bss.
    la      t0, _bss_start
    la      t1, _bss_end
1:
    bgeu    t0, t1, 2f
    sd      zero, (t0)
    addi    t0, t0, 8
    j       1b
2:
    la      t2, s_trap_vector
    csrw    stvec, t2
    tail    kmain
3:
    wfi
    j       3b

.section .text
.align 4
.global s_trap_vector
s_trap_vector:
    // sscratch holds the running process frame. Swap it into t6 and spill
    // every register; the original t6 goes through sscratch.
    csrrw   t6, sscratch, t6
    .set    i, 1
    .rept   30
        save_gp %i
        .set    i, i + 1
    .endr
    mv      t5, t6
    csrr    t6, sscratch
    sd      t6, (31 * 8)(t5)
    csrw    sscratch, t5
    .set    i, 0
    .rept   32
        save_fp %i, t5
        .set    i, i + 1
    .endr

    csrr    a1, sepc
    sd      a1, (64 * 8)(t5)

    csrr    a0, scause
    csrr    a2, stval
    mv      a3, t5
    la      sp, _stack_end
    la      gp, _global_pointer
    call    ktrap_handler

    // ktrap_handler returns the pc to resume at.
    csrw    sepc, a0
    csrr    t6, sscratch
    .set    i, 0
    .rept   32
        load_fp %i
        .set    i, i + 1
    .endr
    .set    i, 1
    .rept   31
        load_gp %i
        .set    i, i + 1
    .endr
    sret

// enter_user_frame(frame) -> ! : install a process frame and drop to
// user mode. The scheduler is the only caller.
.global enter_user_frame
enter_user_frame:
    csrw    sscratch, a0
    ld      t0, (64 * 8)(a0)
    csrw    sepc, t0
    // SPP = user, SPIE = interrupts on after sret.
    li      t1, 1 << 8
    csrc    sstatus, t1
    li      t1, 1 << 5
    csrs    sstatus, t1
    mv      t6, a0
    .set    i, 0
    .rept   32
        load_fp %i
        .set    i, i + 1
    .endr
    .set    i, 1
    .rept   31
        load_gp %i
        .set    i, i + 1
    .endr
    sret
"#
);

#[cfg(target_arch = "riscv64")]
extern "C" {
    /// Drop into the process whose saved frame is at `frame`.
    pub fn enter_user_frame(frame: *const crate::trap::TrapFrame) -> !;
}

/// Addresses of the kernel image sections, as placed by the linker script.
#[cfg(target_arch = "riscv64")]
pub mod mem_v {
    macro_rules! section_symbol {
        ($fn_name:ident, $sym:ident) => {
            #[inline]
            pub unsafe fn $fn_name() -> usize {
                extern "C" {
                    static $sym: u8;
                }
                core::ptr::addr_of!($sym) as usize
            }
        };
    }

    section_symbol!(text_start, _text_start);
    section_symbol!(text_end, _text_end);
    section_symbol!(rodata_start, _rodata_start);
    section_symbol!(rodata_end, _rodata_end);
    section_symbol!(data_start, _data_start);
    section_symbol!(data_end, _data_end);
    section_symbol!(bss_start, _bss_start);
    section_symbol!(bss_end, _bss_end);
    section_symbol!(stack_start, _stack_start);
    section_symbol!(stack_end, _stack_end);
    section_symbol!(heap_start, _heap_start);
    section_symbol!(disk_image_start, _disk_image_start);
    section_symbol!(disk_image_end, _disk_image_end);
}
