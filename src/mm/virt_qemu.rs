//! Memory map of the QEMU RISC-V `virt` machine (qemu/hw/riscv/virt.c).
//! Only the windows this kernel actually touches are listed.

/// NS16550A console UART.
pub const VIRT_UART_BASE: usize = 0x1000_0000;
pub const VIRT_UART_SIZE: usize = 0x100;

/// virtio-mmio window: [`VIRT_VIRTIO_COUNT`] slots of
/// [`VIRT_VIRTIO_STRIDE`] bytes each.
pub const VIRT_VIRTIO_BASE: usize = 0x1000_1000;
pub const VIRT_VIRTIO_STRIDE: usize = 0x1000;
pub const VIRT_VIRTIO_COUNT: usize = 8;
pub const VIRT_VIRTIO_SIZE: usize = VIRT_VIRTIO_COUNT * VIRT_VIRTIO_STRIDE;

/// Platform-level interrupt controller.
pub const VIRT_PLIC_BASE: usize = 0x0c00_0000;
pub const VIRT_PLIC_SIZE: usize = 0x60_0000;

/// Start of DRAM.
pub const VIRT_DRAM_BASE: usize = 0x8000_0000;
