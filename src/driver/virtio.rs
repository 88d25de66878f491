//! Probe helpers for the virtio-mmio window. The queue transport itself is
//! owned by firmware-level code outside this kernel; we only verify that the
//! window is mapped and holds devices.

use crate::mm::virt_qemu::{VIRT_VIRTIO_BASE, VIRT_VIRTIO_COUNT, VIRT_VIRTIO_STRIDE};

/// Value of the first register of every virtio-mmio device ("virt").
pub const VIRTIO_MAGIC: u32 = 0x74726976;

const REG_MAGIC: usize = 0x000;
const REG_DEVICE_ID: usize = 0x008;

/// Check the magic word of the virtio slot at `base`.
pub fn probe(base: usize) -> bool {
    let magic = unsafe { ((base + REG_MAGIC) as *const u32).read_volatile() };
    magic == VIRTIO_MAGIC
}

/// Scan the whole MMIO window, logging the device id of every populated
/// slot. Returns the number of devices found.
pub fn scan() -> usize {
    let mut found = 0;
    for slot in 0..VIRT_VIRTIO_COUNT {
        let base = VIRT_VIRTIO_BASE + slot * VIRT_VIRTIO_STRIDE;
        if !probe(base) {
            continue;
        }
        let device = unsafe { ((base + REG_DEVICE_ID) as *const u32).read_volatile() };
        if device != 0 {
            log::info!("virtio device {:#x} at {:#x}", device, base);
            found += 1;
        }
    }
    found
}
