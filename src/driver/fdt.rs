//! Flattened-device-tree access for bring-up. Parsing is delegated to the
//! `fdt` crate; we only pull out the pieces bring-up needs.

use fdt::Fdt;

/// Create a `Fdt` view over the blob the firmware handed us.
///
/// # Safety
///
/// `dtb` must point at a valid device tree blob.
#[inline]
pub unsafe fn parse_from_ptr<'a>(dtb: *const u8) -> Fdt<'a> {
    Fdt::from_ptr(dtb).expect("device tree blob must be valid")
}

/// First RAM region as `(start, size)`. The QEMU virt machine always
/// reports one contiguous DRAM bank.
pub fn main_memory_region(fdt: &Fdt) -> Option<(usize, usize)> {
    fdt.memory()
        .regions()
        .next()
        .and_then(|r| r.size.map(|size| (r.starting_address as usize, size)))
}

/// Log the interesting standard nodes. Debug aid during bring-up.
pub(crate) fn show_boot_info(fdt: &Fdt) {
    let root = fdt.root();
    log::info!("machine model: {}", root.model());
    for r in fdt.memory().regions() {
        log::info!(
            "memory region: start={:p} size={:#x}",
            r.starting_address,
            r.size.unwrap_or_default()
        );
    }
    if let Some(args) = fdt.chosen().bootargs() {
        log::info!("bootargs: {}", args);
    }
}
