//! Sv39 MMU operations: building, mutating, walking and tearing down the
//! three-level page tables.
//!
//! A virtual address splits into `[38:30]` root index, `[29:21]` mid index,
//! `[20:12]` leaf index and `[11:0]` page offset. Every table is one 4KiB
//! page of 512 entries and only 4KiB leaf pages are used.
//!
//! # Calling convention
//!
//! Table memory is read and written through its physical address, so every
//! function here must run either with translation off or with the page pool
//! identity-mapped (the kernel maps the whole pool read/write, see
//! [`map_kernel`]).

use crate::mm::page::PageAllocator;
use crate::mm::virt_qemu::{
    VIRT_PLIC_BASE, VIRT_PLIC_SIZE, VIRT_UART_BASE, VIRT_UART_SIZE, VIRT_VIRTIO_BASE,
    VIRT_VIRTIO_SIZE,
};
use crate::mm::{is_user_root_slot, KernelLayout, PAGE_ORDER, PAGE_SIZE};
use crate::util::align::{align_down, align_up};

/// PTE flag bits.
///
/// Bits 8 and 9 are reserved for software by the architecture; bit 8 is
/// used here to record that the mapped page came from the page allocator
/// and must be released when the mapping goes away.
#[repr(u64)]
#[derive(Copy, Clone)]
pub enum EntryBits {
    Valid = 1 << 0,
    Read = 1 << 1,
    Write = 1 << 2,
    Execute = 1 << 3,
    User = 1 << 4,
    Global = 1 << 5,
    Access = 1 << 6,
    Dirty = 1 << 7,
    Owned = 1 << 8,

    // Convenience combinations
    ReadWrite = 1 << 1 | 1 << 2,
    ReadExecute = 1 << 1 | 1 << 3,
    ReadWriteExecute = 1 << 1 | 1 << 2 | 1 << 3,

    // User convenience combinations
    UserReadWrite = 1 << 1 | 1 << 2 | 1 << 4,
    UserReadWriteExecute = 1 << 1 | 1 << 2 | 1 << 3 | 1 << 4,
}

impl EntryBits {
    #[inline]
    pub const fn val(self) -> u64 {
        self as u64
    }
}

const PTE_PPN_MASK: u64 = 0x003f_ffff_ffff_fc00;
// R/W/X/U/G, the caller-controllable permission bits of a leaf.
const PTE_PERM_MASK: u64 = 0x3e;

const ENTRIES_PER_TABLE: usize = 512;
const LEVELS: usize = 3;

/// `satp` MODE field for Sv39.
const SATP_MODE_SV39: usize = 8 << 60;

/// A single page-table entry.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct Entry(u64);

impl Entry {
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn set(&mut self, raw: u64) {
        self.0 = raw;
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// An all-zero entry maps nothing and may be (re)used freely.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 & EntryBits::Valid.val() != 0
    }

    /// A leaf has at least one of R/W/X set.
    #[inline]
    pub fn is_leaf(self) -> bool {
        self.0 & EntryBits::ReadWriteExecute.val() != 0
    }

    #[inline]
    pub fn is_branch(self) -> bool {
        !self.is_leaf()
    }

    #[inline]
    pub fn is_owned(self) -> bool {
        self.0 & EntryBits::Owned.val() != 0
    }

    #[inline]
    pub fn is_global(self) -> bool {
        self.0 & EntryBits::Global.val() != 0
    }

    /// Physical address this entry points at (next-level table or page).
    #[inline]
    pub fn target(self) -> usize {
        ((self.0 & PTE_PPN_MASK) << 2) as usize
    }
}

/// Writable pages must also be readable; the other combinations are
/// reserved by the architecture.
#[inline]
const fn is_leaf_bits_valid(bits: u64) -> bool {
    bits & 0b0110 != 0b0100 && bits & EntryBits::ReadWriteExecute.val() != 0
}

#[inline]
fn vpn(va: usize, level: usize) -> usize {
    (va >> (PAGE_ORDER + 9 * level)) & 0x1ff
}

#[inline]
fn entry_at(table: usize, index: usize) -> *mut Entry {
    (table as *mut Entry).wrapping_add(index)
}

fn alloc_zeroed(alloc: &mut dyn PageAllocator) -> Option<usize> {
    let addr = alloc.alloc(1)?;
    unsafe {
        (addr as *mut u8).write_bytes(0, PAGE_SIZE);
    }
    Some(addr)
}

/// An owned root page table. Dropping the value does not release the tree;
/// call [`RootTable::destroy`] with the owning allocator.
pub struct RootTable {
    addr: usize,
}

impl RootTable {
    /// Allocate a zeroed root table.
    pub fn new(alloc: &mut dyn PageAllocator) -> Option<RootTable> {
        let addr = alloc_zeroed(alloc)?;
        Some(RootTable { addr })
    }

    /// Rebuild a handle from a raw table address (e.g. read back from
    /// `satp`).
    ///
    /// # Safety
    ///
    /// `addr` must be the page-aligned address of a live root table, and
    /// the caller must not create aliasing owners.
    pub unsafe fn from_addr(addr: usize) -> RootTable {
        RootTable { addr }
    }

    /// Physical address of the root table page.
    #[inline]
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// `satp` value installing this table in Sv39 mode.
    #[inline]
    pub fn satp(&self) -> usize {
        (self.addr >> PAGE_ORDER) | SATP_MODE_SV39
    }

    /// Walk down to the leaf slot for `va`, optionally creating missing
    /// interior tables. Returns `None` when the path is missing (and
    /// `alloc` is `None`) or a table on the way is present but invalid.
    fn walk_slot(
        &self,
        va: usize,
        mut alloc: Option<&mut dyn PageAllocator>,
    ) -> Option<*mut Entry> {
        let mut table = self.addr;
        for level in (1..LEVELS).rev() {
            let slot = unsafe { &mut *entry_at(table, vpn(va, level)) };
            if slot.is_empty() {
                match alloc.as_deref_mut() {
                    Some(a) => {
                        let page = alloc_zeroed(a)?;
                        slot.set(((page as u64) >> 2) | EntryBits::Valid.val());
                    }
                    None => return None,
                }
            } else if !slot.is_valid() {
                return None;
            }
            table = slot.target();
        }
        Some(entry_at(table, vpn(va, 0)))
    }

    /// Walk to the leaf PTE for `va` without creating anything.
    pub fn walk(&self, va: usize) -> Option<&Entry> {
        self.walk_slot(va, None).map(|p| unsafe { &*p })
    }

    /// Software address translation. Returns the physical address only for
    /// a present leaf mapping.
    pub fn translate(&self, va: usize) -> Option<usize> {
        let entry = self.walk(va)?;
        if entry.is_valid() && entry.is_leaf() {
            Some(entry.target() | (va & (PAGE_SIZE - 1)))
        } else {
            None
        }
    }

    /// Create the interior tables on the way to `va` without mapping it.
    pub fn premap(&mut self, va: usize, alloc: &mut dyn PageAllocator) {
        let _ = self.walk_slot(va, Some(alloc));
    }

    /// Map `va` to `pa` with the given permission bits. An occupied leaf is
    /// left untouched: remapping is always a caller bug and is reported,
    /// never performed.
    pub fn map(&mut self, va: usize, pa: usize, bits: u64, alloc: &mut dyn PageAllocator) {
        let va = align_down(va, PAGE_ORDER);
        let pa = align_down(pa, PAGE_ORDER);
        debug_assert!(is_leaf_bits_valid(bits));

        let Some(slot) = self.walk_slot(va, Some(alloc)) else {
            log::warn!("map: no table path for {:#x} -> {:#x}", va, pa);
            return;
        };
        let slot = unsafe { &mut *slot };
        if !slot.is_empty() {
            log::warn!(
                "map: {:#x} already maps {:#x}; not remapping to {:#x}",
                va,
                slot.target(),
                pa
            );
            return;
        }
        slot.set(((pa as u64) >> 2) | (bits & PTE_PERM_MASK) | EntryBits::Valid.val());
    }

    /// Map a freshly allocated page at `va` and mark it pool-owned so that
    /// [`unmap`](Self::unmap)/[`destroy`](Self::destroy) release it.
    /// Returns the physical address of the backing page; if `va` is
    /// already mapped, the existing page is returned instead.
    pub fn alloc_page_and_map(
        &mut self,
        va: usize,
        bits: u64,
        alloc: &mut dyn PageAllocator,
    ) -> Option<usize> {
        let va = align_down(va, PAGE_ORDER);
        debug_assert!(is_leaf_bits_valid(bits));

        let slot = self.walk_slot(va, Some(alloc))?;
        let slot = unsafe { &mut *slot };
        if !slot.is_empty() {
            let existing = slot.target();
            log::warn!(
                "alloc_page_and_map: {:#x} already maps {:#x}; keeping it",
                va,
                existing
            );
            return Some(existing);
        }
        let page = alloc.alloc(1)?;
        slot.set(
            ((page as u64) >> 2)
                | (bits & PTE_PERM_MASK)
                | EntryBits::Owned.val()
                | EntryBits::Valid.val(),
        );
        Some(page)
    }

    /// Map every page of `[start, end)` onto itself. `start` is rounded
    /// down and `end` up to page boundaries.
    pub fn identity_map_range(
        &mut self,
        start: usize,
        end: usize,
        bits: u64,
        alloc: &mut dyn PageAllocator,
    ) {
        let start = align_down(start, PAGE_ORDER);
        let end = align_up(end, PAGE_ORDER);
        let mut page = start;
        while page < end {
            self.map(page, page, bits, alloc);
            page += PAGE_SIZE;
        }
    }

    /// Remove the mapping for `va`, releasing the backing page if this
    /// table owns it. Missing paths are ignored.
    pub fn unmap(&mut self, va: usize, alloc: &mut dyn PageAllocator) {
        let va = align_down(va, PAGE_ORDER);
        let Some(slot) = self.walk_slot(va, None) else {
            return;
        };
        let slot = unsafe { &mut *slot };
        if slot.is_empty() {
            return;
        }
        if slot.is_owned() {
            alloc.dealloc(slot.target());
        }
        slot.clear();
    }

    /// Merge the kernel-space mappings of `kernel` into this table so the
    /// process inherits them. Slots covering the user window are skipped.
    /// Wherever this table has no entry, the kernel's branch or leaf is
    /// adopted directly; where both tables carry a branch, the merge
    /// recurses so mappings the process created first (like its descriptor
    /// table) coexist with the kernel's. Every adopted kernel entry is
    /// tagged global, which [`destroy`](Self::destroy) reads as "shared,
    /// not owned".
    pub fn copy_kernel_entries(&mut self, kernel: &RootTable) {
        Self::merge_tables(kernel.addr, self.addr, LEVELS - 1);
    }

    fn merge_tables(src: usize, dst: usize, level: usize) {
        for i in 0..ENTRIES_PER_TABLE {
            if level == LEVELS - 1 && is_user_root_slot(i) {
                continue;
            }
            let src_entry = unsafe { *entry_at(src, i) };
            if src_entry.is_empty() {
                continue;
            }
            let dst_entry = unsafe { &mut *entry_at(dst, i) };
            if dst_entry.is_empty() {
                dst_entry.set(src_entry.get() | EntryBits::Global.val());
                continue;
            }
            if level > 0
                && src_entry.is_valid()
                && src_entry.is_branch()
                && dst_entry.is_valid()
                && dst_entry.is_branch()
                && !dst_entry.is_global()
            {
                Self::merge_tables(src_entry.target(), dst_entry.target(), level - 1);
            }
            // Both sides hold a leaf: the process mapped this page itself
            // (identity, like the kernel would), so its entry stands.
        }
    }

    /// Tear the whole tree down: release every pool-owned leaf page, then
    /// the interior tables, then the root itself. Branch entries tagged
    /// global reference shared kernel tables and are left alone.
    pub fn destroy(self, alloc: &mut dyn PageAllocator) {
        for i in 0..ENTRIES_PER_TABLE {
            let root_entry = unsafe { *entry_at(self.addr, i) };
            if !root_entry.is_valid() || root_entry.is_leaf() || root_entry.is_global() {
                continue;
            }
            let mid = root_entry.target();
            for j in 0..ENTRIES_PER_TABLE {
                let mid_entry = unsafe { *entry_at(mid, j) };
                if !mid_entry.is_valid() || mid_entry.is_leaf() || mid_entry.is_global() {
                    continue;
                }
                let leaf = mid_entry.target();
                for k in 0..ENTRIES_PER_TABLE {
                    let leaf_entry = unsafe { *entry_at(leaf, k) };
                    if leaf_entry.is_valid() && leaf_entry.is_owned() {
                        alloc.dealloc(leaf_entry.target());
                    }
                }
                alloc.dealloc(leaf);
            }
            alloc.dealloc(mid);
        }
        alloc.dealloc(self.addr);
    }
}

/// Build the kernel's identity map: the image sections with their proper
/// permissions, the heap plus page pool (which keeps every page table
/// reachable under translation), and the MMIO windows the kernel drives.
pub fn map_kernel(root: &mut RootTable, layout: &KernelLayout, alloc: &mut dyn PageAllocator) {
    let rw = EntryBits::ReadWrite.val();

    root.identity_map_range(layout.text.0, layout.text.1, EntryBits::ReadExecute.val(), alloc);
    root.identity_map_range(layout.rodata.0, layout.rodata.1, EntryBits::Read.val(), alloc);
    root.identity_map_range(layout.data.0, layout.data.1, rw, alloc);
    root.identity_map_range(layout.bss.0, layout.bss.1, rw, alloc);
    root.identity_map_range(layout.stack.0, layout.stack.1, rw, alloc);
    root.identity_map_range(layout.heap.0, layout.heap.1, rw, alloc);

    root.identity_map_range(VIRT_UART_BASE, VIRT_UART_BASE + VIRT_UART_SIZE, rw, alloc);
    root.identity_map_range(VIRT_VIRTIO_BASE, VIRT_VIRTIO_BASE + VIRT_VIRTIO_SIZE, rw, alloc);
    root.identity_map_range(VIRT_PLIC_BASE, VIRT_PLIC_BASE + VIRT_PLIC_SIZE, rw, alloc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::page::mock::MockArena;
    use crate::mm::USER_SPACE_BASE;

    #[test]
    fn map_walk_unmap_round_trip() {
        let mut arena = MockArena::with_pages(16);
        let mut root = RootTable::new(&mut arena).unwrap();

        let va = USER_SPACE_BASE + 0x7000;
        let pa = 0x8765_4321; // never dereferenced, only translated
        root.map(va, pa, EntryBits::UserReadWrite.val(), &mut arena);

        let leaf = root.walk(va).unwrap();
        assert!(leaf.is_valid() && leaf.is_leaf());
        assert_eq!(leaf.target(), pa & !0xfff);
        assert_eq!(leaf.get() & EntryBits::UserReadWrite.val(), EntryBits::UserReadWrite.val());
        assert_eq!(root.translate(va + 0x321), Some((pa & !0xfff) | 0x321));

        root.unmap(va, &mut arena);
        assert!(root.walk(va).map_or(true, |e| !e.is_valid()));
        assert_eq!(root.translate(va), None);
        // The page was not pool-owned, so nothing was released.
        assert!(arena.freed.is_empty());
    }

    #[test]
    fn walk_without_create_does_not_grow_the_tree() {
        let mut arena = MockArena::with_pages(8);
        let root = RootTable::new(&mut arena).unwrap();
        let before = arena.allocated.len();
        assert!(root.walk(USER_SPACE_BASE).is_none());
        assert_eq!(arena.allocated.len(), before);
    }

    #[test]
    fn identity_range_translates_to_itself() {
        let mut arena = MockArena::with_pages(16);
        let mut root = RootTable::new(&mut arena).unwrap();

        let start = 0x8000_0000;
        let end = start + 4 * PAGE_SIZE;
        root.identity_map_range(start + 1, end - 1, EntryBits::ReadWrite.val(), &mut arena);

        let mut page = start;
        while page < end {
            assert_eq!(root.translate(page), Some(page));
            page += PAGE_SIZE;
        }
        assert_eq!(root.translate(end), None);
    }

    #[test]
    fn occupied_leaf_is_never_remapped() {
        let mut arena = MockArena::with_pages(16);
        let mut root = RootTable::new(&mut arena).unwrap();

        let va = USER_SPACE_BASE;
        root.map(va, 0x9000_0000, EntryBits::ReadWrite.val(), &mut arena);
        root.map(va, 0xa000_0000, EntryBits::ReadWrite.val(), &mut arena);
        assert_eq!(root.translate(va), Some(0x9000_0000));
    }

    #[test]
    fn owned_pages_are_released_exactly_once() {
        let mut arena = MockArena::with_pages(32);
        let mut root = RootTable::new(&mut arena).unwrap();

        let owned_va = USER_SPACE_BASE + 0x1000;
        let owned_pa = root
            .alloc_page_and_map(owned_va, EntryBits::UserReadWrite.val(), &mut arena)
            .unwrap();
        assert!(arena.owns(owned_pa));

        let borrowed_pa = 0x9999_9000;
        root.map(USER_SPACE_BASE + 0x2000, borrowed_pa, EntryBits::ReadWrite.val(), &mut arena);

        root.destroy(&mut arena);
        // MockArena panics on double free, so one occurrence is guaranteed.
        assert!(arena.freed.contains(&owned_pa));
        assert!(!arena.freed.contains(&borrowed_pa));
        // Everything the arena handed out came back.
        assert_eq!(arena.outstanding(), 0);
    }

    #[test]
    fn unmap_releases_owned_page() {
        let mut arena = MockArena::with_pages(16);
        let mut root = RootTable::new(&mut arena).unwrap();

        let va = USER_SPACE_BASE + 0x3000;
        let pa = root
            .alloc_page_and_map(va, EntryBits::UserReadWrite.val(), &mut arena)
            .unwrap();
        root.unmap(va, &mut arena);
        assert_eq!(arena.freed, alloc::vec![pa]);
    }

    #[test]
    fn kernel_map_covers_image_and_mmio() {
        let mut arena = MockArena::with_pages(64);
        let mut root = RootTable::new(&mut arena).unwrap();
        let layout = KernelLayout {
            text: (0x8020_0000, 0x8020_4000),
            rodata: (0x8020_4000, 0x8020_6000),
            data: (0x8020_6000, 0x8020_8000),
            bss: (0x8020_8000, 0x8020_a000),
            stack: (0x8020_a000, 0x8020_e000),
            heap: (0x8020_e000, 0x8030_0000),
        };
        map_kernel(&mut root, &layout, &mut arena);

        assert_eq!(root.translate(layout.text.0), Some(layout.text.0));
        assert_eq!(root.translate(layout.heap.1 - 1), Some(layout.heap.1 - 1));
        assert_eq!(root.translate(VIRT_VIRTIO_BASE), Some(VIRT_VIRTIO_BASE));
        assert_eq!(root.translate(VIRT_PLIC_BASE), Some(VIRT_PLIC_BASE));
        // Writable ranges are not executable and vice versa.
        let text = root.walk(layout.text.0).unwrap();
        assert_eq!(text.get() & EntryBits::Write.val(), 0);
        let heap = root.walk(layout.heap.0).unwrap();
        assert_eq!(heap.get() & EntryBits::Execute.val(), 0);
    }

    #[test]
    fn process_inherits_kernel_slots_without_owning_them() {
        let mut arena = MockArena::with_pages(64);
        let mut kernel = RootTable::new(&mut arena).unwrap();
        kernel.identity_map_range(
            0x8000_0000,
            0x8000_0000 + 2 * PAGE_SIZE,
            EntryBits::ReadWrite.val(),
            &mut arena,
        );
        // Addresses of the kernel's own tables for the DRAM slot.
        let kernel_mid = unsafe { (*entry_at(kernel.addr(), vpn(0x8000_0000, 2))).target() };
        let kernel_leaf = unsafe { (*entry_at(kernel_mid, vpn(0x8000_0000, 1))).target() };

        let mut proc_root = RootTable::new(&mut arena).unwrap();
        proc_root.map(
            USER_SPACE_BASE,
            0x9000_0000,
            EntryBits::UserReadWrite.val(),
            &mut arena,
        );
        // The process already has a mapping inside the kernel's DRAM root
        // slot (the loader does this for the descriptor table), so the
        // inherit pass has to merge, not clobber.
        proc_root.map(
            0x8020_0000,
            0x8020_0000,
            EntryBits::ReadWrite.val(),
            &mut arena,
        );
        proc_root.copy_kernel_entries(&kernel);

        // The process resolves kernel addresses through the shared tables.
        assert_eq!(proc_root.translate(0x8000_0000), Some(0x8000_0000));
        // Its own mappings are preserved.
        assert_eq!(proc_root.translate(USER_SPACE_BASE), Some(0x9000_0000));
        assert_eq!(proc_root.translate(0x8020_0000), Some(0x8020_0000));

        proc_root.destroy(&mut arena);
        // The kernel's tables were shared, not owned: none of them came back.
        assert!(!arena.freed.contains(&kernel_mid));
        assert!(!arena.freed.contains(&kernel_leaf));
        // The kernel root still works.
        assert_eq!(kernel.translate(0x8000_0000 + PAGE_SIZE), Some(0x8000_0000 + PAGE_SIZE));
    }
}
