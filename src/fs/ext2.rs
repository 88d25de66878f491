//! Read-only ext2 driver.
//!
//! The volume splits into block groups described by the block group
//! descriptor table (BGDT); files are inodes whose data lives behind 12
//! direct block pointers followed by singly, doubly and triply indirect
//! pointer blocks. Directories store variable-length records inside their
//! data blocks. Revisions 0 and 1 are supported.
//!
//! Everything here decodes the on-disk layouts bit-exactly; the structs
//! below mirror them field for field. Multi-byte fields are little-endian,
//! as is the only machine this kernel runs on.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

use static_assertions::const_assert_eq;

use super::{
    DirEntry, DirHandle, FileBuffer, FileType, Filesystem, FsHandle, GenericFile,
};
use crate::driver::block::{BlockDevice, BlockIoError, SECTOR_SIZE};

/// Magic value at offset 56 of the superblock.
pub const EXT2_MAGIC: u16 = 0xef53;
/// Inode index of the root directory.
pub const ROOT_INODE: u32 = 2;

const DIRECT_BLOCK_COUNT: u64 = 12;
const SINGLE_INDIRECT_SLOT: usize = 12;
const DOUBLE_INDIRECT_SLOT: usize = 13;
const TRIPLE_INDIRECT_SLOT: usize = 14;

// mode & 0xf000 encodes the file type.
const INODE_TYPE_MASK: u16 = 0xf000;
const INODE_TYPE_SOCKET: u16 = 0xc000;
const INODE_TYPE_SYMLINK: u16 = 0xa000;
const INODE_TYPE_REGULAR: u16 = 0x8000;
const INODE_TYPE_BLOCK: u16 = 0x6000;
const INODE_TYPE_DIR: u16 = 0x4000;
const INODE_TYPE_CHAR: u16 = 0x2000;
const INODE_TYPE_FIFO: u16 = 0x1000;

/// On-disk superblock, 1024 bytes at byte offset 1024 of the volume.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct Superblock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub r_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    pub mtime: u32,
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub minor_rev_level: u16,
    pub last_check: u32,
    pub check_interval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_nr: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted: [u8; 64],
    pub algo_bitmap: u32,
    pub prealloc_blocks: u8,
    pub prealloc_dir_blocks: u8,
    rsv1: [u8; 2],
    pub journal_uuid: [u8; 16],
    pub journal_inum: u32,
    pub journal_dev: u32,
    pub last_orphan: u32,
    pub hash_seed: [u32; 4],
    pub def_hash_version: u8,
    rsv2: [u8; 3],
    pub default_mount_options: u32,
    pub first_meta_bg: u32,
    rsv3: [u8; 760],
}

const_assert_eq!(size_of::<Superblock>(), 1024);

/// One entry of the block group descriptor table.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct BlockGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
    rsv1: [u8; 14],
}

const_assert_eq!(size_of::<BlockGroupDescriptor>(), 32);

/// On-disk inode. Revision-1 volumes may store larger records; the fields
/// past these 128 bytes are not consulted.
#[repr(C, packed)]
#[derive(Copy, Clone)]
pub struct Inode {
    pub mode: u16,
    pub uid: u16,
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub gid: u16,
    pub links_count: u16,
    pub blocks: u32,
    pub flags: u32,
    pub osd1: u32,
    pub block: [u32; 15],
    pub generation: u32,
    pub file_acl: u32,
    pub dir_acl: u32,
    pub faddr: u32,
    pub osd2: [u8; 12],
}

const_assert_eq!(size_of::<Inode>(), 128);

impl Inode {
    pub fn file_type(&self) -> FileType {
        let mode = self.mode;
        match mode & INODE_TYPE_MASK {
            INODE_TYPE_REGULAR => FileType::Regular,
            INODE_TYPE_DIR => FileType::Directory,
            INODE_TYPE_BLOCK => FileType::Block,
            INODE_TYPE_CHAR | INODE_TYPE_FIFO | INODE_TYPE_SOCKET => FileType::Special,
            INODE_TYPE_SYMLINK => FileType::Unknown,
            _ => FileType::Unknown,
        }
    }

    /// Regular files compose a 64-bit length from `dir_acl` and `size`.
    pub fn byte_size(&self) -> u64 {
        let (high, low) = (self.dir_acl, self.size);
        if self.file_type() == FileType::Regular {
            ((high as u64) << 32) | low as u64
        } else {
            low as u64
        }
    }
}

/// Per-open-file metadata record kept in the file buffer: the decoded
/// inode plus its index, so a second handle can be opened later.
struct InodeMeta {
    index: u32,
    inode: Inode,
}

/// Mount and driver failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Ext2Error {
    /// The superblock magic did not match.
    BadMagic,
    /// Nonsensical block geometry in the superblock.
    BadGeometry,
    /// The root directory inode could not be read.
    MissingRoot,
    Io(BlockIoError),
}

impl From<BlockIoError> for Ext2Error {
    fn from(e: BlockIoError) -> Ext2Error {
        Ext2Error::Io(e)
    }
}

fn from_bytes<T: Copy>(bytes: &[u8]) -> T {
    debug_assert!(bytes.len() >= size_of::<T>());
    unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

/// A mounted ext2 volume.
pub struct Ext2Filesystem {
    dev: Box<dyn BlockDevice>,
    superblock: Superblock,
    bgdt: Vec<BlockGroupDescriptor>,
    /// Root directory inode, cached for path resolution.
    root_inode: Inode,
}

impl core::fmt::Debug for Ext2Filesystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Ext2Filesystem").finish_non_exhaustive()
    }
}

impl Ext2Filesystem {
    /// Probe and decode the volume on `dev`.
    pub fn new(dev: Box<dyn BlockDevice>) -> Result<Ext2Filesystem, Ext2Error> {
        let mut sb_buf = [0u8; 1024];
        dev.read_sectors(&mut sb_buf, (1024 / SECTOR_SIZE) as u64, 1024 / SECTOR_SIZE)?;
        let superblock: Superblock = from_bytes(&sb_buf);

        let magic = superblock.magic;
        if magic != EXT2_MAGIC {
            log::error!("ext2 filesystem not found (magic {:#06x})", magic);
            return Err(Ext2Error::BadMagic);
        }
        let log_block_size = superblock.log_block_size;
        let blocks_per_group = superblock.blocks_per_group;
        let inodes_per_group = superblock.inodes_per_group;
        if log_block_size > 16 || blocks_per_group == 0 || inodes_per_group == 0 {
            return Err(Ext2Error::BadGeometry);
        }
        let block_size = 1024usize << log_block_size;

        let blocks_count = superblock.blocks_count;
        let group_count =
            ((blocks_count + blocks_per_group - 1) / blocks_per_group) as usize;
        let table_bytes = group_count * size_of::<BlockGroupDescriptor>();
        let table_sectors = (table_bytes + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let bgdt_block = superblock.first_data_block as usize + 1;
        let mut table_buf = vec![0u8; table_sectors * SECTOR_SIZE];
        dev.read_sectors(
            &mut table_buf,
            (bgdt_block * block_size / SECTOR_SIZE) as u64,
            table_sectors,
        )?;
        let bgdt = (0..group_count)
            .map(|g| from_bytes(&table_buf[g * size_of::<BlockGroupDescriptor>()..]))
            .collect();

        let inodes_count = superblock.inodes_count;
        log::info!(
            "ext2 volume: {} inodes, {} blocks, block size {}",
            inodes_count,
            blocks_count,
            block_size
        );

        let mut fs = Ext2Filesystem {
            dev,
            superblock,
            bgdt,
            root_inode: from_bytes(&[0u8; 128]),
        };
        fs.root_inode = fs.read_inode(ROOT_INODE).ok_or(Ext2Error::MissingRoot)?;
        if fs.root_inode.file_type() != FileType::Directory {
            return Err(Ext2Error::MissingRoot);
        }
        Ok(fs)
    }

    /// Mount the volume and hand back its root directory.
    pub fn mount(dev: Box<dyn BlockDevice>) -> Result<GenericFile, Ext2Error> {
        let fs = Ext2Filesystem::new(dev)?;
        let root = fs.root_inode;
        let fs = Rc::new(fs);
        let mut buffer = FileBuffer::new(Box::new(InodeMeta {
            index: ROOT_INODE,
            inode: root,
        }));
        fs.preload_first_block(&mut buffer, &root);
        Ok(GenericFile::new_directory(
            FsHandle::from_rc(fs),
            DirHandle { buffer },
        ))
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        1024usize << self.superblock.log_block_size
    }

    /// Read one filesystem block into `buf`.
    fn load_block(&self, block_id: u32, buf: &mut [u8]) -> Result<(), BlockIoError> {
        let bs = self.block_size();
        let sectors = bs / SECTOR_SIZE;
        self.dev
            .read_sectors(&mut buf[..bs], (block_id as u64) * sectors as u64, sectors)
    }

    /// Decode an inode record. Inodes are 1-indexed; index 0 marks an
    /// absent entry and yields `None`.
    pub fn read_inode(&self, index: u32) -> Option<Inode> {
        if index == 0 {
            return None;
        }
        let i = index - 1;
        let per_group = self.superblock.inodes_per_group;
        let group = (i / per_group) as usize;
        let slot = (i % per_group) as usize;
        let descriptor = self.bgdt.get(group)?;
        let inode_table = descriptor.inode_table;

        let rev_level = self.superblock.rev_level;
        let record_size = if rev_level >= 1 {
            self.superblock.inode_size as usize
        } else {
            128
        };
        let bs = self.block_size();
        let block_id = inode_table as u64 + (slot * record_size / bs) as u64;
        let mut buf = vec![0u8; bs];
        self.load_block(block_id as u32, &mut buf).ok()?;
        let offset = (record_size * slot) % bs;
        Some(from_bytes(&buf[offset..offset + size_of::<Inode>()]))
    }

    /// One entry of an indirect pointer block. A zero table or entry means
    /// the range is unmapped.
    fn indirect_entry(&self, table_block: u32, index: u64) -> Option<u32> {
        if table_block == 0 {
            return None;
        }
        let mut buf = vec![0u8; self.block_size()];
        self.load_block(table_block, &mut buf).ok()?;
        let v = read_u32(&buf, index as usize * 4);
        if v == 0 {
            None
        } else {
            Some(v)
        }
    }

    /// Map a logical block index of `inode` to its on-disk block number.
    /// The stride at every indirect level is `P = block_size / 4` entries.
    pub fn resolve_block(&self, inode: &Inode, logical: u64) -> Option<u32> {
        let p = (self.block_size() / 4) as u64;
        let block = inode.block;
        let id = if logical < DIRECT_BLOCK_COUNT {
            block[logical as usize]
        } else if logical < DIRECT_BLOCK_COUNT + p {
            self.indirect_entry(block[SINGLE_INDIRECT_SLOT], logical - DIRECT_BLOCK_COUNT)?
        } else if logical < DIRECT_BLOCK_COUNT + p + p * p {
            let rel = logical - DIRECT_BLOCK_COUNT - p;
            let outer = self.indirect_entry(block[DOUBLE_INDIRECT_SLOT], rel / p)?;
            self.indirect_entry(outer, rel % p)?
        } else if logical < DIRECT_BLOCK_COUNT + p + p * p + p * p * p {
            let rel = logical - DIRECT_BLOCK_COUNT - p - p * p;
            let outer = self.indirect_entry(block[TRIPLE_INDIRECT_SLOT], rel / (p * p))?;
            let mid = self.indirect_entry(outer, (rel / p) % p)?;
            self.indirect_entry(mid, rel % p)?
        } else {
            return None;
        };
        if id == 0 {
            None
        } else {
            Some(id)
        }
    }

    /// Walk every record of a directory inode. `visit` returns `true` to
    /// stop the walk early.
    fn for_each_dirent<F: FnMut(u32, &[u8]) -> bool>(&self, dir: &Inode, mut visit: F) {
        let bs = self.block_size();
        let size = dir.byte_size();
        let mut buf = vec![0u8; bs];
        let mut logical = 0u64;
        while logical * (bs as u64) < size {
            if let Some(block_id) = self.resolve_block(dir, logical) {
                if self.load_block(block_id, &mut buf).is_ok() {
                    let mut off = 0usize;
                    while off + 8 <= bs {
                        let rec_inode = read_u32(&buf, off);
                        let rec_len = read_u16(&buf, off + 4) as usize;
                        let name_len = buf[off + 6] as usize;
                        if rec_len == 0 {
                            break;
                        }
                        if off + 8 + name_len <= bs {
                            let name = &buf[off + 8..off + 8 + name_len];
                            if visit(rec_inode, name) {
                                return;
                            }
                        }
                        off += rec_len;
                    }
                }
            }
            logical += 1;
        }
    }

    /// Find `name` in a directory; 0 when absent or `dir` is not a
    /// directory. The comparison is byte-exact.
    pub fn fetch_from_directory(&self, dir: &Inode, name: &str) -> u32 {
        if dir.file_type() != FileType::Directory {
            return 0;
        }
        let wanted = name.as_bytes();
        let mut found = 0;
        self.for_each_dirent(dir, |rec_inode, rec_name| {
            if rec_inode != 0 && rec_name == wanted {
                found = rec_inode;
                true
            } else {
                false
            }
        });
        found
    }

    /// Resolve a path (as components) from the root directory; 0 when any
    /// component is missing.
    pub fn get_inode(&self, path: &[&str]) -> u32 {
        let mut node = self.root_inode;
        for (i, component) in path.iter().enumerate() {
            let index = self.fetch_from_directory(&node, component);
            if index == 0 {
                return 0;
            }
            if i == path.len() - 1 {
                return index;
            }
            node = match self.read_inode(index) {
                Some(n) => n,
                None => return 0,
            };
        }
        0
    }

    /// Decode the first data block into ring slot 0 so a fresh handle can
    /// serve reads immediately.
    fn preload_first_block(&self, buffer: &mut FileBuffer, inode: &Inode) {
        if let Some(block_id) = self.resolve_block(inode, 0) {
            let mut data = vec![0u8; self.block_size()].into_boxed_slice();
            if self.load_block(block_id, &mut data).is_ok() {
                let slot = &mut buffer.slots[0];
                slot.data = Some(data);
                slot.logical = Some(0);
                slot.physical = block_id;
            }
        }
    }

    /// Open a generic file for the inode at `index`.
    fn open_by_index(this: &Rc<Ext2Filesystem>, index: u32) -> Option<GenericFile> {
        let inode = this.read_inode(index)?;
        let ty = inode.file_type();
        let shared: Rc<dyn Filesystem> = this.clone();
        let handle = FsHandle::from_rc(shared);
        match ty {
            FileType::Regular => {
                let mut buffer = FileBuffer::new(Box::new(InodeMeta { index, inode }));
                this.preload_first_block(&mut buffer, &inode);
                Some(GenericFile::new_regular(handle, buffer))
            }
            FileType::Directory => {
                let mut buffer = FileBuffer::new(Box::new(InodeMeta { index, inode }));
                this.preload_first_block(&mut buffer, &inode);
                Some(GenericFile::new_directory(handle, DirHandle { buffer }))
            }
            other => Some(GenericFile::new_bare(handle, other)),
        }
    }

    /// Make the buffer's current slot hold the given logical block:
    /// reuse a cached slot when one matches, otherwise step the ring and
    /// decode the block into it.
    fn ensure_block(&self, buffer: &mut FileBuffer, inode: &Inode, logical: u64) -> Option<()> {
        if let Some(slot) = buffer.slots.get(buffer.current) {
            if slot.logical == Some(logical) && slot.data.is_some() {
                return Some(());
            }
        }
        if let Some(cached) = buffer.find_cached(logical) {
            buffer.current = cached;
            return Some(());
        }

        let block_id = self.resolve_block(inode, logical)?;
        let index = buffer.advance_ring();
        let slot = &mut buffer.slots[index];
        let mut data = slot
            .data
            .take()
            .unwrap_or_else(|| vec![0u8; self.block_size()].into_boxed_slice());
        if self.load_block(block_id, &mut data).is_err() {
            slot.logical = None;
            return None;
        }
        slot.data = Some(data);
        slot.logical = Some(logical);
        slot.physical = block_id;
        slot.dirty = false;
        Some(())
    }

    fn meta_of(file: &GenericFile) -> Option<(u32, Inode)> {
        let meta = file.any_buffer()?.meta::<InodeMeta>()?;
        Some((meta.index, meta.inode))
    }
}

impl Filesystem for Ext2Filesystem {
    fn unmount(&self) {
        log::info!("ext2 volume unmounted");
    }

    fn read_char(&self, file: &mut GenericFile) -> Option<u8> {
        if file.file_type() != FileType::Regular {
            return None;
        }
        let (_, inode) = Ext2Filesystem::meta_of(file)?;
        let total = inode.byte_size();
        let bs = self.block_size() as u64;
        let buffer = file.buffer_mut()?;
        if buffer.pos >= total {
            return None;
        }
        let logical = buffer.pos / bs;
        self.ensure_block(buffer, &inode, logical)?;
        let byte = buffer.slots[buffer.current].data.as_ref()?[(buffer.pos % bs) as usize];
        buffer.pos += 1;
        buffer.offset = (buffer.pos % bs) as usize;
        Some(byte)
    }

    fn write_char(&self, file: &mut GenericFile, c: u8) -> Option<u8> {
        if file.file_type() != FileType::Regular {
            return None;
        }
        let (_, inode) = Ext2Filesystem::meta_of(file)?;
        let total = inode.byte_size();
        let bs = self.block_size() as u64;
        let buffer = file.buffer_mut()?;
        // The volume is read-only: bytes may be changed in the cached
        // block, never appended past the end.
        if buffer.pos >= total {
            return None;
        }
        let logical = buffer.pos / bs;
        self.ensure_block(buffer, &inode, logical)?;
        let current = buffer.current;
        let offset = (buffer.pos % bs) as usize;
        let slot = &mut buffer.slots[current];
        slot.data.as_mut()?[offset] = c;
        slot.dirty = true;
        buffer.pos += 1;
        buffer.offset = (buffer.pos % bs) as usize;
        Some(c)
    }

    fn seek(&self, file: &mut GenericFile, pos: u64) {
        if file.file_type() != FileType::Regular {
            return;
        }
        let Some((_, inode)) = Ext2Filesystem::meta_of(file) else {
            return;
        };
        let bs = self.block_size() as u64;
        let Some(buffer) = file.buffer_mut() else {
            return;
        };
        buffer.pos = pos;
        buffer.offset = (pos % bs) as usize;
        let _ = self.ensure_block(buffer, &inode, pos / bs);
    }

    fn size(&self, file: &GenericFile) -> u64 {
        match file.file_type() {
            FileType::Regular | FileType::Directory => Ext2Filesystem::meta_of(file)
                .map(|(_, inode)| inode.byte_size())
                .unwrap_or(0),
            _ => 0,
        }
    }

    fn lookup(self: Rc<Self>, dir: &mut GenericFile, name: &str) -> Option<DirEntry> {
        if dir.file_type() != FileType::Directory {
            return None;
        }
        let (_, dir_inode) = Ext2Filesystem::meta_of(dir)?;
        let index = self.fetch_from_directory(&dir_inode, name);
        if index == 0 {
            return None;
        }
        let file = Ext2Filesystem::open_by_index(&self, index)?;
        Some(DirEntry {
            kind: file.file_type(),
            name: String::from(name),
            file,
        })
    }

    fn list(self: Rc<Self>, dir: &mut GenericFile) -> Vec<DirEntry> {
        let mut entries = Vec::new();
        if dir.file_type() != FileType::Directory {
            return entries;
        }
        let Some((_, dir_inode)) = Ext2Filesystem::meta_of(dir) else {
            return entries;
        };
        let mut found: Vec<(u32, String)> = Vec::new();
        self.for_each_dirent(&dir_inode, |rec_inode, rec_name| {
            if rec_inode != 0 {
                found.push((rec_inode, String::from_utf8_lossy(rec_name).into_owned()));
            }
            false
        });
        for (index, name) in found {
            if let Some(file) = Ext2Filesystem::open_by_index(&self, index) {
                entries.push(DirEntry {
                    kind: file.file_type(),
                    name,
                    file,
                });
            }
        }
        entries
    }

    fn duplicate(self: Rc<Self>, file: &GenericFile) -> Option<GenericFile> {
        match file.file_type() {
            FileType::Regular | FileType::Directory => {
                let (index, _) = Ext2Filesystem::meta_of(file)?;
                Ext2Filesystem::open_by_index(&self, index)
            }
            other => Some(GenericFile::new_bare(
                FsHandle::from_rc(self),
                other,
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A hand-assembled 1 KiB-block ext2 image:
    //!
    //! ```text
    //! /hello.txt      "Hello, world!\n"
    //! /a/b/c          "nested\n"
    //! /big.bin        13 blocks, exercising the single-indirect range
    //! /Foo            "FOO\n"
    //! /foo\0bar       empty (embedded NUL in the name)
    //! /bin/echo       a minimal RISC-V executable
    //! ```
    //!
    //! The root directory also carries one deleted record ("ghost").

    use super::*;
    use crate::driver::block::MemDisk;

    pub const BLOCK: usize = 1024;
    pub const HELLO: &[u8] = b"Hello, world!\n";
    pub const NESTED: &[u8] = b"nested\n";
    pub const BIG_BLOCKS: usize = 13;

    pub const HELLO_INODE: u32 = 11;
    pub const C_INODE: u32 = 14;
    pub const BIG_INODE: u32 = 15;
    pub const FOO_INODE: u32 = 16;
    pub const NUL_NAME_INODE: u32 = 17;

    /// Deterministic content of `/big.bin` at byte `i`.
    pub fn big_byte(i: usize) -> u8 {
        ((i * 7 + 3) % 251) as u8
    }

    fn put(img: &mut [u8], off: usize, bytes: &[u8]) {
        img[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn put_u16(img: &mut [u8], off: usize, v: u16) {
        put(img, off, &v.to_le_bytes());
    }

    fn put_u32(img: &mut [u8], off: usize, v: u32) {
        put(img, off, &v.to_le_bytes());
    }

    fn write_dir_block(img: &mut [u8], block: usize, entries: &[(u32, &[u8])]) {
        let base = block * BLOCK;
        let mut off = 0;
        for (i, (ino, name)) in entries.iter().enumerate() {
            let need = (8 + name.len() + 3) & !3;
            let rec_len = if i == entries.len() - 1 { BLOCK - off } else { need };
            put_u32(img, base + off, *ino);
            put_u16(img, base + off + 4, rec_len as u16);
            img[base + off + 6] = name.len() as u8;
            img[base + off + 7] = 0;
            put(img, base + off + 8, name);
            off += rec_len;
        }
    }

    fn write_inode(img: &mut [u8], index: u32, mode: u16, size: u32, blocks: &[(usize, u32)]) {
        let base = 5 * BLOCK + (index as usize - 1) * 128;
        put_u16(img, base, mode);
        put_u32(img, base + 4, size);
        for &(slot, id) in blocks {
            put_u32(img, base + 40 + slot * 4, id);
        }
    }

    pub fn disk_image() -> Box<[u8]> {
        let mut img = vec![0u8; 48 * BLOCK];

        // Superblock at byte offset 1024.
        let sb = BLOCK;
        put_u32(&mut img, sb, 32); // inodes_count
        put_u32(&mut img, sb + 4, 48); // blocks_count
        put_u32(&mut img, sb + 20, 1); // first_data_block
        put_u32(&mut img, sb + 24, 0); // log_block_size (1024)
        put_u32(&mut img, sb + 32, 8192); // blocks_per_group
        put_u32(&mut img, sb + 40, 32); // inodes_per_group
        put_u16(&mut img, sb + 56, EXT2_MAGIC);
        put_u32(&mut img, sb + 76, 1); // rev_level
        put_u16(&mut img, sb + 88, 128); // inode_size

        // One block group descriptor at block 2: inode table at block 5.
        put_u32(&mut img, 2 * BLOCK + 8, 5);

        // Inodes.
        write_inode(&mut img, ROOT_INODE, 0x41ed, BLOCK as u32, &[(0, 10)]);
        write_inode(&mut img, HELLO_INODE, 0x81a4, HELLO.len() as u32, &[(0, 11)]);
        write_inode(&mut img, 12, 0x41ed, BLOCK as u32, &[(0, 12)]); // /a
        write_inode(&mut img, 13, 0x41ed, BLOCK as u32, &[(0, 13)]); // /a/b
        write_inode(&mut img, C_INODE, 0x81a4, NESTED.len() as u32, &[(0, 14)]);
        let big_blocks: Vec<(usize, u32)> = (0..12)
            .map(|i| (i, 20 + i as u32))
            .chain(core::iter::once((SINGLE_INDIRECT_SLOT, 32)))
            .collect();
        write_inode(
            &mut img,
            BIG_INODE,
            0x81a4,
            (BIG_BLOCKS * BLOCK) as u32,
            &big_blocks,
        );
        write_inode(&mut img, FOO_INODE, 0x81a4, 4, &[(0, 15)]);
        write_inode(&mut img, NUL_NAME_INODE, 0x81a4, 0, &[]);
        write_inode(&mut img, 18, 0x41ed, BLOCK as u32, &[(0, 16)]); // /bin
        let echo = crate::proc::elf::fixtures::echo_elf();
        write_inode(&mut img, 19, 0x81a4, echo.len() as u32, &[(0, 17)]);

        // Directory data.
        write_dir_block(
            &mut img,
            10,
            &[
                (ROOT_INODE, b"."),
                (ROOT_INODE, b".."),
                (HELLO_INODE, b"hello.txt"),
                (12, b"a"),
                (BIG_INODE, b"big.bin"),
                (FOO_INODE, b"Foo"),
                (NUL_NAME_INODE, b"foo\0bar"),
                (18, b"bin"),
                (0, b"ghost"),
            ],
        );
        write_dir_block(&mut img, 12, &[(12, b"."), (ROOT_INODE, b".."), (13, b"b")]);
        write_dir_block(&mut img, 13, &[(13, b"."), (12, b".."), (C_INODE, b"c")]);
        write_dir_block(&mut img, 16, &[(18, b"."), (ROOT_INODE, b".."), (19, b"echo")]);

        // File data.
        put(&mut img, 11 * BLOCK, HELLO);
        put(&mut img, 14 * BLOCK, NESTED);
        put(&mut img, 15 * BLOCK, b"FOO\n");
        put(&mut img, 17 * BLOCK, &echo);
        for b in 0..BIG_BLOCKS {
            let disk_block = if b < 12 { 20 + b } else { 33 };
            for i in 0..BLOCK {
                img[disk_block * BLOCK + i] = big_byte(b * BLOCK + i);
            }
        }
        // Single-indirect table: one entry pointing at block 33.
        put_u32(&mut img, 32 * BLOCK, 33);

        img.into_boxed_slice()
    }

    pub fn fixture_fs() -> Ext2Filesystem {
        Ext2Filesystem::new(Box::new(MemDisk::new(disk_image()))).unwrap()
    }

    pub fn mount_fixture() -> GenericFile {
        Ext2Filesystem::mount(Box::new(MemDisk::new(disk_image()))).unwrap()
    }
}
