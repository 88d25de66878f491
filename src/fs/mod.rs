//! The generic file abstraction.
//!
//! A [`GenericFile`] pairs a type tag with the state the concrete
//! filesystem keeps per open file, and dispatches every operation through
//! the shared [`Filesystem`] handle. Filesystems are reference-counted
//! across all files opened from them; when the last reference goes away
//! the volume is unmounted.
//!
//! Regular files carry a [`FileBuffer`]: a byte position plus a small ring
//! of decoded blocks. The last [`BUFFER_RESERVED`] ring slots are kept for
//! future write-back and are never used by the read path.

pub mod console;
pub mod ext2;

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;

/// Ring slots per open regular file.
pub const BUFFER_COUNT: usize = 8;
/// Tail slots reserved for write-back.
pub const BUFFER_RESERVED: usize = 3;
/// The read path cycles through `[0, BUFFER_RING_LIMIT)`.
pub const BUFFER_RING_LIMIT: usize = BUFFER_COUNT - BUFFER_RESERVED;

/// What kind of object a file handle refers to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FileType {
    Regular,
    Directory,
    Block,
    Special,
    Unknown,
}

/// One decoded block held by a file.
pub struct BufferSlot {
    pub data: Option<Box<[u8]>>,
    /// Logical block index within the file, if the slot holds one.
    pub logical: Option<u64>,
    /// Physical (on-disk) block number backing the slot.
    pub physical: u32,
    /// Set by `write_char`; consumed by a future write-back pass.
    pub dirty: bool,
}

impl BufferSlot {
    pub const EMPTY: BufferSlot = BufferSlot {
        data: None,
        logical: None,
        physical: 0,
        dirty: false,
    };
}

/// Position and block cache of an open file, plus the filesystem's
/// per-file metadata record (e.g. the decoded inode).
pub struct FileBuffer {
    /// Current byte position.
    pub pos: u64,
    /// Ring slot the position falls into.
    pub current: usize,
    /// Byte offset inside the current block.
    pub offset: usize,
    pub slots: [BufferSlot; BUFFER_COUNT],
    meta: Box<dyn Any>,
}

impl FileBuffer {
    pub fn new(meta: Box<dyn Any>) -> FileBuffer {
        FileBuffer {
            pos: 0,
            current: 0,
            offset: 0,
            slots: [BufferSlot::EMPTY; BUFFER_COUNT],
            meta,
        }
    }

    /// Downcast the filesystem metadata record.
    pub fn meta<T: 'static>(&self) -> Option<&T> {
        self.meta.downcast_ref::<T>()
    }

    /// Ring slot already holding the given logical block, if any.
    pub fn find_cached(&self, logical: u64) -> Option<usize> {
        self.slots[..BUFFER_RING_LIMIT]
            .iter()
            .position(|s| s.logical == Some(logical) && s.data.is_some())
    }

    /// Step `current` to the next read-path slot, wrapping before the
    /// reserved tail.
    pub fn advance_ring(&mut self) -> usize {
        self.current = (self.current + 1) % BUFFER_RING_LIMIT;
        self.current
    }
}

/// Per-file payload, keyed by the file type.
enum Payload {
    Regular(FileBuffer),
    Directory(DirHandle),
    None,
}

/// A directory is driven through one file buffer whose metadata record is
/// the directory's inode.
pub struct DirHandle {
    pub buffer: FileBuffer,
}

/// Shared, counted handle to a mounted filesystem. Dropping the last
/// handle unmounts the volume.
pub struct FsHandle(Rc<dyn Filesystem>);

impl FsHandle {
    pub fn from_rc(fs: Rc<dyn Filesystem>) -> FsHandle {
        FsHandle(fs)
    }

    /// Clone the inner refcounted pointer for a dispatch call.
    pub fn rc(&self) -> Rc<dyn Filesystem> {
        self.0.clone()
    }
}

impl Clone for FsHandle {
    fn clone(&self) -> FsHandle {
        FsHandle(self.0.clone())
    }
}

impl Drop for FsHandle {
    fn drop(&mut self) {
        if Rc::strong_count(&self.0) == 1 {
            self.0.unmount();
        }
    }
}

/// A polymorphic open file.
pub struct GenericFile {
    ty: FileType,
    fs: FsHandle,
    payload: Payload,
}

impl GenericFile {
    pub fn new_regular(fs: FsHandle, buffer: FileBuffer) -> GenericFile {
        GenericFile {
            ty: FileType::Regular,
            fs,
            payload: Payload::Regular(buffer),
        }
    }

    pub fn new_directory(fs: FsHandle, dir: DirHandle) -> GenericFile {
        GenericFile {
            ty: FileType::Directory,
            fs,
            payload: Payload::Directory(dir),
        }
    }

    /// A file with no per-file state (console endpoints, block nodes, …).
    pub fn new_bare(fs: FsHandle, ty: FileType) -> GenericFile {
        GenericFile {
            ty,
            fs,
            payload: Payload::None,
        }
    }

    #[inline]
    pub fn file_type(&self) -> FileType {
        self.ty
    }

    pub fn buffer(&self) -> Option<&FileBuffer> {
        match &self.payload {
            Payload::Regular(b) => Some(b),
            _ => None,
        }
    }

    pub fn buffer_mut(&mut self) -> Option<&mut FileBuffer> {
        match &mut self.payload {
            Payload::Regular(b) => Some(b),
            _ => None,
        }
    }

    /// The file buffer regardless of whether this is a regular file or a
    /// directory handle.
    pub fn any_buffer(&self) -> Option<&FileBuffer> {
        match &self.payload {
            Payload::Regular(b) => Some(b),
            Payload::Directory(d) => Some(&d.buffer),
            Payload::None => None,
        }
    }

    pub fn read_char(&mut self) -> Option<u8> {
        let fs = self.fs.rc();
        fs.read_char(self)
    }

    pub fn write_char(&mut self, c: u8) -> Option<u8> {
        let fs = self.fs.rc();
        fs.write_char(self, c)
    }

    pub fn seek(&mut self, pos: u64) {
        let fs = self.fs.rc();
        fs.seek(self, pos);
    }

    pub fn size(&self) -> u64 {
        self.fs.rc().size(self)
    }

    pub fn lookup(&mut self, name: &str) -> Option<DirEntry> {
        let fs = self.fs.rc();
        fs.lookup(self, name)
    }

    pub fn list(&mut self) -> Vec<DirEntry> {
        let fs = self.fs.rc();
        fs.list(self)
    }

    /// A second, independently positioned handle to the same object.
    pub fn duplicate(&self) -> Option<GenericFile> {
        let fs = self.fs.rc();
        fs.duplicate(self)
    }

    /// Fill `out` from the current position; returns the bytes read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut n = 0;
        while n < out.len() {
            match self.read_char() {
                Some(b) => {
                    out[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    /// Write `data` at the current position; returns the bytes written.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut n = 0;
        for &b in data {
            if self.write_char(b).is_none() {
                break;
            }
            n += 1;
        }
        n
    }
}

/// A directory entry produced by `lookup` or `list`.
pub struct DirEntry {
    pub kind: FileType,
    pub name: String,
    pub file: GenericFile,
}

/// Operations every mounted filesystem provides. Files dispatch through a
/// shared `Rc<dyn Filesystem>`; methods that mint new files take the `Rc`
/// receiver so they can hand it on.
pub trait Filesystem {
    /// Called when the last handle to the volume goes away.
    fn unmount(&self);

    /// Next byte at the file position, or `None` at end of file.
    fn read_char(&self, file: &mut GenericFile) -> Option<u8>;

    /// Store a byte at the file position, or `None` when the position is
    /// not backed by storage.
    fn write_char(&self, file: &mut GenericFile, c: u8) -> Option<u8>;

    /// Move the file position.
    fn seek(&self, file: &mut GenericFile, pos: u64);

    /// Object size in bytes; 0 for files without one.
    fn size(&self, file: &GenericFile) -> u64;

    /// Find `name` in a directory.
    fn lookup(self: Rc<Self>, dir: &mut GenericFile, name: &str) -> Option<DirEntry>;

    /// All live entries of a directory.
    fn list(self: Rc<Self>, dir: &mut GenericFile) -> Vec<DirEntry>;

    /// Open a fresh handle to the same object.
    fn duplicate(self: Rc<Self>, file: &GenericFile) -> Option<GenericFile>;
}

/// Resolve a `/`-separated path starting at `root`. Empty components are
/// skipped, so `"/a//b"` equals `"a/b"`. Returns `None` for the empty
/// path, a missing entry, or a non-directory in the middle.
pub fn resolve_path(root: &mut GenericFile, path: &str) -> Option<DirEntry> {
    let mut current: Option<DirEntry> = None;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        let dir = match current.as_mut() {
            None => &mut *root,
            Some(entry) => &mut entry.file,
        };
        if dir.file_type() != FileType::Directory {
            return None;
        }
        current = Some(dir.lookup(component)?);
    }
    current
}
