//! The console as a generic file, so the serial port can sit in a file
//! descriptor slot like anything else.

use alloc::rc::Rc;
use alloc::vec::Vec;

use super::{DirEntry, FileType, Filesystem, FsHandle, GenericFile};
use crate::driver::uart::Uart;

/// Adapter exposing the UART through the filesystem vtable. One instance
/// backs stdin, stdout and stderr.
pub struct ConsoleFilesystem {
    uart: Uart,
}

impl ConsoleFilesystem {
    pub fn new(uart: Uart) -> ConsoleFilesystem {
        ConsoleFilesystem { uart }
    }
}

impl Filesystem for ConsoleFilesystem {
    fn unmount(&self) {}

    fn read_char(&self, _file: &mut GenericFile) -> Option<u8> {
        // Spin until a byte arrives; the console never reports EOF.
        loop {
            if let Some(b) = self.uart.get() {
                return Some(b);
            }
        }
    }

    fn write_char(&self, _file: &mut GenericFile, c: u8) -> Option<u8> {
        self.uart.put(c);
        Some(c)
    }

    fn seek(&self, _file: &mut GenericFile, _pos: u64) {}

    fn size(&self, _file: &GenericFile) -> u64 {
        0
    }

    fn lookup(self: Rc<Self>, _dir: &mut GenericFile, _name: &str) -> Option<DirEntry> {
        None
    }

    fn list(self: Rc<Self>, _dir: &mut GenericFile) -> Vec<DirEntry> {
        Vec::new()
    }

    fn duplicate(self: Rc<Self>, file: &GenericFile) -> Option<GenericFile> {
        Some(GenericFile::new_bare(
            FsHandle::from_rc(self),
            file.file_type(),
        ))
    }
}

/// Build the three standard console files for a first process.
pub fn make_stdio(uart: Uart) -> (GenericFile, GenericFile, GenericFile) {
    let fs: Rc<dyn Filesystem> = Rc::new(ConsoleFilesystem::new(uart));
    let mk = || GenericFile::new_bare(FsHandle::from_rc(fs.clone()), FileType::Special);
    (mk(), mk(), mk())
}
