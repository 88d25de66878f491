//! Adapter around the `xmas-elf` parser. The process loader only ever sees
//! the product below: an entry point plus `(virtual address, bytes)`
//! segments, never ELF headers.

use alloc::vec::Vec;

use xmas_elf::program::Type;
use xmas_elf::ElfFile;

/// One loadable segment.
pub struct Segment<'a> {
    pub vaddr: usize,
    pub data: &'a [u8],
}

/// A parsed executable, ready for [`crate::proc::ProcessTable::load_elf`].
pub struct LoadedElf<'a> {
    pub entry: usize,
    pub segments: Vec<Segment<'a>>,
}

/// Pull the loadable segments out of an ELF image.
pub fn parse(bytes: &[u8]) -> Result<LoadedElf<'_>, &'static str> {
    let elf = ElfFile::new(bytes)?;
    let mut segments = Vec::new();
    for ph in elf.program_iter() {
        if ph.get_type() != Ok(Type::Load) {
            continue;
        }
        let offset = ph.offset() as usize;
        let file_size = ph.file_size() as usize;
        let end = offset.checked_add(file_size).ok_or("segment out of range")?;
        if end > bytes.len() {
            return Err("segment out of range");
        }
        segments.push(Segment {
            vaddr: ph.virtual_addr() as usize,
            data: &bytes[offset..end],
        });
    }
    Ok(LoadedElf {
        entry: elf.header.pt2.entry_point() as usize,
        segments,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! A hand-assembled RV64 executable: one RWX `PT_LOAD` segment at the
    //! bottom of the user window whose code writes its argument and exits.

    use crate::mm::USER_SPACE_BASE;
    use alloc::vec;
    use alloc::vec::Vec;

    fn put(img: &mut [u8], off: usize, bytes: &[u8]) {
        img[off..off + bytes.len()].copy_from_slice(bytes);
    }

    pub fn echo_elf() -> Vec<u8> {
        // ecall; unimp padding. Never executed by tests, only loaded.
        let code: [u8; 8] = [0x73, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let code_offset = 128usize;
        let mut img = vec![0u8; code_offset + code.len()];

        // ELF64 header.
        put(&mut img, 0, &[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        put(&mut img, 16, &2u16.to_le_bytes()); // ET_EXEC
        put(&mut img, 18, &0xf3u16.to_le_bytes()); // EM_RISCV
        put(&mut img, 20, &1u32.to_le_bytes());
        put(&mut img, 24, &(USER_SPACE_BASE as u64).to_le_bytes()); // entry
        put(&mut img, 32, &64u64.to_le_bytes()); // phoff
        put(&mut img, 52, &64u16.to_le_bytes()); // ehsize
        put(&mut img, 54, &56u16.to_le_bytes()); // phentsize
        put(&mut img, 56, &1u16.to_le_bytes()); // phnum

        // Program header: LOAD, RWX.
        put(&mut img, 64, &1u32.to_le_bytes());
        put(&mut img, 68, &7u32.to_le_bytes());
        put(&mut img, 72, &(code_offset as u64).to_le_bytes()); // offset
        put(&mut img, 80, &(USER_SPACE_BASE as u64).to_le_bytes()); // vaddr
        put(&mut img, 88, &(USER_SPACE_BASE as u64).to_le_bytes()); // paddr
        put(&mut img, 96, &(code.len() as u64).to_le_bytes()); // filesz
        put(&mut img, 104, &(code.len() as u64).to_le_bytes()); // memsz
        put(&mut img, 112, &0x1000u64.to_le_bytes()); // align

        put(&mut img, code_offset, &code);
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::USER_SPACE_BASE;

    #[test]
    fn parse_extracts_entry_and_segments() {
        let image = fixtures::echo_elf();
        let elf = parse(&image).unwrap();
        assert_eq!(elf.entry, USER_SPACE_BASE);
        assert_eq!(elf.segments.len(), 1);
        assert_eq!(elf.segments[0].vaddr, USER_SPACE_BASE);
        assert_eq!(elf.segments[0].data[0], 0x73);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse(&[0u8; 32]).is_err());
    }
}
