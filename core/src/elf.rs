//! ELF32 support

use tracing::{debug, warn};

use crate::bus::Router;
use crate::error::{Error, Result};

/// Size of the ELF identification array.
pub const EI_NIDENT: usize = 16;
/// Magic number for ELF files.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
/// RISC-V machine type.
pub const EM_RISCV: u16 = 0xf3;
/// Index of ELF class in e_ident.
pub const EI_CLASS: usize = 4;
/// Index of data encoding in e_ident.
pub const EI_DATA: usize = 5;

/// 32-bit ELF class.
pub const ELF_CLASS_32: u8 = 1;
/// Little-endian data encoding.
pub const ELF_DATA_LSB: u8 = 1;

/// Loadable segment type.
pub const PT_LOAD: u32 = 1;

pub const PF_X: u32 = 0x1;
pub const PF_W: u32 = 0x2;
pub const PF_R: u32 = 0x4;

pub const ELF_HEADER_SIZE: usize = 52;
pub const PROGRAM_HEADER_SIZE: usize = 32;

fn u16_at(src: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([src[offset], src[offset + 1]])
}

fn u32_at(src: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([src[offset], src[offset + 1], src[offset + 2], src[offset + 3]])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfHeader {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

impl ElfHeader {
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        if src.len() < ELF_HEADER_SIZE {
            warn!("ELF header too short: expected {}, got {}", ELF_HEADER_SIZE, src.len());
            return Err(Error::InvalidElf("truncated header"));
        }
        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&src[..EI_NIDENT]);
        let res = Self {
            e_ident,
            e_type: u16_at(src, 16),
            e_machine: u16_at(src, 18),
            e_version: u32_at(src, 20),
            e_entry: u32_at(src, 24),
            e_phoff: u32_at(src, 28),
            e_shoff: u32_at(src, 32),
            e_flags: u32_at(src, 36),
            e_ehsize: u16_at(src, 40),
            e_phentsize: u16_at(src, 42),
            e_phnum: u16_at(src, 44),
            e_shentsize: u16_at(src, 46),
            e_shnum: u16_at(src, 48),
            e_shstrndx: u16_at(src, 50),
        };

        let magic = &res.e_ident[..4];
        if magic != ELF_MAGIC {
            warn!("Invalid ELF magic number: expected {:?}, got {:?}", ELF_MAGIC, magic);
            return Err(Error::InvalidElf("bad magic"));
        }

        if res.e_ident[EI_CLASS] != ELF_CLASS_32 {
            warn!("Unsupported ELF class: expected {}, got {}", ELF_CLASS_32, res.e_ident[EI_CLASS]);
            return Err(Error::InvalidElf("not a 32-bit image"));
        }

        if res.e_ident[EI_DATA] != ELF_DATA_LSB {
            warn!("Unsupported ELF data encoding: {}", res.e_ident[EI_DATA]);
            return Err(Error::InvalidElf("not little-endian"));
        }

        if res.e_machine != EM_RISCV {
            warn!("Unsupported machine type: expected {}, got {}", EM_RISCV, res.e_machine);
            return Err(Error::InvalidElf("not a RISC-V image"));
        }

        Ok(res)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

impl ProgramHeader {
    pub fn from_bytes(src: &[u8]) -> Result<Self> {
        if src.len() < PROGRAM_HEADER_SIZE {
            warn!("Program header too short: expected {}, got {}", PROGRAM_HEADER_SIZE, src.len());
            return Err(Error::InvalidElf("truncated program header"));
        }
        Ok(Self {
            p_type: u32_at(src, 0),
            p_offset: u32_at(src, 4),
            p_vaddr: u32_at(src, 8),
            p_paddr: u32_at(src, 12),
            p_filesz: u32_at(src, 16),
            p_memsz: u32_at(src, 20),
            p_flags: u32_at(src, 24),
            p_align: u32_at(src, 28),
        })
    }
}

pub fn is_elf(image: &[u8]) -> bool {
    image.len() >= 4 && image[..4] == ELF_MAGIC
}

/// Copies every `PT_LOAD` segment of `image` into `bus`, zero-filling up to
/// `p_memsz`. Returns the entry point.
pub fn load_elf(image: &[u8], bus: &mut Router) -> Result<u32> {
    let ehdr = ElfHeader::from_bytes(image)?;
    if (ehdr.e_phentsize as usize) < PROGRAM_HEADER_SIZE && ehdr.e_phnum > 0 {
        return Err(Error::InvalidElf("program header entry too small"));
    }

    for i in 0..ehdr.e_phnum as usize {
        let offset = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = image
            .get(offset..offset + PROGRAM_HEADER_SIZE)
            .ok_or(Error::InvalidElf("program header out of bounds"))
            .and_then(ProgramHeader::from_bytes)?;
        if phdr.p_type != PT_LOAD {
            continue;
        }
        if phdr.p_filesz > phdr.p_memsz {
            return Err(Error::InvalidElf("segment file size exceeds memory size"));
        }

        let start = phdr.p_offset as usize;
        let data = image
            .get(start..start + phdr.p_filesz as usize)
            .ok_or(Error::InvalidElf("segment out of bounds"))?;
        debug!(
            "loading segment {:#010x}..{:#010x} ({} bytes from file)",
            phdr.p_vaddr,
            phdr.p_vaddr as u64 + phdr.p_memsz as u64,
            phdr.p_filesz
        );
        bus.load(phdr.p_vaddr, data)?;

        let bss = phdr.p_memsz - phdr.p_filesz;
        if bss > 0 {
            bus.fill(phdr.p_vaddr.wrapping_add(phdr.p_filesz), bss, 0)?;
        }
    }

    Ok(ehdr.e_entry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::bus::{Bus, BusConfig, Peripherals};
    use crate::config::RAM_START;

    /// Builds a minimal RISC-V ELF32 with one `PT_LOAD` segment.
    pub fn build_elf(entry: u32, vaddr: u32, code: &[u8], memsz: u32) -> Vec<u8> {
        let mut image = vec![0u8; ELF_HEADER_SIZE + PROGRAM_HEADER_SIZE];
        image[..4].copy_from_slice(&ELF_MAGIC);
        image[EI_CLASS] = ELF_CLASS_32;
        image[EI_DATA] = ELF_DATA_LSB;
        image[6] = 1;
        image[16..18].copy_from_slice(&2u16.to_le_bytes());
        image[18..20].copy_from_slice(&EM_RISCV.to_le_bytes());
        image[20..24].copy_from_slice(&1u32.to_le_bytes());
        image[24..28].copy_from_slice(&entry.to_le_bytes());
        image[28..32].copy_from_slice(&(ELF_HEADER_SIZE as u32).to_le_bytes());
        image[40..42].copy_from_slice(&(ELF_HEADER_SIZE as u16).to_le_bytes());
        image[42..44].copy_from_slice(&(PROGRAM_HEADER_SIZE as u16).to_le_bytes());
        image[44..46].copy_from_slice(&1u16.to_le_bytes());

        let ph = ELF_HEADER_SIZE;
        let data_offset = (ELF_HEADER_SIZE + PROGRAM_HEADER_SIZE) as u32;
        image[ph..ph + 4].copy_from_slice(&PT_LOAD.to_le_bytes());
        image[ph + 4..ph + 8].copy_from_slice(&data_offset.to_le_bytes());
        image[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
        image[ph + 12..ph + 16].copy_from_slice(&vaddr.to_le_bytes());
        image[ph + 16..ph + 20].copy_from_slice(&(code.len() as u32).to_le_bytes());
        image[ph + 20..ph + 24].copy_from_slice(&memsz.to_le_bytes());
        image[ph + 24..ph + 28].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
        image[ph + 28..ph + 32].copy_from_slice(&4u32.to_le_bytes());
        image.extend_from_slice(code);
        image
    }

    #[test]
    fn test_elf_header_from_bytes() {
        let image = build_elf(0x8000_0000, 0x8000_0000, &[], 0);
        let ehdr = ElfHeader::from_bytes(&image).unwrap();
        assert_eq!(ehdr.e_entry, 0x8000_0000);
        assert_eq!(ehdr.e_phnum, 1);
        assert!(is_elf(&image));

        let mut bad = image.clone();
        bad[EI_CLASS] = 2;
        assert!(matches!(ElfHeader::from_bytes(&bad), Err(Error::InvalidElf(_))));

        let mut bad = image.clone();
        bad[18] = 0x3e;
        assert!(matches!(ElfHeader::from_bytes(&bad), Err(Error::InvalidElf(_))));

        assert!(ElfHeader::from_bytes(&image[..20]).is_err());
    }

    #[test]
    fn test_load_elf_segments() {
        let mut bus = crate::bus::Router::with_default_map(&BusConfig::default(), Peripherals::default()).unwrap();
        let base = RAM_START + 0x100;
        // Dirty the bss area first so the zero fill is observable.
        bus.write(base + 8, 0xdead_beef, crate::bus::ByteEnable::ALL);

        let code = [0x13, 0x05, 0x10, 0x00, 0x73, 0x00, 0x10, 0x00];
        let image = build_elf(base, base, &code, 16);
        let entry = load_elf(&image, &mut bus).unwrap();
        assert_eq!(entry, base);
        assert_eq!(bus.peek(base), Some(0x0010_0513));
        assert_eq!(bus.peek(base + 4), Some(0x0010_0073));
        assert_eq!(bus.peek(base + 8), Some(0));
    }

    #[test]
    fn test_load_elf_rejects_truncated_segment() {
        let mut bus = crate::bus::Router::with_default_map(&BusConfig::default(), Peripherals::default()).unwrap();
        let mut image = build_elf(RAM_START, RAM_START, &[0; 8], 8);
        image.truncate(image.len() - 4);
        assert!(matches!(load_elf(&image, &mut bus), Err(Error::InvalidElf(_))));
    }

    #[test]
    fn test_load_elf_rejects_oversized_bss() {
        let mut bus = crate::bus::Router::with_default_map(&BusConfig::default(), Peripherals::default()).unwrap();
        let image = build_elf(RAM_START, RAM_START, &[0; 8], 0xffff_fff0);
        assert!(matches!(load_elf(&image, &mut bus), Err(Error::ImageTooLarge { .. })));
    }
}
