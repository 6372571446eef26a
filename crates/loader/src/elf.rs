use goblin::elf::header::{EM_RISCV, ET_EXEC};
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};
use goblin::elf::section_header::SHT_NOBITS;
use goblin::elf::Elf;

use crate::symbols::SymbolTable;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("malformed ELF: {0}")]
    Goblin(#[from] goblin::error::Error),
    #[error("not a 32-bit little-endian RISC-V executable")]
    NotRiscv32,
    #[error("ELF is not statically linked (type {0})")]
    NotExecutable(u16),
    #[error("segment at 0x{vaddr:08x} lies outside the file or the 32-bit address space")]
    SegmentOutOfBounds { vaddr: u64 },
    #[error("ELF has no loadable segments")]
    NoLoadableSegments,
}

pub struct ElfInfo<'a> {
    pub code: &'a [u8],
    pub sections: Vec<ElfSection<'a>>,
}

pub struct ElfSection<'a> {
    pub name: String,
    pub addr: u64,
    pub size: u64,
    pub data: &'a [u8],
}

impl<'a> ElfInfo<'a> {
    /// Returns a flat buffer with all sections whose name starts with
    /// `prefix` merged, and the base address. NOBITS sections come back
    /// zeroed.
    pub fn get_flat(&self, prefix: &str) -> Option<(Vec<u8>, u64)> {
        let matching: Vec<&ElfSection> = self.sections.iter().filter(|s| s.name.starts_with(prefix)).collect();

        let min_addr = matching.iter().map(|s| s.addr).min()?;
        let max_addr = matching.iter().map(|s| s.addr + s.size).max()?;

        let mut flat = vec![0u8; (max_addr - min_addr) as usize];
        for section in matching {
            let offset = (section.addr - min_addr) as usize;
            flat[offset..offset + section.data.len()].copy_from_slice(section.data);
        }
        Some((flat, min_addr))
    }

    /// Returns a reference to a section by its name, if it exists.
    pub fn get_section_by_name(&self, name: &str) -> Option<&ElfSection<'a>> {
        self.sections.iter().find(|s| s.name == name)
    }
}

pub fn parse_elf_from_bytes(bytes: &[u8]) -> Result<ElfInfo<'_>, LoadError> {
    let elf = Elf::parse(bytes)?;

    let mut sections = Vec::new();
    for section in elf.section_headers.iter() {
        if let Some(name) = elf.shdr_strtab.get_at(section.sh_name) {
            let offset = section.sh_offset as usize;
            let size = section.sh_size as usize;

            let is_nobits = section.sh_type == SHT_NOBITS;
            if is_nobits || offset.checked_add(size).is_some_and(|end| end <= bytes.len()) {
                let data = if is_nobits { &bytes[0..0] } else { &bytes[offset..offset + size] };
                sections.push(ElfSection { name: name.to_string(), addr: section.sh_addr, size: section.sh_size, data });
            }
        }
    }

    Ok(ElfInfo { code: bytes, sections })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentFlags {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
}

impl SegmentFlags {
    fn from_p_flags(flags: u32) -> Self {
        Self { read: flags & PF_R != 0, write: flags & PF_W != 0, exec: flags & PF_X != 0 }
    }
}

/// One `PT_LOAD` segment. Bytes past `data` up to `mem_size` are zero.
#[derive(Debug, Clone)]
pub struct Segment {
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub mem_size: u32,
    pub flags: SegmentFlags,
}

impl Segment {
    pub fn end(&self) -> u32 {
        self.vaddr.wrapping_add(self.mem_size)
    }
}

/// Everything the sandbox takes from a guest binary. Owns its data so the
/// original bytes can be dropped after loading.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    pub entry: u32,
    pub segments: Vec<Segment>,
    pub symbols: SymbolTable,
}

impl ProgramImage {
    pub fn parse(bytes: &[u8]) -> Result<Self, LoadError> {
        let elf = Elf::parse(bytes)?;
        if elf.is_64 || !elf.little_endian || elf.header.e_machine != EM_RISCV {
            return Err(LoadError::NotRiscv32);
        }
        if elf.header.e_type != ET_EXEC {
            return Err(LoadError::NotExecutable(elf.header.e_type));
        }

        let mut segments = Vec::new();
        for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
            let out_of_bounds = || LoadError::SegmentOutOfBounds { vaddr: ph.p_vaddr };
            let start = usize::try_from(ph.p_offset).map_err(|_| out_of_bounds())?;
            let len = usize::try_from(ph.p_filesz).map_err(|_| out_of_bounds())?;
            let data = start
                .checked_add(len)
                .and_then(|end| bytes.get(start..end))
                .ok_or_else(out_of_bounds)?;
            let vaddr = u32::try_from(ph.p_vaddr).map_err(|_| out_of_bounds())?;
            let mem_size = u32::try_from(ph.p_memsz.max(ph.p_filesz)).map_err(|_| out_of_bounds())?;
            if vaddr.checked_add(mem_size).is_none() {
                return Err(out_of_bounds());
            }
            segments.push(Segment { vaddr, data: data.to_vec(), mem_size, flags: SegmentFlags::from_p_flags(ph.p_flags) });
        }
        if segments.is_empty() {
            return Err(LoadError::NoLoadableSegments);
        }

        let symbols = SymbolTable::from_elf(&elf);
        log::debug!(
            "parsed guest ELF: entry 0x{:08x}, {} segments, {} symbols",
            elf.entry,
            segments.len(),
            symbols.len()
        );
        Ok(Self { entry: elf.entry as u32, segments, symbols })
    }

    pub fn executable_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.flags.exec)
    }

    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.symbols.address_of(name)
    }

    /// Highest address used by any segment, the start of free address space.
    pub fn end(&self) -> u32 {
        self.segments.iter().map(Segment::end).max().unwrap_or(0)
    }
}
