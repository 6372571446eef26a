//! Minimal ELF32 writer for RISC-V executables.
//!
//! Produces the layout a static linker would: an executable text segment at
//! a page-aligned file offset, an optional writable data segment, and a
//! symbol table with the function and data symbols.

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const PAGE: usize = 0x1000;

const ET_EXEC: u16 = 2;
const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHF_WRITE: u32 = 1;
const SHF_ALLOC: u32 = 2;
const SHF_EXECINSTR: u32 = 4;
const STB_GLOBAL: u8 = 1;
const STT_OBJECT: u8 = 1;
const STT_FUNC: u8 = 2;

const SHN_TEXT: u16 = 1;
const SHN_DATA: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Object,
}

#[derive(Debug, Clone)]
pub struct ElfSymbol {
    pub name: String,
    pub value: u32,
    pub size: u32,
    pub kind: SymbolKind,
}

/// A fully laid out program. `data_base` must be page aligned and past the
/// end of the text.
#[derive(Debug, Clone, Default)]
pub struct ElfImage {
    pub entry: u32,
    pub text_base: u32,
    pub text: Vec<u8>,
    pub data_base: u32,
    pub data: Vec<u8>,
    pub symbols: Vec<ElfSymbol>,
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

struct StringTable {
    bytes: Vec<u8>,
}

impl StringTable {
    fn new() -> Self {
        Self { bytes: vec![0] }
    }

    fn add(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl ElfImage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let has_data = !self.data.is_empty();
        let phnum = if has_data { 2 } else { 1 };

        let text_offset = PAGE;
        let data_offset = text_offset + align_up(self.text.len().max(1), PAGE);
        let tables_offset = if has_data { data_offset + self.data.len() } else { text_offset + self.text.len() };

        let mut strtab = StringTable::new();
        let mut symtab = vec![0u8; SYM_SIZE];
        for sym in &self.symbols {
            let (kind, shndx) = match sym.kind {
                SymbolKind::Function => (STT_FUNC, SHN_TEXT),
                SymbolKind::Object => (STT_OBJECT, SHN_DATA),
            };
            put_u32(&mut symtab, strtab.add(&sym.name));
            put_u32(&mut symtab, sym.value);
            put_u32(&mut symtab, sym.size);
            symtab.push((STB_GLOBAL << 4) | kind);
            symtab.push(0);
            put_u16(&mut symtab, shndx);
        }

        let mut shstrtab = StringTable::new();
        let names = [".text", ".data", ".symtab", ".strtab", ".shstrtab"].map(|n| shstrtab.add(n));

        let symtab_offset = align_up(tables_offset, 4);
        let strtab_offset = symtab_offset + symtab.len();
        let shstrtab_offset = strtab_offset + strtab.bytes.len();
        let shoff = align_up(shstrtab_offset + shstrtab.bytes.len(), 4);
        let shnum = 6u16;

        let mut out = Vec::with_capacity(shoff + shnum as usize * SHDR_SIZE);

        // ELF header
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 1, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        put_u16(&mut out, ET_EXEC);
        put_u16(&mut out, EM_RISCV);
        put_u32(&mut out, 1);
        put_u32(&mut out, self.entry);
        put_u32(&mut out, EHDR_SIZE as u32);
        put_u32(&mut out, shoff as u32);
        put_u32(&mut out, 0);
        put_u16(&mut out, EHDR_SIZE as u16);
        put_u16(&mut out, PHDR_SIZE as u16);
        put_u16(&mut out, phnum);
        put_u16(&mut out, SHDR_SIZE as u16);
        put_u16(&mut out, shnum);
        put_u16(&mut out, 5);

        let phdr = |out: &mut Vec<u8>, offset: usize, vaddr: u32, size: usize, flags: u32| {
            for v in [PT_LOAD, offset as u32, vaddr, vaddr, size as u32, size as u32, flags, PAGE as u32] {
                put_u32(out, v);
            }
        };
        phdr(&mut out, text_offset, self.text_base, self.text.len(), PF_R | PF_X);
        if has_data {
            phdr(&mut out, data_offset, self.data_base, self.data.len(), PF_R | PF_W);
        }

        out.resize(text_offset, 0);
        out.extend_from_slice(&self.text);
        if has_data {
            out.resize(data_offset, 0);
            out.extend_from_slice(&self.data);
        }
        out.resize(symtab_offset, 0);
        out.extend_from_slice(&symtab);
        out.extend_from_slice(&strtab.bytes);
        out.extend_from_slice(&shstrtab.bytes);
        out.resize(shoff, 0);

        let shdr = |out: &mut Vec<u8>, fields: [u32; 10]| {
            for v in fields {
                put_u32(out, v);
            }
        };
        let data_offset = if has_data { data_offset } else { tables_offset };
        shdr(&mut out, [0; 10]);
        shdr(
            &mut out,
            [names[0], SHT_PROGBITS, SHF_ALLOC | SHF_EXECINSTR, self.text_base, text_offset as u32, self.text.len() as u32, 0, 0, 4, 0],
        );
        shdr(
            &mut out,
            [names[1], SHT_PROGBITS, SHF_ALLOC | SHF_WRITE, self.data_base, data_offset as u32, self.data.len() as u32, 0, 0, 8, 0],
        );
        // sh_link of the symbol table is the string table, sh_info the first
        // global symbol.
        shdr(
            &mut out,
            [names[2], SHT_SYMTAB, 0, 0, symtab_offset as u32, symtab.len() as u32, 4, 1, 4, SYM_SIZE as u32],
        );
        shdr(&mut out, [names[3], SHT_STRTAB, 0, 0, strtab_offset as u32, strtab.bytes.len() as u32, 0, 0, 1, 0]);
        shdr(&mut out, [names[4], SHT_STRTAB, 0, 0, shstrtab_offset as u32, shstrtab.bytes.len() as u32, 0, 0, 1, 0]);

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_text_offset() {
        let image = ElfImage {
            entry: 0x10000,
            text_base: 0x10000,
            text: vec![0x73, 0, 0, 0],
            ..Default::default()
        };
        let bytes = image.to_bytes();
        assert_eq!(&bytes[..4], b"\x7fELF");
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), EM_RISCV);
        assert_eq!(&bytes[PAGE..PAGE + 4], &[0x73, 0, 0, 0]);
        // a single program header when there is no data
        assert_eq!(u16::from_le_bytes([bytes[44], bytes[45]]), 1);
    }
}
