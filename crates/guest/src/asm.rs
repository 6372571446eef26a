use std::collections::HashMap;

use vm::Register;
use vm::encoder::encode;
use vm::instruction::{AluOp, BranchCond, Instruction, LoadWidth, StoreWidth};

use crate::elf::{ElfImage, ElfSymbol, SymbolKind};

/// Load address of the text segment.
pub const TEXT_BASE: u32 = 0x10000;
const PAGE: usize = 0x1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AsmError {
    #[error("undefined label `{0}`")]
    UndefinedLabel(String),
    #[error("label `{0}` defined twice")]
    DuplicateLabel(String),
    #[error("`{0}` cannot be encoded")]
    Unencodable(String),
    #[error("jump to `{0}` is out of range")]
    OutOfRange(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Text,
    Data,
}

/// Text item; label references are resolved at layout time.
#[derive(Debug, Clone)]
enum Item {
    Instr(Instruction),
    Branch { cond: BranchCond, rs1: usize, rs2: usize, label: String },
    Jal { rd: usize, label: String },
    /// `lui` + `addi` pair loading an absolute label address.
    La { rd: usize, label: String },
}

impl Item {
    fn size(&self) -> usize {
        match self {
            Item::La { .. } => 8,
            _ => 4,
        }
    }
}

/// Builds a guest program: text, data and symbols.
///
/// Every emitter returns `&mut Self` so programs read top to bottom:
///
/// ```
/// use guest::{ProgramBuilder, Register::*};
/// let mut p = ProgramBuilder::new();
/// p.function("answer").li(A0, 42).ret();
/// let elf = p.build_elf().unwrap();
/// assert_eq!(&elf[..4], b"\x7fELF");
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    items: Vec<Item>,
    text_len: usize,
    data: Vec<u8>,
    /// (data offset, label, addend): a word holding a label address.
    data_fixups: Vec<(usize, String, i32)>,
    labels: HashMap<String, (Section, usize)>,
    functions: Vec<(String, usize)>,
    objects: Vec<(String, usize)>,
    entry: Option<String>,
    error: Option<AsmError>,
}

fn r(reg: Register) -> usize {
    reg.index()
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn define(&mut self, name: &str, section: Section, offset: usize) {
        if self.labels.insert(name.to_string(), (section, offset)).is_some() && self.error.is_none() {
            self.error = Some(AsmError::DuplicateLabel(name.to_string()));
        }
    }

    fn push(&mut self, item: Item) -> &mut Self {
        self.text_len += item.size();
        self.items.push(item);
        self
    }

    /// A local code label.
    pub fn label(&mut self, name: &str) -> &mut Self {
        self.define(name, Section::Text, self.text_len);
        self
    }

    /// Starts a function: a code label plus a global function symbol that
    /// extends to the next function.
    pub fn function(&mut self, name: &str) -> &mut Self {
        self.define(name, Section::Text, self.text_len);
        self.functions.push((name.to_string(), self.text_len));
        self
    }

    /// Sets the ELF entry point. Defaults to `_start` when defined, else
    /// the first function.
    pub fn entry(&mut self, name: &str) -> &mut Self {
        self.entry = Some(name.to_string());
        self
    }

    pub fn inst(&mut self, instr: Instruction) -> &mut Self {
        self.push(Item::Instr(instr))
    }

    fn op_imm(&mut self, op: AluOp, rd: Register, rs1: Register, imm: i32) -> &mut Self {
        self.inst(Instruction::OpImm { op, rd: r(rd), rs1: r(rs1), imm })
    }

    fn op(&mut self, op: AluOp, rd: Register, rs1: Register, rs2: Register) -> &mut Self {
        self.inst(Instruction::Op { op, rd: r(rd), rs1: r(rs1), rs2: r(rs2) })
    }

    /// Loads a 32-bit constant with `addi` or `lui` + `addi`.
    pub fn li(&mut self, rd: Register, value: i32) -> &mut Self {
        if (-2048..2048).contains(&value) {
            return self.addi(rd, Register::Zero, value);
        }
        let hi = value.wrapping_add(0x800) & !0xfff;
        let lo = value.wrapping_sub(hi);
        self.inst(Instruction::Lui { rd: r(rd), imm: hi });
        if lo != 0 {
            self.addi(rd, rd, lo);
        }
        self
    }

    /// Loads the address of a code or data label.
    pub fn la(&mut self, rd: Register, label: &str) -> &mut Self {
        self.push(Item::La { rd: r(rd), label: label.to_string() })
    }

    pub fn mv(&mut self, rd: Register, rs: Register) -> &mut Self {
        self.addi(rd, rs, 0)
    }

    pub fn addi(&mut self, rd: Register, rs1: Register, imm: i32) -> &mut Self {
        self.op_imm(AluOp::Add, rd, rs1, imm)
    }

    pub fn add(&mut self, rd: Register, rs1: Register, rs2: Register) -> &mut Self {
        self.op(AluOp::Add, rd, rs1, rs2)
    }

    pub fn sub(&mut self, rd: Register, rs1: Register, rs2: Register) -> &mut Self {
        self.op(AluOp::Sub, rd, rs1, rs2)
    }

    pub fn mul(&mut self, rd: Register, rs1: Register, rs2: Register) -> &mut Self {
        self.op(AluOp::Mul, rd, rs1, rs2)
    }

    pub fn slti(&mut self, rd: Register, rs1: Register, imm: i32) -> &mut Self {
        self.op_imm(AluOp::Slt, rd, rs1, imm)
    }

    pub fn lw(&mut self, rd: Register, rs1: Register, offset: i32) -> &mut Self {
        self.inst(Instruction::Load { width: LoadWidth::Word, rd: r(rd), rs1: r(rs1), offset })
    }

    pub fn lbu(&mut self, rd: Register, rs1: Register, offset: i32) -> &mut Self {
        self.inst(Instruction::Load { width: LoadWidth::ByteUnsigned, rd: r(rd), rs1: r(rs1), offset })
    }

    pub fn sw(&mut self, rs2: Register, rs1: Register, offset: i32) -> &mut Self {
        self.inst(Instruction::Store { width: StoreWidth::Word, rs1: r(rs1), rs2: r(rs2), offset })
    }

    pub fn sb(&mut self, rs2: Register, rs1: Register, offset: i32) -> &mut Self {
        self.inst(Instruction::Store { width: StoreWidth::Byte, rs1: r(rs1), rs2: r(rs2), offset })
    }

    fn branch(&mut self, cond: BranchCond, rs1: Register, rs2: Register, label: &str) -> &mut Self {
        self.push(Item::Branch { cond, rs1: r(rs1), rs2: r(rs2), label: label.to_string() })
    }

    pub fn beq(&mut self, rs1: Register, rs2: Register, label: &str) -> &mut Self {
        self.branch(BranchCond::Eq, rs1, rs2, label)
    }

    pub fn bne(&mut self, rs1: Register, rs2: Register, label: &str) -> &mut Self {
        self.branch(BranchCond::Ne, rs1, rs2, label)
    }

    pub fn blt(&mut self, rs1: Register, rs2: Register, label: &str) -> &mut Self {
        self.branch(BranchCond::Lt, rs1, rs2, label)
    }

    pub fn bge(&mut self, rs1: Register, rs2: Register, label: &str) -> &mut Self {
        self.branch(BranchCond::Ge, rs1, rs2, label)
    }

    pub fn beqz(&mut self, rs: Register, label: &str) -> &mut Self {
        self.beq(rs, Register::Zero, label)
    }

    pub fn bnez(&mut self, rs: Register, label: &str) -> &mut Self {
        self.bne(rs, Register::Zero, label)
    }

    pub fn j(&mut self, label: &str) -> &mut Self {
        self.push(Item::Jal { rd: 0, label: label.to_string() })
    }

    pub fn call(&mut self, label: &str) -> &mut Self {
        self.push(Item::Jal { rd: r(Register::Ra), label: label.to_string() })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.inst(Instruction::Jalr { rd: 0, rs1: r(Register::Ra), offset: 0 })
    }

    pub fn ecall(&mut self) -> &mut Self {
        self.inst(Instruction::Ecall)
    }

    pub fn ebreak(&mut self) -> &mut Self {
        self.inst(Instruction::Ebreak)
    }

    /// The sandbox's fast-exit instruction.
    pub fn stop(&mut self) -> &mut Self {
        self.inst(Instruction::Stop)
    }

    /// Reserves `frame` bytes of stack and saves `ra` at the top of it.
    pub fn prologue(&mut self, frame: i32) -> &mut Self {
        self.addi(Register::Sp, Register::Sp, -frame).sw(Register::Ra, Register::Sp, frame - 4)
    }

    /// Undoes `prologue` and returns.
    pub fn epilogue(&mut self, frame: i32) -> &mut Self {
        self.lw(Register::Ra, Register::Sp, frame - 4).addi(Register::Sp, Register::Sp, frame).ret()
    }

    pub fn align_data(&mut self, align: usize) -> &mut Self {
        let len = self.data.len().next_multiple_of(align);
        self.data.resize(len, 0);
        self
    }

    /// Starts a data object at 8-byte alignment. Its size is whatever is
    /// appended until the next object.
    pub fn object(&mut self, name: &str) -> &mut Self {
        self.align_data(8);
        let offset = self.data.len();
        self.define(name, Section::Data, offset);
        self.objects.push((name.to_string(), offset));
        self
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn word(&mut self, value: u32) -> &mut Self {
        self.bytes(&value.to_le_bytes())
    }

    /// A data word holding `label`'s address plus `addend`.
    pub fn address_word(&mut self, label: &str, addend: i32) -> &mut Self {
        self.data_fixups.push((self.data.len(), label.to_string(), addend));
        self.word(0)
    }

    pub fn data(&mut self, name: &str, bytes: &[u8]) -> &mut Self {
        self.object(name).bytes(bytes)
    }

    pub fn zeroed(&mut self, name: &str, len: usize) -> &mut Self {
        self.object(name);
        self.data.resize(self.data.len() + len, 0);
        self
    }

    fn data_base(&self) -> u32 {
        TEXT_BASE + self.text_len.max(1).next_multiple_of(PAGE) as u32
    }

    fn address(&self, label: &str) -> Result<u32, AsmError> {
        match self.labels.get(label) {
            Some(&(Section::Text, offset)) => Ok(TEXT_BASE + offset as u32),
            Some(&(Section::Data, offset)) => Ok(self.data_base() + offset as u32),
            None => Err(AsmError::UndefinedLabel(label.to_string())),
        }
    }

    fn encode(&self, instr: Instruction) -> Result<u32, AsmError> {
        encode(&instr).ok_or_else(|| AsmError::Unencodable(instr.to_string()))
    }

    /// Lays the program out and resolves every label.
    pub fn build(&self) -> Result<ElfImage, AsmError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }

        let mut text = Vec::with_capacity(self.text_len);
        let mut pc = TEXT_BASE;
        for item in &self.items {
            let words = match item {
                Item::Instr(instr) => vec![self.encode(*instr)?],
                Item::Branch { cond, rs1, rs2, label } => {
                    let offset = self.address(label)?.wrapping_sub(pc) as i32;
                    let instr = Instruction::Branch { cond: *cond, rs1: *rs1, rs2: *rs2, offset };
                    vec![encode(&instr).ok_or_else(|| AsmError::OutOfRange(label.clone()))?]
                }
                Item::Jal { rd, label } => {
                    let offset = self.address(label)?.wrapping_sub(pc) as i32;
                    vec![encode(&Instruction::Jal { rd: *rd, offset }).ok_or_else(|| AsmError::OutOfRange(label.clone()))?]
                }
                Item::La { rd, label } => {
                    let addr = self.address(label)? as i32;
                    let hi = addr.wrapping_add(0x800) & !0xfff;
                    vec![
                        self.encode(Instruction::Lui { rd: *rd, imm: hi })?,
                        self.encode(Instruction::OpImm { op: AluOp::Add, rd: *rd, rs1: *rd, imm: addr.wrapping_sub(hi) })?,
                    ]
                }
            };
            for word in words {
                text.extend_from_slice(&word.to_le_bytes());
                pc += 4;
            }
        }

        let mut data = self.data.clone();
        for (offset, label, addend) in &self.data_fixups {
            let value = self.address(label)?.wrapping_add(*addend as u32);
            data[*offset..*offset + 4].copy_from_slice(&value.to_le_bytes());
        }

        let mut symbols = Vec::with_capacity(self.functions.len() + self.objects.len());
        let mut starts: Vec<usize> = self.functions.iter().map(|(_, start)| *start).collect();
        starts.sort_unstable();
        for (name, start) in &self.functions {
            let end = starts.iter().copied().find(|&s| s > *start).unwrap_or(self.text_len);
            symbols.push(ElfSymbol {
                name: name.clone(),
                value: TEXT_BASE + *start as u32,
                size: (end - start) as u32,
                kind: SymbolKind::Function,
            });
        }
        for (i, (name, start)) in self.objects.iter().enumerate() {
            let end = self.objects.get(i + 1).map(|(_, s)| *s).unwrap_or(data.len());
            symbols.push(ElfSymbol {
                name: name.clone(),
                value: self.data_base() + *start as u32,
                size: (end - start) as u32,
                kind: SymbolKind::Object,
            });
        }

        let entry = match &self.entry {
            Some(name) => self.address(name)?,
            None if self.labels.contains_key("_start") => self.address("_start")?,
            None => self.functions.first().map(|(_, start)| TEXT_BASE + *start as u32).unwrap_or(TEXT_BASE),
        };

        Ok(ElfImage { entry, text_base: TEXT_BASE, text, data_base: self.data_base(), data, symbols })
    }

    pub fn build_elf(&self) -> Result<Vec<u8>, AsmError> {
        Ok(self.build()?.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm::decoder::decode;
    use Register::*;

    fn words(image: &ElfImage) -> Vec<Instruction> {
        image
            .text
            .chunks_exact(4)
            .map(|w| decode(u32::from_le_bytes([w[0], w[1], w[2], w[3]])).unwrap())
            .collect()
    }

    #[test]
    fn backward_branch_resolves() {
        let mut p = ProgramBuilder::new();
        p.function("f").label("loop").addi(T0, T0, -1).bnez(T0, "loop").ret();
        let image = p.build().unwrap();
        assert_eq!(words(&image)[1], Instruction::Branch { cond: BranchCond::Ne, rs1: 5, rs2: 0, offset: -4 });
    }

    #[test]
    fn li_splits_large_constants() {
        let mut p = ProgramBuilder::new();
        p.li(A0, 0x1234_5fff);
        let image = p.build().unwrap();
        let w = words(&image);
        let (Instruction::Lui { imm: hi, .. }, Instruction::OpImm { imm: lo, .. }) = (w[0], w[1]) else {
            panic!("unexpected {w:?}");
        };
        assert_eq!(hi.wrapping_add(lo), 0x1234_5fff);
    }

    #[test]
    fn data_labels_live_after_text() {
        let mut p = ProgramBuilder::new();
        p.function("f").la(A0, "value").ret();
        p.data("value", &[1, 2, 3, 4]).object("ptr").address_word("value", 2);
        let image = p.build().unwrap();
        assert_eq!(image.data_base, TEXT_BASE + 0x1000);
        assert_eq!(&image.data[8..12], &(TEXT_BASE + 0x1002).to_le_bytes());
        let value = image.symbols.iter().find(|s| s.name == "value").unwrap();
        assert_eq!((value.value, value.size), (TEXT_BASE + 0x1000, 8));
    }

    #[test]
    fn missing_and_duplicate_labels() {
        let mut p = ProgramBuilder::new();
        p.j("nowhere");
        assert_eq!(p.build().unwrap_err(), AsmError::UndefinedLabel("nowhere".into()));

        let mut p = ProgramBuilder::new();
        p.function("f").function("f");
        assert_eq!(p.build().unwrap_err(), AsmError::DuplicateLabel("f".into()));
    }
}
