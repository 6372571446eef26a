use core::fmt;

use crate::registers::ABI_NAMES;

/// Integer ALU operation shared by the register-register and the immediate
/// forms. The M extension lives here too; it has no immediate form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

impl AluOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Sll => "sll",
            AluOp::Slt => "slt",
            AluOp::Sltu => "sltu",
            AluOp::Xor => "xor",
            AluOp::Srl => "srl",
            AluOp::Sra => "sra",
            AluOp::Or => "or",
            AluOp::And => "and",
            AluOp::Mul => "mul",
            AluOp::Mulh => "mulh",
            AluOp::Mulhsu => "mulhsu",
            AluOp::Mulhu => "mulhu",
            AluOp::Div => "div",
            AluOp::Divu => "divu",
            AluOp::Rem => "rem",
            AluOp::Remu => "remu",
        }
    }

    /// Whether an `OP-IMM` encoding exists for this operation.
    pub fn has_immediate_form(self) -> bool {
        matches!(
            self,
            AluOp::Add | AluOp::Slt | AluOp::Sltu | AluOp::Xor | AluOp::Or | AluOp::And | AluOp::Sll | AluOp::Srl | AluOp::Sra
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWidth {
    Byte,
    Half,
    Word,
    ByteUnsigned,
    HalfUnsigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreWidth {
    Byte,
    Half,
    Word,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

/// A decoded RV32IM instruction.
///
/// Register fields are indices `0..32`. Immediates are already sign
/// extended; `Lui`/`Auipc` carry the final upper value (`imm << 12`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Op { op: AluOp, rd: usize, rs1: usize, rs2: usize },
    OpImm { op: AluOp, rd: usize, rs1: usize, imm: i32 },
    Load { width: LoadWidth, rd: usize, rs1: usize, offset: i32 },
    Store { width: StoreWidth, rs1: usize, rs2: usize, offset: i32 },
    Branch { cond: BranchCond, rs1: usize, rs2: usize, offset: i32 },
    Jal { rd: usize, offset: i32 },
    Jalr { rd: usize, rs1: usize, offset: i32 },
    Lui { rd: usize, imm: i32 },
    Auipc { rd: usize, imm: i32 },
    Fence,
    Ecall,
    Ebreak,
    /// Sandbox extension: halts the machine immediately.
    Stop,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = |i: usize| ABI_NAMES[i & 31];
        match *self {
            Instruction::Op { op, rd, rs1, rs2 } => write!(f, "{} {}, {}, {}", op.mnemonic(), r(rd), r(rs1), r(rs2)),
            Instruction::OpImm { op, rd, rs1, imm } => {
                write!(f, "{}i {}, {}, {}", op.mnemonic(), r(rd), r(rs1), imm)
            }
            Instruction::Load { width, rd, rs1, offset } => {
                let m = match width {
                    LoadWidth::Byte => "lb",
                    LoadWidth::Half => "lh",
                    LoadWidth::Word => "lw",
                    LoadWidth::ByteUnsigned => "lbu",
                    LoadWidth::HalfUnsigned => "lhu",
                };
                write!(f, "{m} {}, {}({})", r(rd), offset, r(rs1))
            }
            Instruction::Store { width, rs1, rs2, offset } => {
                let m = match width {
                    StoreWidth::Byte => "sb",
                    StoreWidth::Half => "sh",
                    StoreWidth::Word => "sw",
                };
                write!(f, "{m} {}, {}({})", r(rs2), offset, r(rs1))
            }
            Instruction::Branch { cond, rs1, rs2, offset } => {
                let m = match cond {
                    BranchCond::Eq => "beq",
                    BranchCond::Ne => "bne",
                    BranchCond::Lt => "blt",
                    BranchCond::Ge => "bge",
                    BranchCond::Ltu => "bltu",
                    BranchCond::Geu => "bgeu",
                };
                write!(f, "{m} {}, {}, {}", r(rs1), r(rs2), offset)
            }
            Instruction::Jal { rd, offset } => write!(f, "jal {}, {}", r(rd), offset),
            Instruction::Jalr { rd, rs1, offset } => write!(f, "jalr {}, {}({})", r(rd), offset, r(rs1)),
            Instruction::Lui { rd, imm } => write!(f, "lui {}, 0x{:x}", r(rd), (imm as u32) >> 12),
            Instruction::Auipc { rd, imm } => write!(f, "auipc {}, 0x{:x}", r(rd), (imm as u32) >> 12),
            Instruction::Fence => f.write_str("fence"),
            Instruction::Ecall => f.write_str("ecall"),
            Instruction::Ebreak => f.write_str("ebreak"),
            Instruction::Stop => f.write_str("stop"),
        }
    }
}
