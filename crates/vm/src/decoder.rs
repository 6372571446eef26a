use crate::instruction::{AluOp, BranchCond, Instruction, LoadWidth, StoreWidth};
use crate::isa::{Opcode, STOP_IMMEDIATE};

/// Decodes a 32-bit RISC-V instruction word.
///
/// EDUCATIONAL PURPOSE: every RV32 instruction keeps its opcode in the low
/// seven bits and its register numbers at fixed positions; only the
/// immediate moves around between formats:
/// ```text
/// 31:25  funct7  | 24:20 rs2 | 19:15 rs1 | 14:12 funct3 | 11:7 rd | 6:0 opcode
/// ```
/// - I-type: 12-bit immediate in bits 31:20
/// - S-type: 12-bit immediate split across bits 31:25 and 11:7
/// - B-type: 13-bit even offset scattered over bits 31, 30:25, 11:8 and 7
/// - U-type: upper 20 bits
/// - J-type: 21-bit even offset scattered over bits 31:12
///
/// Compressed encodings are not accepted: a word whose low two bits are
/// not `0b11` is illegal here. So is the all-zero word, which catches jumps
/// into zeroed memory.
///
/// RETURNS: `None` for anything the interpreter cannot execute.
pub fn decode(word: u32) -> Option<Instruction> {
    if word & 0b11 != 0b11 {
        return None;
    }
    let opcode = Opcode::from_u8((word & 0x7f) as u8)?;

    let rd = ((word >> 7) & 0x1f) as usize;
    let funct3 = (word >> 12) & 0x07;
    let rs1 = ((word >> 15) & 0x1f) as usize;
    let rs2 = ((word >> 20) & 0x1f) as usize;
    let funct7 = (word >> 25) & 0x7f;
    let imm_i = (word as i32) >> 20;

    match opcode {
        Opcode::Op => {
            let op = match (funct3, funct7) {
                (0x0, 0x00) => AluOp::Add,
                (0x0, 0x20) => AluOp::Sub,
                (0x1, 0x00) => AluOp::Sll,
                (0x2, 0x00) => AluOp::Slt,
                (0x3, 0x00) => AluOp::Sltu,
                (0x4, 0x00) => AluOp::Xor,
                (0x5, 0x00) => AluOp::Srl,
                (0x5, 0x20) => AluOp::Sra,
                (0x6, 0x00) => AluOp::Or,
                (0x7, 0x00) => AluOp::And,
                (0x0, 0x01) => AluOp::Mul,
                (0x1, 0x01) => AluOp::Mulh,
                (0x2, 0x01) => AluOp::Mulhsu,
                (0x3, 0x01) => AluOp::Mulhu,
                (0x4, 0x01) => AluOp::Div,
                (0x5, 0x01) => AluOp::Divu,
                (0x6, 0x01) => AluOp::Rem,
                (0x7, 0x01) => AluOp::Remu,
                _ => return None,
            };
            Some(Instruction::Op { op, rd, rs1, rs2 })
        }

        Opcode::OpImm => {
            let (op, imm) = match funct3 {
                0x0 => (AluOp::Add, imm_i),
                0x2 => (AluOp::Slt, imm_i),
                0x3 => (AluOp::Sltu, imm_i),
                0x4 => (AluOp::Xor, imm_i),
                0x6 => (AluOp::Or, imm_i),
                0x7 => (AluOp::And, imm_i),
                // Shifts only use the bottom 5 bits; funct7 picks logical
                // vs arithmetic for right shifts.
                0x1 if funct7 == 0x00 => (AluOp::Sll, imm_i & 0x1f),
                0x5 if funct7 == 0x00 => (AluOp::Srl, imm_i & 0x1f),
                0x5 if funct7 == 0x20 => (AluOp::Sra, imm_i & 0x1f),
                _ => return None,
            };
            Some(Instruction::OpImm { op, rd, rs1, imm })
        }

        Opcode::Load => {
            let width = match funct3 {
                0x0 => LoadWidth::Byte,
                0x1 => LoadWidth::Half,
                0x2 => LoadWidth::Word,
                0x4 => LoadWidth::ByteUnsigned,
                0x5 => LoadWidth::HalfUnsigned,
                _ => return None,
            };
            Some(Instruction::Load { width, rd, rs1, offset: imm_i })
        }

        Opcode::Store => {
            let imm11_5 = ((word >> 25) & 0x7f) << 5;
            let imm4_0 = (word >> 7) & 0x1f;
            let offset = ((imm11_5 | imm4_0) as i32) << 20 >> 20;
            let width = match funct3 {
                0x0 => StoreWidth::Byte,
                0x1 => StoreWidth::Half,
                0x2 => StoreWidth::Word,
                _ => return None,
            };
            Some(Instruction::Store { width, rs1, rs2, offset })
        }

        Opcode::Branch => {
            let cond = match funct3 {
                0x0 => BranchCond::Eq,
                0x1 => BranchCond::Ne,
                0x4 => BranchCond::Lt,
                0x5 => BranchCond::Ge,
                0x6 => BranchCond::Ltu,
                0x7 => BranchCond::Geu,
                _ => return None,
            };
            Some(Instruction::Branch { cond, rs1, rs2, offset: extract_branch_offset(word) })
        }

        Opcode::Jal => Some(Instruction::Jal { rd, offset: extract_jal_offset(word) }),

        Opcode::Jalr if funct3 == 0 => Some(Instruction::Jalr { rd, rs1, offset: imm_i }),
        Opcode::Jalr => None,

        Opcode::Lui => Some(Instruction::Lui { rd, imm: (word & 0xffff_f000) as i32 }),
        Opcode::Auipc => Some(Instruction::Auipc { rd, imm: (word & 0xffff_f000) as i32 }),

        Opcode::MiscMem => Some(Instruction::Fence),

        Opcode::System => {
            if funct3 != 0 || rd != 0 || rs1 != 0 {
                return None;
            }
            match word >> 20 {
                0 => Some(Instruction::Ecall),
                1 => Some(Instruction::Ebreak),
                STOP_IMMEDIATE => Some(Instruction::Stop),
                _ => None,
            }
        }
    }
}

fn extract_branch_offset(word: u32) -> i32 {
    let imm12 = ((word >> 31) & 0x1) << 12;
    let imm10_5 = ((word >> 25) & 0x3f) << 5;
    let imm4_1 = ((word >> 8) & 0xf) << 1;
    let imm11 = ((word >> 7) & 0x1) << 11;
    let imm = (imm12 | imm11 | imm10_5 | imm4_1) as i32;
    (imm << 19) >> 19
}

fn extract_jal_offset(word: u32) -> i32 {
    let imm20 = ((word >> 31) & 0x1) << 20;
    let imm10_1 = ((word >> 21) & 0x3ff) << 1;
    let imm11 = ((word >> 20) & 0x1) << 11;
    let imm19_12 = ((word >> 12) & 0xff) << 12;
    let imm = (imm20 | imm19_12 | imm11 | imm10_1) as i32;
    (imm << 11) >> 11
}
