//! Inverse of the decoder. Used by the guest toolkit to assemble programs
//! and by tests that need raw instruction words.

use crate::instruction::{AluOp, BranchCond, Instruction, LoadWidth, StoreWidth};
use crate::isa::{Opcode, STOP_IMMEDIATE};

fn r_type(opcode: Opcode, rd: usize, funct3: u32, rs1: usize, rs2: usize, funct7: u32) -> u32 {
    (funct7 << 25) | ((rs2 as u32 & 0x1f) << 20) | ((rs1 as u32 & 0x1f) << 15) | (funct3 << 12)
        | ((rd as u32 & 0x1f) << 7)
        | opcode as u32
}

fn i_type(opcode: Opcode, rd: usize, funct3: u32, rs1: usize, imm: i32) -> u32 {
    ((imm as u32 & 0xfff) << 20) | ((rs1 as u32 & 0x1f) << 15) | (funct3 << 12) | ((rd as u32 & 0x1f) << 7) | opcode as u32
}

fn s_type(funct3: u32, rs1: usize, rs2: usize, imm: i32) -> u32 {
    let imm = imm as u32;
    (((imm >> 5) & 0x7f) << 25)
        | ((rs2 as u32 & 0x1f) << 20)
        | ((rs1 as u32 & 0x1f) << 15)
        | (funct3 << 12)
        | ((imm & 0x1f) << 7)
        | Opcode::Store as u32
}

fn b_type(funct3: u32, rs1: usize, rs2: usize, offset: i32) -> u32 {
    let imm = offset as u32;
    (((imm >> 12) & 0x1) << 31)
        | (((imm >> 5) & 0x3f) << 25)
        | ((rs2 as u32 & 0x1f) << 20)
        | ((rs1 as u32 & 0x1f) << 15)
        | (funct3 << 12)
        | (((imm >> 1) & 0xf) << 8)
        | (((imm >> 11) & 0x1) << 7)
        | Opcode::Branch as u32
}

fn j_type(rd: usize, offset: i32) -> u32 {
    let imm = offset as u32;
    (((imm >> 20) & 0x1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 0x1) << 20)
        | (((imm >> 12) & 0xff) << 12)
        | ((rd as u32 & 0x1f) << 7)
        | Opcode::Jal as u32
}

fn alu_fields(op: AluOp) -> (u32, u32) {
    match op {
        AluOp::Add => (0x0, 0x00),
        AluOp::Sub => (0x0, 0x20),
        AluOp::Sll => (0x1, 0x00),
        AluOp::Slt => (0x2, 0x00),
        AluOp::Sltu => (0x3, 0x00),
        AluOp::Xor => (0x4, 0x00),
        AluOp::Srl => (0x5, 0x00),
        AluOp::Sra => (0x5, 0x20),
        AluOp::Or => (0x6, 0x00),
        AluOp::And => (0x7, 0x00),
        AluOp::Mul => (0x0, 0x01),
        AluOp::Mulh => (0x1, 0x01),
        AluOp::Mulhsu => (0x2, 0x01),
        AluOp::Mulhu => (0x3, 0x01),
        AluOp::Div => (0x4, 0x01),
        AluOp::Divu => (0x5, 0x01),
        AluOp::Rem => (0x6, 0x01),
        AluOp::Remu => (0x7, 0x01),
    }
}

/// Encodes `instr`. Returns `None` for combinations with no encoding
/// (an immediate form of an M-extension op, out-of-range immediates, odd
/// branch offsets).
pub fn encode(instr: &Instruction) -> Option<u32> {
    Some(match *instr {
        Instruction::Op { op, rd, rs1, rs2 } => {
            let (funct3, funct7) = alu_fields(op);
            r_type(Opcode::Op, rd, funct3, rs1, rs2, funct7)
        }
        Instruction::OpImm { op, rd, rs1, imm } => {
            if !op.has_immediate_form() {
                return None;
            }
            let (funct3, funct7) = alu_fields(op);
            match op {
                AluOp::Sll | AluOp::Srl | AluOp::Sra => {
                    if !(0..32).contains(&imm) {
                        return None;
                    }
                    i_type(Opcode::OpImm, rd, funct3, rs1, imm | ((funct7 as i32) << 5))
                }
                _ => {
                    if !(-2048..2048).contains(&imm) {
                        return None;
                    }
                    i_type(Opcode::OpImm, rd, funct3, rs1, imm)
                }
            }
        }
        Instruction::Load { width, rd, rs1, offset } => {
            if !(-2048..2048).contains(&offset) {
                return None;
            }
            let funct3 = match width {
                LoadWidth::Byte => 0x0,
                LoadWidth::Half => 0x1,
                LoadWidth::Word => 0x2,
                LoadWidth::ByteUnsigned => 0x4,
                LoadWidth::HalfUnsigned => 0x5,
            };
            i_type(Opcode::Load, rd, funct3, rs1, offset)
        }
        Instruction::Store { width, rs1, rs2, offset } => {
            if !(-2048..2048).contains(&offset) {
                return None;
            }
            let funct3 = match width {
                StoreWidth::Byte => 0x0,
                StoreWidth::Half => 0x1,
                StoreWidth::Word => 0x2,
            };
            s_type(funct3, rs1, rs2, offset)
        }
        Instruction::Branch { cond, rs1, rs2, offset } => {
            if offset & 1 != 0 || !(-4096..4096).contains(&offset) {
                return None;
            }
            let funct3 = match cond {
                BranchCond::Eq => 0x0,
                BranchCond::Ne => 0x1,
                BranchCond::Lt => 0x4,
                BranchCond::Ge => 0x5,
                BranchCond::Ltu => 0x6,
                BranchCond::Geu => 0x7,
            };
            b_type(funct3, rs1, rs2, offset)
        }
        Instruction::Jal { rd, offset } => {
            if offset & 1 != 0 || !(-(1 << 20)..(1 << 20)).contains(&offset) {
                return None;
            }
            j_type(rd, offset)
        }
        Instruction::Jalr { rd, rs1, offset } => {
            if !(-2048..2048).contains(&offset) {
                return None;
            }
            i_type(Opcode::Jalr, rd, 0, rs1, offset)
        }
        Instruction::Lui { rd, imm } => (imm as u32 & 0xffff_f000) | ((rd as u32 & 0x1f) << 7) | Opcode::Lui as u32,
        Instruction::Auipc { rd, imm } => {
            (imm as u32 & 0xffff_f000) | ((rd as u32 & 0x1f) << 7) | Opcode::Auipc as u32
        }
        Instruction::Fence => 0x0ff0_000f,
        Instruction::Ecall => Opcode::System as u32,
        Instruction::Ebreak => (1 << 20) | Opcode::System as u32,
        Instruction::Stop => (STOP_IMMEDIATE << 20) | Opcode::System as u32,
    })
}
