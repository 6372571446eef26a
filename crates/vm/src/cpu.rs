use crate::error::MachineError;
use crate::instruction::{AluOp, BranchCond, Instruction, LoadWidth, StoreWidth};
use crate::memory::Memory;
use crate::registers::{Register, ABI_NAMES};

/// Architectural state of the single RV32 hart: program counter and the 32
/// integer registers.
///
/// EDUCATIONAL PURPOSE: the CPU here is pure state plus an `execute`
/// function. It does not fetch on its own and knows nothing about syscalls:
/// `execute` reports control-flow effects (`Flow`) back to the machine
/// driver, which decides what happens next. This keeps the instruction
/// semantics testable in isolation and lets the driver save and restore the
/// whole register file with a plain copy when a host call re-enters the
/// guest.
///
/// Register x0 is hardwired to zero: writes to it are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cpu {
    pub pc: u32,
    pub regs: [u32; 32],
}

/// What the machine should do after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Continue at the given address.
    Continue(u32),
    Ecall,
    Ebreak,
    Stop,
}

impl Cpu {
    #[inline]
    pub fn reg(&self, index: usize) -> u32 {
        self.regs[index & 31]
    }

    #[inline]
    pub fn set_reg(&mut self, index: usize, value: u32) {
        if index != 0 {
            self.regs[index & 31] = value;
        }
    }

    pub fn get(&self, reg: Register) -> u32 {
        self.reg(reg.index())
    }

    pub fn set(&mut self, reg: Register, value: u32) {
        self.set_reg(reg.index(), value);
    }

    /// Executes `instr` located at `self.pc`. The program counter itself is
    /// left untouched; the returned `Flow` says where to go next.
    pub fn execute(&mut self, instr: Instruction, memory: &mut Memory) -> Result<Flow, MachineError> {
        let pc = self.pc;
        let next = pc.wrapping_add(4);
        match instr {
            Instruction::Op { op, rd, rs1, rs2 } => {
                let value = alu(op, self.reg(rs1), self.reg(rs2));
                self.set_reg(rd, value);
            }
            Instruction::OpImm { op, rd, rs1, imm } => {
                let value = alu(op, self.reg(rs1), imm as u32);
                self.set_reg(rd, value);
            }
            Instruction::Load { width, rd, rs1, offset } => {
                let addr = self.reg(rs1).wrapping_add(offset as u32);
                let value = match width {
                    LoadWidth::Byte => memory.read_u8(addr)? as i8 as i32 as u32,
                    LoadWidth::ByteUnsigned => memory.read_u8(addr)? as u32,
                    LoadWidth::Half => memory.read_u16(addr)? as i16 as i32 as u32,
                    LoadWidth::HalfUnsigned => memory.read_u16(addr)? as u32,
                    LoadWidth::Word => memory.read_u32(addr)?,
                };
                self.set_reg(rd, value);
            }
            Instruction::Store { width, rs1, rs2, offset } => {
                let addr = self.reg(rs1).wrapping_add(offset as u32);
                let value = self.reg(rs2);
                match width {
                    StoreWidth::Byte => memory.write_u8(addr, value as u8)?,
                    StoreWidth::Half => memory.write_u16(addr, value as u16)?,
                    StoreWidth::Word => memory.write_u32(addr, value)?,
                }
            }
            Instruction::Branch { cond, rs1, rs2, offset } => {
                let (a, b) = (self.reg(rs1), self.reg(rs2));
                let taken = match cond {
                    BranchCond::Eq => a == b,
                    BranchCond::Ne => a != b,
                    BranchCond::Lt => (a as i32) < (b as i32),
                    BranchCond::Ge => (a as i32) >= (b as i32),
                    BranchCond::Ltu => a < b,
                    BranchCond::Geu => a >= b,
                };
                if taken {
                    return Ok(Flow::Continue(pc.wrapping_add(offset as u32)));
                }
            }
            Instruction::Jal { rd, offset } => {
                self.set_reg(rd, next);
                return Ok(Flow::Continue(pc.wrapping_add(offset as u32)));
            }
            Instruction::Jalr { rd, rs1, offset } => {
                // Read rs1 before writing rd: they may be the same register.
                let target = self.reg(rs1).wrapping_add(offset as u32) & !1;
                self.set_reg(rd, next);
                return Ok(Flow::Continue(target));
            }
            Instruction::Lui { rd, imm } => self.set_reg(rd, imm as u32),
            Instruction::Auipc { rd, imm } => self.set_reg(rd, pc.wrapping_add(imm as u32)),
            Instruction::Fence => {}
            Instruction::Ecall => return Ok(Flow::Ecall),
            Instruction::Ebreak => return Ok(Flow::Ebreak),
            Instruction::Stop => return Ok(Flow::Stop),
        }
        Ok(Flow::Continue(next))
    }

    /// Multi-line register dump for exception reports.
    pub fn dump(&self) -> String {
        let mut out = format!("pc   = 0x{:08x}\n", self.pc);
        for (i, name) in ABI_NAMES.iter().enumerate().skip(1) {
            out.push_str(&format!("{:<4} = 0x{:08x}", name, self.regs[i]));
            out.push(if i % 4 == 0 { '\n' } else { ' ' });
        }
        out
    }
}

fn alu(op: AluOp, a: u32, b: u32) -> u32 {
    let (sa, sb) = (a as i32, b as i32);
    match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Sll => a << (b & 0x1f),
        AluOp::Slt => (sa < sb) as u32,
        AluOp::Sltu => (a < b) as u32,
        AluOp::Xor => a ^ b,
        AluOp::Srl => a >> (b & 0x1f),
        AluOp::Sra => (sa >> (b & 0x1f)) as u32,
        AluOp::Or => a | b,
        AluOp::And => a & b,
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Mulh => ((sa as i64 * sb as i64) >> 32) as u32,
        AluOp::Mulhsu => ((sa as i64 * b as u64 as i64) >> 32) as u32,
        AluOp::Mulhu => ((a as u64 * b as u64) >> 32) as u32,
        // Division never traps on RISC-V: divide by zero yields all ones,
        // and the one overflowing case yields the dividend.
        AluOp::Div => match sb {
            0 => u32::MAX,
            -1 if sa == i32::MIN => sa as u32,
            _ => (sa / sb) as u32,
        },
        AluOp::Divu => a.checked_div(b).unwrap_or(u32::MAX),
        AluOp::Rem => match sb {
            0 => a,
            -1 => 0,
            _ => (sa % sb) as u32,
        },
        AluOp::Remu => a.checked_rem(b).unwrap_or(a),
    }
}
