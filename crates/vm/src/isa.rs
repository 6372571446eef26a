/// RISC-V major opcodes understood by the interpreter.
///
/// The bottom 7 bits of every 32-bit instruction select one of these, and
/// the opcode in turn fixes the instruction format (R, I, S, B, U, J) used to
/// pull the remaining fields out of the word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// LB, LH, LW, LBU, LHU (I-type)
    Load = 0x03,
    /// FENCE, FENCE.I. Executed as no-ops: there is a single hart and no
    /// instruction cache.
    MiscMem = 0x0f,
    /// ADDI, SLTI, ANDI, shifts by immediate (I-type)
    OpImm = 0x13,
    /// AUIPC (U-type)
    Auipc = 0x17,
    /// SB, SH, SW (S-type)
    Store = 0x23,
    /// Register-register ALU operations including the M extension (R-type)
    Op = 0x33,
    /// LUI (U-type)
    Lui = 0x37,
    /// Conditional branches (B-type)
    Branch = 0x63,
    /// JALR (I-type)
    Jalr = 0x67,
    /// JAL (J-type)
    Jal = 0x6f,
    /// ECALL, EBREAK and the sandbox STOP instruction
    System = 0x73,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            0x03 => Load,
            0x0f => MiscMem,
            0x13 => OpImm,
            0x17 => Auipc,
            0x23 => Store,
            0x33 => Op,
            0x37 => Lui,
            0x63 => Branch,
            0x67 => Jalr,
            0x6f => Jal,
            0x73 => System,
            _ => return None,
        })
    }
}

/// Immediate of the SYSTEM instruction that stops the machine outright.
/// Encoded by guests as `.insn i SYSTEM, 0, x0, x0, 0x7ff`.
pub const STOP_IMMEDIATE: u32 = 0x7ff;
