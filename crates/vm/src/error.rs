use core::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Execute => "execute",
        })
    }
}

/// Machine-level exceptions. Any of these aborts the current simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MachineError {
    #[error("protection fault: {access} of 0x{addr:08x}")]
    ProtectionFault { addr: u32, access: Access },
    #[error("page fault: 0x{addr:08x} is not mapped")]
    PageFault { addr: u32 },
    #[error("illegal instruction 0x{word:08x} at 0x{pc:08x}")]
    IllegalInstruction { pc: u32, word: u32 },
    #[error("misaligned instruction fetch at 0x{0:08x}")]
    MisalignedFetch(u32),
    #[error("instruction limit reached ({0} instructions)")]
    Timeout(u64),
    #[error("out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },
    #[error("ebreak at 0x{0:08x}")]
    Breakpoint(u32),
    #[error("invalid memory operation: {0}")]
    InvalidOperation(&'static str),
}

impl MachineError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, MachineError::Timeout(_))
    }

    /// Guest address the exception refers to, if any.
    pub fn address(&self) -> Option<u32> {
        match *self {
            MachineError::ProtectionFault { addr, .. } | MachineError::PageFault { addr } => Some(addr),
            MachineError::IllegalInstruction { pc, .. } => Some(pc),
            MachineError::MisalignedFetch(a) | MachineError::Breakpoint(a) => Some(a),
            _ => None,
        }
    }
}
