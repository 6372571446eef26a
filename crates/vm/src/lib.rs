//! A compact RV32IM interpreter for running sandboxed guest programs.
//!
//! The crate provides exactly what a host needs to drive a guest: decoding
//! and execution, paged memory with per-page attributes (including pages
//! backed by host buffers), a guest heap arena, an instruction budget, a
//! syscall trap interface and optional predecoded execution segments.

pub mod cpu;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod instruction;
pub mod isa;
pub mod machine;
pub mod memory;
pub mod metering;
pub mod registers;
pub mod sys_call;
pub mod translate;

pub use cpu::Cpu;
pub use error::{Access, MachineError};
pub use instruction::Instruction;
pub use machine::{Machine, MachineOptions};
pub use metering::PcSampler;
pub use memory::{Arena, Memory, PageAttributes, SharedBuffer, PAGE_SIZE};
pub use registers::Register;
pub use sys_call::SyscallHandler;
pub use translate::{BackgroundTranslation, DecodedSegment};
