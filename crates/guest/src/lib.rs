//! Toolkit for building guest programs without a cross compiler.
//!
//! `ProgramBuilder` is a small RV32IM assembler with labels, a data section
//! and function symbols. `build_elf` lays the program out and writes a
//! statically linked ELF executable, so tests exercise the same loading
//! path as real guest binaries. The `abi` module emits the guest side of the
//! sandbox syscall conventions.

pub mod abi;
pub mod asm;
pub mod elf;

pub use asm::{AsmError, ProgramBuilder, TEXT_BASE};
pub use elf::{ElfImage, ElfSymbol, SymbolKind};
pub use vm::Register;
