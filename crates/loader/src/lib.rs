//! Guest program images.
//!
//! Parses statically linked RV32 ELF executables into what the sandbox needs
//! to run them: the loadable segments, the entry point and a function symbol
//! table.

pub mod elf;
pub mod symbols;

pub use elf::{parse_elf_from_bytes, ElfInfo, ElfSection, LoadError, ProgramImage, Segment, SegmentFlags};
pub use symbols::{exported_functions, is_runtime_symbol, Symbol, SymbolTable};
