//! Function symbols of a guest program.

use std::collections::HashMap;

use goblin::elf::sym::{STT_FUNC, STT_NOTYPE};
use goblin::elf::Elf;

use crate::elf::{LoadError, ProgramImage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
    pub size: u32,
}

impl Symbol {
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.address && addr - self.address < self.size.max(1)
    }
}

/// Function symbols sorted by address, with a name index.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn from_elf(elf: &Elf) -> Self {
        let mut symbols: Vec<Symbol> = elf
            .syms
            .iter()
            .filter(|sym| sym.st_type() == STT_FUNC || (sym.st_type() == STT_NOTYPE && sym.st_value != 0))
            .filter_map(|sym| {
                let name = elf.strtab.get_at(sym.st_name)?;
                if name.is_empty() || name.starts_with('$') {
                    return None;
                }
                Some(Symbol { name: name.to_string(), address: sym.st_value as u32, size: sym.st_size as u32 })
            })
            .collect();
        symbols.sort_by_key(|s| s.address);
        Self::from_symbols(symbols)
    }

    pub fn from_symbols(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.address);
        let mut by_name = HashMap::with_capacity(symbols.len());
        for (i, sym) in symbols.iter().enumerate() {
            // First definition wins, matching a linker's view of duplicates.
            by_name.entry(sym.name.clone()).or_insert(i);
        }
        Self { symbols, by_name }
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).map(|&i| self.symbols[i].address)
    }

    /// The function containing `addr`, for fault reports. Falls back to the
    /// closest preceding symbol when sizes are missing.
    pub fn lookup(&self, addr: u32) -> Option<&Symbol> {
        let idx = self.symbols.partition_point(|s| s.address <= addr);
        let candidate = self.symbols[..idx].last()?;
        if candidate.contains(addr) || candidate.size == 0 {
            Some(candidate)
        } else {
            None
        }
    }
}

/// Runtime, libc and compiler-support symbols that are never part of a
/// program's callable surface.
const RUNTIME_SYMBOLS: &[&str] = &[
    "main", "_start", "fast_exit", "exit", "abort", "malloc", "calloc", "realloc", "free",
    "memcpy", "memmove", "memset", "memcmp", "bcmp", "strlen", "strnlen", "strcmp", "strncmp",
    "strcpy", "strchr", "strrchr", "strstr", "strdup", "strndup", "memchr", "memrchr", "qsort",
    "qsort_r", "write", "read", "open", "close", "lseek", "fstat", "stat", "mmap", "munmap",
    "mprotect", "brk", "sbrk", "getenv", "setenv", "unsetenv", "snprintf", "vsnprintf",
    "vsprintf", "asprintf", "vasprintf", "fputs", "fputc", "fwrite", "fopen", "fclose",
    "setjmp", "raise", "gsignal", "sigaction", "sigprocmask", "getpid", "sysconf",
    "clock_gettime", "posix_memalign", "aligned_alloc", "memalign", "valloc", "pvalloc",
    "malloc_usable_size", "frame_dummy", "register_tm_clones", "deregister_tm_clones",
    "call_fini", "dlopen", "dlsym", "dlclose", "dlerror", "sys_print", "sys_vcall", "sys_veval",
];

/// Prefixes of toolchain-internal symbol families.
const RUNTIME_PREFIXES: &[&str] = &["_", ".", "d_", "btree_", "fde_", "uw_", "malloc_", "dl_", "pthread_"];

pub fn is_runtime_symbol(name: &str) -> bool {
    RUNTIME_SYMBOLS.contains(&name)
        || RUNTIME_PREFIXES.iter().any(|p| name.starts_with(p))
        || name.contains(".part.")
        || name.contains(".isra.")
        || name.contains(".constprop.")
}

/// Names of the functions a host may call in `binary`, sorted and
/// deduplicated.
pub fn exported_functions(binary: &[u8]) -> Result<Vec<String>, LoadError> {
    let image = ProgramImage::parse(binary)?;
    let mut names: Vec<String> = image
        .symbols
        .iter()
        .filter(|s| !is_runtime_symbol(&s.name))
        .map(|s| s.name.clone())
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SymbolTable {
        SymbolTable::from_symbols(vec![
            Symbol { name: "b".into(), address: 0x200, size: 0x10 },
            Symbol { name: "a".into(), address: 0x100, size: 0x20 },
            Symbol { name: "label".into(), address: 0x300, size: 0 },
        ])
    }

    #[test]
    fn lookup_by_address() {
        let t = table();
        assert_eq!(t.lookup(0x104).map(|s| s.name.as_str()), Some("a"));
        assert_eq!(t.lookup(0x120), None);
        assert_eq!(t.lookup(0x20f).map(|s| s.name.as_str()), Some("b"));
        assert_eq!(t.lookup(0x400).map(|s| s.name.as_str()), Some("label"));
        assert_eq!(t.lookup(0x50), None);
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(table().address_of("b"), Some(0x200));
        assert_eq!(table().address_of("missing"), None);
    }

    #[test]
    fn runtime_symbols_are_filtered() {
        for name in ["main", "_start", "__libc_start_main", "memcpy", "d_print_comp", "btree_insert.isra.0", "fast_exit"] {
            assert!(is_runtime_symbol(name), "{name}");
        }
        for name in ["hello", "update_player", "on_timer", "test_ping"] {
            assert!(!is_runtime_symbol(name), "{name}");
        }
    }
}
