use serde::{Deserialize, Serialize};
use vm::{MachineOptions, PAGE_SIZE};

use crate::error::SandboxError;
use crate::global::Config;

/// Per-instance settings. Every field has a default, so a JSON file only
/// needs to mention what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Upper bound on machine-owned guest memory, in bytes.
    pub memory_max: usize,
    pub stack_size: u32,
    pub heap_size: u32,
    /// Instruction budget of one top-level call, shared by nested calls.
    pub max_instructions: u64,
    pub max_call_depth: usize,
    /// Per call level, for both scoped objects and scoped variants.
    pub max_refs: usize,
    pub shared_memory_base: u32,
    /// A flat address space maps all guest memory linearly and cannot host
    /// non-owned pages, so sharing host buffers is refused.
    pub flat_address_space: bool,
    /// Run the program's entry point once after loading.
    pub run_main: bool,
    pub exit_symbol: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_max: 64 << 20,
            stack_size: 1 << 20,
            heap_size: 16 << 20,
            max_instructions: Config::DEFAULT_MAX_INSTRUCTIONS,
            max_call_depth: Config::DEFAULT_MAX_CALL_DEPTH,
            max_refs: Config::DEFAULT_MAX_REFS,
            shared_memory_base: 0x6000_0000,
            flat_address_space: false,
            run_main: true,
            exit_symbol: Config::EXIT_SYMBOL.to_string(),
        }
    }
}

const STACK_TOP: u32 = 0x4000_0000;
const HEAP_BASE: u32 = 0x2000_0000;
const EXIT_STUB: u32 = 0x0000_1000;

impl SandboxConfig {
    pub fn from_json(text: &str) -> Result<Self, SandboxError> {
        let config: SandboxConfig =
            serde_json::from_str(text).map_err(|e| SandboxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, SandboxError> {
        serde_json::to_string_pretty(self).map_err(|e| SandboxError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        let fail = |msg: &str| Err(SandboxError::Config(msg.to_string()));
        if self.max_call_depth == 0 {
            return fail("max_call_depth must be at least 1");
        }
        if self.max_refs == 0 {
            return fail("max_refs must be at least 1");
        }
        if self.max_instructions == 0 {
            return fail("max_instructions must be at least 1");
        }
        if self.stack_size < PAGE_SIZE as u32 || self.stack_size > STACK_TOP - HEAP_BASE {
            return fail("stack_size out of range");
        }
        let heap_end = HEAP_BASE as u64 + self.heap_size as u64;
        if heap_end > (STACK_TOP - self.stack_size) as u64 {
            return fail("heap overlaps the stack");
        }
        if (self.shared_memory_base as usize) % PAGE_SIZE != 0 || self.shared_memory_base < STACK_TOP {
            return fail("shared_memory_base must be page aligned and above the stack");
        }
        if self.exit_symbol.is_empty() {
            return fail("exit_symbol must not be empty");
        }
        Ok(())
    }

    pub(crate) fn machine_options(&self) -> MachineOptions {
        MachineOptions {
            memory_max: self.memory_max,
            stack_top: STACK_TOP,
            stack_size: self.stack_size,
            heap_base: HEAP_BASE,
            heap_size: self.heap_size,
            exit_stub: EXIT_STUB,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SandboxConfig::default().validate().unwrap();
    }

    #[test]
    fn json_overrides_single_fields() {
        let config = SandboxConfig::from_json(r#"{ "max_refs": 5, "run_main": false }"#).unwrap();
        assert_eq!(config.max_refs, 5);
        assert!(!config.run_main);
        assert_eq!(config.max_call_depth, Config::DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn rejects_inconsistent_layouts() {
        let config = SandboxConfig { heap_size: 0x3000_0000, ..Default::default() };
        assert!(config.validate().is_err());
        let config = SandboxConfig { shared_memory_base: 0x6000_0010, ..Default::default() };
        assert!(config.validate().is_err());
        assert!(SandboxConfig::from_json(r#"{ "max_call_depth": 0 }"#).is_err());
        assert!(SandboxConfig::from_json("not json").is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = SandboxConfig { max_instructions: 1234, ..Default::default() };
        let text = config.to_json().unwrap();
        assert_eq!(SandboxConfig::from_json(&text).unwrap(), config);
    }
}
