//! Name tables: the variable slot allocator and the function table.

use std::collections::HashMap;

use tracing::trace;

use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};

// ─────────────────────────────────────────────────────────────────────────────
// Variable slots
// ─────────────────────────────────────────────────────────────────────────────

/// Maps variable names to stable slot indices.
///
/// Slots are assigned on first reference (read or write) in encounter order
/// and are never freed or reused. The table is flat for the whole compilation
/// unit: a parameter `$x` and a global `$x` share one slot.
#[derive(Debug, Clone)]
pub struct VariableSlots {
    slots: HashMap<String, u8>,
    names: Vec<String>,
    limit: usize,
}

impl Default for VariableSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableSlots {
    pub fn new() -> Self {
        Self::with_config(&CompilerConfig::default())
    }

    pub fn with_config(config: &CompilerConfig) -> Self {
        VariableSlots {
            slots: HashMap::new(),
            names: Vec::new(),
            limit: config.max_slots,
        }
    }

    /// Return the slot for `name`, assigning the next free one on first use.
    pub fn get_index(&mut self, name: &str) -> CompileResult<u8> {
        if let Some(&slot) = self.slots.get(name) {
            return Ok(slot);
        }
        let next = self.names.len();
        if next >= self.limit || next > u8::MAX as usize {
            return Err(CompileError::TooManyVariables {
                name: name.to_string(),
                limit: self.limit,
            });
        }
        trace!(slot = next, name, "new variable slot");
        let slot = next as u8;
        self.slots.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        Ok(slot)
    }

    /// Slot of an already-seen name, without allocating.
    pub fn lookup(&self, name: &str) -> Option<u8> {
        self.slots.get(name).copied()
    }

    /// Variable names ordered by slot.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Functions
// ─────────────────────────────────────────────────────────────────────────────

/// A declared user function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub param_count: usize,
    /// Bytecode offset of the function's `FUNC_DECL` prologue. The VM binds
    /// the arguments by executing that prologue after the call.
    pub entry_address: u16,
}

/// Declared functions by name.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, Function>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Declaring the same name twice is an error.
    pub fn add_function(
        &mut self,
        name: &str,
        param_count: usize,
        entry_address: u16,
    ) -> CompileResult<()> {
        if self.functions.contains_key(name) {
            return Err(CompileError::DuplicateFunction {
                name: name.to_string(),
            });
        }
        self.functions.insert(
            name.to_string(),
            Function {
                name: name.to_string(),
                param_count,
                entry_address,
            },
        );
        Ok(())
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_use_wins() {
        let mut vars = VariableSlots::new();
        assert_eq!(vars.get_index("a").unwrap(), 0);
        assert_eq!(vars.get_index("b").unwrap(), 1);
        assert_eq!(vars.get_index("a").unwrap(), 0);
        assert_eq!(vars.names(), ["a", "b"]);
        assert_eq!(vars.lookup("c"), None);
    }

    #[test]
    fn test_slot_limit() {
        let mut vars = VariableSlots::with_config(&CompilerConfig::default().max_slots(1));
        vars.get_index("a").unwrap();
        assert!(matches!(
            vars.get_index("b"),
            Err(CompileError::TooManyVariables { limit: 1, .. })
        ));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let mut table = FunctionTable::new();
        table.add_function("f", 1, 3).unwrap();
        assert_eq!(
            table.add_function("f", 2, 10),
            Err(CompileError::DuplicateFunction { name: "f".into() })
        );
        let f = table.get_function("f").unwrap();
        assert_eq!((f.param_count, f.entry_address), (1, 3));
        assert!(table.get_function("g").is_none());
    }
}
