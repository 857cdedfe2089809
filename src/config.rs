//! Compiler and VM limits.
//!
//! The defaults mirror the encoding: constant and slot operands are a single
//! byte, so both tables hold at most 256 entries.

/// Limits applied while compiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Maximum number of distinct constants (at most 256).
    pub max_constants: usize,
    /// Maximum number of distinct variable slots (at most 256).
    pub max_slots: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_constants: 256,
            max_slots: 256,
        }
    }
}

impl CompilerConfig {
    pub fn max_constants(mut self, n: usize) -> Self {
        self.max_constants = n.min(256);
        self
    }

    pub fn max_slots(mut self, n: usize) -> Self {
        self.max_slots = n.min(256);
        self
    }
}

/// Limits applied by the reference VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum value-stack depth.
    pub stack_size: usize,
    /// Maximum number of nested calls.
    pub max_call_depth: usize,
    /// Abort after this many dispatched instructions (`None` = unbounded).
    pub max_steps: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_size: 256,
            max_call_depth: 256,
            max_steps: None,
        }
    }
}

impl VmConfig {
    pub fn stack_size(mut self, n: usize) -> Self {
        self.stack_size = n;
        self
    }

    pub fn max_call_depth(mut self, n: usize) -> Self {
        self.max_call_depth = n;
        self
    }

    pub fn max_steps(mut self, n: u64) -> Self {
        self.max_steps = Some(n);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_are_clamped_to_operand_width() {
        let config = CompilerConfig::default().max_constants(1000).max_slots(4);
        assert_eq!(config.max_constants, 256);
        assert_eq!(config.max_slots, 4);
    }
}
