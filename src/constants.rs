//! The constant pool.
//!
//! Literal values are deduplicated into an indexed table that bytecode refers
//! to by a single-byte index. Insertion order is preserved so that compiling
//! the same program twice yields byte-identical output.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileResult};

// ─────────────────────────────────────────────────────────────────────────────
// Constant
// ─────────────────────────────────────────────────────────────────────────────

/// A compile-time constant that lives in the pool.
///
/// Booleans and `null` have no kind of their own: they lower to `Int(0)` and
/// `Int(1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// An integer literal.
    Int(i64),
    /// A string literal, escapes already resolved.
    Str(String),
}

impl Constant {
    /// The kind tag used when serializing the pool (`"int"` / `"string"`).
    pub fn kind(&self) -> &'static str {
        match self {
            Constant::Int(_) => "int",
            Constant::Str(_) => "string",
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(n) => write!(f, "{n}"),
            // Escaped so the text can be pasted into a host-language literal.
            Constant::Str(s) => write!(f, "\"{}\"", s.escape_default()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool
// ─────────────────────────────────────────────────────────────────────────────

/// Deduplicating, insertion-ordered constant table.
pub struct ConstantPool {
    constants: Vec<Constant>,
    index: HashMap<Constant, u8>,
    limit: usize,
    on_update: Option<Box<dyn FnMut(&[Constant])>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConstantPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstantPool")
            .field("constants", &self.constants)
            .field("limit", &self.limit)
            .finish()
    }
}

impl ConstantPool {
    /// Create an empty pool with the default one-byte index limit.
    pub fn new() -> Self {
        Self::with_config(&CompilerConfig::default())
    }

    pub fn with_config(config: &CompilerConfig) -> Self {
        ConstantPool {
            constants: Vec::with_capacity(32),
            index: HashMap::new(),
            limit: config.max_constants,
            on_update: None,
        }
    }

    /// Add a constant and return its index.
    ///
    /// An equal constant already in the pool keeps its original index.
    pub fn add(&mut self, constant: Constant) -> CompileResult<u8> {
        if let Some(&idx) = self.index.get(&constant) {
            return Ok(idx);
        }
        let idx = self.constants.len();
        if idx >= self.limit || idx > u8::MAX as usize {
            return Err(CompileError::ConstantPoolOverflow { limit: self.limit });
        }
        trace!(index = idx, constant = %constant, "new constant");
        let idx = idx as u8;
        self.index.insert(constant.clone(), idx);
        self.constants.push(constant);
        self.notify_update();
        Ok(idx)
    }

    /// Look up the constant at `idx`.
    pub fn get(&self, idx: u8) -> Option<&Constant> {
        self.constants.get(idx as usize)
    }

    /// All constants, ordered by index.
    pub fn as_slice(&self) -> &[Constant] {
        &self.constants
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// Register a callback invoked with the whole table after each insertion.
    pub fn set_sync_callback(&mut self, callback: impl FnMut(&[Constant]) + 'static) {
        self.on_update = Some(Box::new(callback));
    }

    pub fn into_vec(self) -> Vec<Constant> {
        self.constants
    }

    fn notify_update(&mut self) {
        if let Some(callback) = self.on_update.as_mut() {
            callback(&self.constants);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
