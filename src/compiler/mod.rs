//! Syntax-tree-to-bytecode compiler.
//!
//! The compiler performs a single forward walk over the statement list and
//! emits bytecode into a [`CompileContext`]. The only backward edits are
//! jump patches: every construct follows the pattern *emit placeholder,
//! compile body, compute offset, patch*.
//!
//! # Variable model
//!
//! Variables live in one flat table of byte-sized slots for the whole
//! program. Function parameters and locals share that table with top-level
//! code, so a recursive call overwrites its caller's parameters.
//!
//! # Functions
//!
//! A function body is emitted inline, guarded by a jump that skips it during
//! normal execution. Its entry address is the `FUNC_DECL` prologue right
//! after that jump. Functions must be declared before they are called.

mod expr;
mod stmt;

use tracing::debug;

use crate::ast::Stmt;
use crate::bytecode::Chunk;
use crate::config::CompilerConfig;
use crate::context::CompileContext;
use crate::error::CompileResult;

pub use expr::compile_expr;
pub use stmt::compile_stmt;

// ─────────────────────────────────────────────────────────────────────────────
// Compiler
// ─────────────────────────────────────────────────────────────────────────────

/// The bytecode compiler.
///
/// Create one with [`Compiler::new`], then call [`Compiler::compile_program`].
/// A compiler holds only configuration; each call starts from a fresh
/// [`CompileContext`].
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Compiler { config }
    }

    /// Compile a whole program. The returned code ends with `HALT`.
    ///
    /// On error nothing is returned: the partially filled buffer is dropped
    /// with the context.
    pub fn compile_program(&self, program: &[Stmt]) -> CompileResult<Chunk> {
        debug!(statements = program.len(), "compiling program");
        let mut ctx = CompileContext::new(&self.config);
        for stmt in program {
            compile_stmt(&mut ctx, stmt)?;
        }
        let chunk = ctx.finish();
        debug!(
            code_len = chunk.code.len(),
            constants = chunk.constants.len(),
            "compiled program"
        );
        Ok(chunk)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Compile `program` with the default limits.
pub fn compile(program: &[Stmt]) -> CompileResult<Chunk> {
    Compiler::new().compile_program(program)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
