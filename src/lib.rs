//! A compiler from a PHP subset to a compact stack-machine bytecode.
//!
//! The pipeline:
//!
//! 1. **Parser** (`parser`) builds a [`ast::Stmt`] list from source text
//!    using a pest grammar and a Pratt parser for operator precedence.
//! 2. **Compiler** (`compiler`) lowers the statements into a
//!    [`bytecode::Chunk`] in one forward pass, backpatching jumps. Its
//!    bookkeeping lives in `context`, `constants`, and `symbols`.
//! 3. **VM** (`vm`) executes a chunk and returns what it printed.
//!
//! # Entry point
//!
//! ```rust
//! let output = phpc::run_source("<?php echo 1 + 2;").unwrap();
//! assert_eq!(output, "3");
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod parser;
pub mod symbols;
pub mod value;
pub mod vm;

// ─────────────────────────────────────────────────────────────────────────────
// Unified error type
// ─────────────────────────────────────────────────────────────────────────────

use crate::error::CompileError;
use crate::parser::ParseError;
use crate::vm::RuntimeError;

/// Errors from every pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum PhpcError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Reading a source file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PhpcResult<T> = Result<T, PhpcError>;

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parse source text into a statement list.
pub fn parse_source(src: &str) -> PhpcResult<Vec<ast::Stmt>> {
    Ok(parser::parse(src)?)
}

/// Compile a parsed program with default limits.
pub fn compile_program(program: &[ast::Stmt]) -> PhpcResult<bytecode::Chunk> {
    Ok(compiler::compile(program)?)
}

/// Parse and compile.
pub fn compile_source(src: &str) -> PhpcResult<bytecode::Chunk> {
    let program = parse_source(src)?;
    compile_program(&program)
}

/// Parse, compile, and run on a fresh VM. Returns the printed output.
pub fn run_source(src: &str) -> PhpcResult<String> {
    let chunk = compile_source(src)?;
    Ok(vm::execute(&chunk)?)
}

/// Read, compile, and run a source file.
pub fn run_file(path: impl AsRef<std::path::Path>) -> PhpcResult<String> {
    let src = std::fs::read_to_string(path)?;
    run_source(&src)
}
