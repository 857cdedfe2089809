//! Per-compilation state and the loop/jump context stack.
//!
//! One [`CompileContext`] is created for each compilation and dropped when it
//! ends. It owns every table the statement and expression compilers write to,
//! so they are passed a single `&mut CompileContext` instead of sharing
//! globals.
//!
//! # Deferred jumps
//!
//! `break` and `continue` are emitted before their targets are known. Each
//! one writes a `JUMP 0xFFFF` and records a [`PendingJump`] in the innermost
//! eligible [`LoopContext`]. When that context is closed with
//! [`CompileContext::exit_loop`], both targets are known and every pending
//! jump is patched in one pass.

use tracing::debug;

use crate::bytecode::{BytecodeBuffer, Chunk, OpCode};
use crate::config::CompilerConfig;
use crate::constants::{Constant, ConstantPool};
use crate::error::{CompileError, CompileResult};
use crate::symbols::{FunctionTable, VariableSlots};

// ─────────────────────────────────────────────────────────────────────────────
// Loop context
// ─────────────────────────────────────────────────────────────────────────────

/// What opened a [`LoopContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// `while`, `do-while` or `for`: a target for both `break` and `continue`.
    Loop,
    /// `switch`: a target for `break` only.
    Switch,
}

/// A `break`/`continue` jump waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingJump {
    /// Offset of the jump's two-byte operand.
    pub position: usize,
    pub is_break: bool,
}

/// Jump targets of one enclosing loop or switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopContext {
    pub kind: LoopKind,
    /// First byte of the construct.
    pub start_address: usize,
    /// Where `continue` lands. Set by the construct once it is known.
    pub retest_address: Option<usize>,
    /// Where `break` lands. Set when the context is closed.
    pub end_address: Option<usize>,
    pub pending_jumps: Vec<PendingJump>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compile context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a single compilation writes to.
#[derive(Debug)]
pub struct CompileContext {
    pub code: BytecodeBuffer,
    pub constants: ConstantPool,
    pub variables: VariableSlots,
    pub functions: FunctionTable,
    /// Enclosing loops and switches, innermost last.
    pub loops: Vec<LoopContext>,
    /// Whether a function body is being compiled.
    pub in_function: bool,
    /// Number of `switch` statements compiled so far. Names their subject
    /// slots.
    pub switch_count: usize,
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new(&CompilerConfig::default())
    }
}

impl CompileContext {
    pub fn new(config: &CompilerConfig) -> Self {
        CompileContext {
            code: BytecodeBuffer::new(),
            constants: ConstantPool::with_config(config),
            variables: VariableSlots::with_config(config),
            functions: FunctionTable::new(),
            loops: Vec::new(),
            in_function: false,
            switch_count: 0,
        }
    }

    // ── Emission shorthands ──────────────────────────────────────────────────

    /// Emit `LOAD_CONST` for `constant`, adding it to the pool if needed.
    pub fn emit_constant(&mut self, constant: Constant) -> CompileResult<()> {
        let idx = self.constants.add(constant)?;
        self.code.append_op_u8(OpCode::LoadConst, idx);
        Ok(())
    }

    /// Emit `op` with the slot of variable `name` as operand.
    pub fn emit_variable(&mut self, op: OpCode, name: &str) -> CompileResult<u8> {
        let slot = self.variables.get_index(name)?;
        self.code.append_op_u8(op, slot);
        Ok(slot)
    }

    // ── Loop stack ───────────────────────────────────────────────────────────

    /// Open a loop or switch context starting at the current position.
    pub fn enter_loop(&mut self, kind: LoopKind) {
        let start_address = self.code.current_position();
        self.loops.push(LoopContext {
            kind,
            start_address,
            retest_address: None,
            end_address: None,
            pending_jumps: Vec::new(),
        });
    }

    /// Record where `continue` lands in the innermost context.
    pub fn set_retest_address(&mut self, address: usize) {
        if let Some(ctx) = self.loops.last_mut() {
            ctx.retest_address = Some(address);
        }
    }

    /// Emit a `break` jump for the innermost loop or switch.
    pub fn emit_break(&mut self) -> CompileResult<()> {
        if self.loops.is_empty() {
            return Err(CompileError::BreakOutsideLoop);
        }
        let position = self.code.emit_jump(OpCode::Jump);
        if let Some(ctx) = self.loops.last_mut() {
            ctx.pending_jumps.push(PendingJump {
                position,
                is_break: true,
            });
        }
        Ok(())
    }

    /// Emit a `continue` jump for the innermost loop.
    ///
    /// Switch contexts are skipped: `continue` inside a `switch` continues
    /// the nearest enclosing loop.
    pub fn emit_continue(&mut self) -> CompileResult<()> {
        let idx = self
            .loops
            .iter()
            .rposition(|ctx| ctx.kind == LoopKind::Loop)
            .ok_or(CompileError::ContinueOutsideLoop)?;
        let position = self.code.emit_jump(OpCode::Jump);
        self.loops[idx].pending_jumps.push(PendingJump {
            position,
            is_break: false,
        });
        Ok(())
    }

    /// Close the innermost context at the current position and patch its
    /// pending jumps.
    pub fn exit_loop(&mut self, construct: &'static str) -> CompileResult<LoopContext> {
        let Some(mut ctx) = self.loops.pop() else {
            return Err(CompileError::UnsupportedConstruct {
                construct: format!("unbalanced {construct}"),
            });
        };
        let end = self.code.current_position();
        ctx.end_address = Some(end);
        let retest = ctx.retest_address.unwrap_or(ctx.start_address);
        for jump in &ctx.pending_jumps {
            let target = if jump.is_break { end } else { retest };
            self.code.patch_jump(jump.position, target, construct)?;
        }
        debug!(
            construct,
            start = ctx.start_address,
            end,
            patched = ctx.pending_jumps.len(),
            "closed loop context"
        );
        Ok(ctx)
    }

    /// Finish compilation: append `HALT` and hand out the program.
    pub fn finish(mut self) -> Chunk {
        self.code.append_op(OpCode::Halt);
        Chunk::new(self.code.into_vec(), self.constants.into_vec())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
