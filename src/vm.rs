//! The reference stack machine.
//!
//! The VM executes a [`Chunk`] produced by the compiler and collects
//! everything `PRINT` writes into a `String`.
//!
//! # Execution model
//!
//! - One value stack shared by all code, bounded by [`VmConfig::stack_size`].
//! - 256 global variable slots, all starting as `Int(0)`. Function
//!   parameters are written into the same slots.
//! - A return stack of addresses. `FUNC_CALL` pushes the address after its
//!   operands, `RETURN` and `EXIT_FUNC` pop it. A `RETURN` with an empty
//!   return stack ends the program.
//! - Jump operands are `i16` offsets relative to the byte after the operand.

use tracing::{debug, trace};

use crate::bytecode::{Chunk, OpCode};
use crate::config::VmConfig;
use crate::value::Value;

const VARIABLE_SLOTS: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Runtime error
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime error raised by the VM.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack overflow: more than {limit} values")]
    StackOverflow { limit: usize },

    #[error("stack underflow in {op} at ip={ip:#06x}")]
    StackUnderflow { op: OpCode, ip: usize },

    #[error("unknown opcode {byte:#04x} at ip={ip:#06x}")]
    UnknownOpcode { byte: u8, ip: usize },

    #[error("unexpected end of bytecode at ip={ip:#06x}")]
    UnexpectedEnd { ip: usize },

    #[error("jump target {target} out of bounds at ip={ip:#06x}")]
    JumpOutOfBounds { ip: usize, target: i64 },

    #[error("invalid constant index {index} at ip={ip:#06x}")]
    InvalidConstant { index: u8, ip: usize },

    #[error("division by zero at ip={ip:#06x}")]
    DivisionByZero { ip: usize },

    #[error("address {address:#06x} called at ip={ip:#06x} is not a function")]
    NotAFunction { address: u16, ip: usize },

    #[error("call depth exceeded {limit}")]
    CallDepthExceeded { limit: usize },

    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u64 },
}

pub type VmResult<T> = Result<T, RuntimeError>;

// ─────────────────────────────────────────────────────────────────────────────
// Vm
// ─────────────────────────────────────────────────────────────────────────────

/// The bytecode interpreter.
pub struct Vm {
    config: VmConfig,
    stack: Vec<Value>,
    variables: Vec<Value>,
    return_stack: Vec<usize>,
    output: String,
    /// Instruction pointer into the running chunk.
    ip: usize,
    /// Offset of the instruction currently executing, for error reports.
    op_start: usize,
    steps: u64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Vm {
            stack: Vec::with_capacity(config.stack_size),
            variables: vec![Value::Int(0); VARIABLE_SLOTS],
            return_stack: Vec::new(),
            output: String::new(),
            ip: 0,
            op_start: 0,
            steps: 0,
            config,
        }
    }

    /// Execute `chunk` from offset 0 and return everything it printed.
    ///
    /// State from a previous run is discarded first.
    pub fn run(&mut self, chunk: &Chunk) -> VmResult<String> {
        self.reset();
        self.dispatch(chunk)?;
        debug!(steps = self.steps, output_len = self.output.len(), "halted");
        Ok(std::mem::take(&mut self.output))
    }

    /// The value currently held in `slot`.
    pub fn variable(&self, slot: u8) -> &Value {
        &self.variables[usize::from(slot)]
    }

    /// Values left on the stack after the last run.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    fn reset(&mut self) {
        self.stack.clear();
        self.variables.iter_mut().for_each(|v| *v = Value::Int(0));
        self.return_stack.clear();
        self.output.clear();
        self.ip = 0;
        self.op_start = 0;
        self.steps = 0;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main dispatch loop
    // ─────────────────────────────────────────────────────────────────────────

    fn dispatch(&mut self, chunk: &Chunk) -> VmResult<()> {
        let code = chunk.code.as_slice();
        while self.ip < code.len() {
            self.tick()?;
            self.op_start = self.ip;
            let byte = self.read_byte(code)?;
            let op = OpCode::try_from(byte).map_err(|byte| RuntimeError::UnknownOpcode {
                byte,
                ip: self.op_start,
            })?;
            trace!(ip = self.op_start, %op, depth = self.stack.len(), "dispatch");

            match op {
                // ── Constants and variables ──────────────────────────────────
                OpCode::LoadConst => {
                    let index = self.read_byte(code)?;
                    let constant = chunk
                        .constants
                        .get(usize::from(index))
                        .ok_or(RuntimeError::InvalidConstant {
                            index,
                            ip: self.op_start,
                        })?;
                    self.push(Value::from(constant))?;
                }
                OpCode::StoreVar => {
                    let slot = self.read_byte(code)?;
                    let value = self.pop(op)?;
                    self.variables[usize::from(slot)] = value;
                }
                OpCode::LoadVar => {
                    let slot = self.read_byte(code)?;
                    let value = self.variables[usize::from(slot)].clone();
                    self.push(value)?;
                }
                OpCode::Pop => {
                    self.pop(op)?;
                }
                OpCode::Print => {
                    let value = self.pop(op)?;
                    self.output.push_str(&value.to_string());
                }

                // ── Arithmetic ───────────────────────────────────────────────
                OpCode::Add | OpCode::AssignAdd => self.int_op(op, |a, b| Ok(a.wrapping_add(b)))?,
                OpCode::Sub | OpCode::AssignSub => self.int_op(op, |a, b| Ok(a.wrapping_sub(b)))?,
                OpCode::Mul | OpCode::AssignMul => self.int_op(op, |a, b| Ok(a.wrapping_mul(b)))?,
                OpCode::Div | OpCode::AssignDiv => {
                    let ip = self.op_start;
                    self.int_op(op, |a, b| {
                        if b == 0 {
                            Err(RuntimeError::DivisionByZero { ip })
                        } else {
                            Ok(a.wrapping_div(b))
                        }
                    })?
                }
                OpCode::Mod | OpCode::AssignMod => {
                    let ip = self.op_start;
                    self.int_op(op, |a, b| {
                        if b == 0 {
                            Err(RuntimeError::DivisionByZero { ip })
                        } else {
                            Ok(a.wrapping_rem(b))
                        }
                    })?
                }
                OpCode::Concat | OpCode::AssignConcat => {
                    let (a, b) = self.pop2(op)?;
                    self.push(Value::Str(format!("{a}{b}")))?;
                }

                // ── Increment / decrement ────────────────────────────────────
                // Each leaves the expression result below the value to store.
                OpCode::Inc | OpCode::Dec => {
                    let old = self.pop(op)?;
                    let delta = if op == OpCode::Inc { 1 } else { -1 };
                    let new = Value::Int(old.to_int().wrapping_add(delta));
                    self.push(new.clone())?;
                    self.push(new)?;
                }
                OpCode::PostInc | OpCode::PostDec => {
                    let old = self.pop(op)?;
                    let delta = if op == OpCode::PostInc { 1 } else { -1 };
                    let new = Value::Int(old.to_int().wrapping_add(delta));
                    self.push(old)?;
                    self.push(new)?;
                }

                // ── Comparison and logic ─────────────────────────────────────
                OpCode::Eq => self.compare(op, |a, b| a.loose_eq(b))?,
                OpCode::Lt => self.compare(op, |a, b| a.less_than(b))?,
                OpCode::Gt => self.compare(op, |a, b| a.greater_than(b))?,
                OpCode::Lte => self.compare(op, |a, b| a.less_than(b) || a.loose_eq(b))?,
                OpCode::Gte => self.compare(op, |a, b| !a.less_than(b))?,
                OpCode::IdentityEq => self.compare(op, |a, b| a.identical(b))?,
                OpCode::IdentityNe => self.compare(op, |a, b| !a.identical(b))?,
                OpCode::And => self.compare(op, |a, b| a.is_truthy() && b.is_truthy())?,
                OpCode::Or => self.compare(op, |a, b| a.is_truthy() || b.is_truthy())?,
                OpCode::Not => {
                    let value = self.pop(op)?;
                    self.push(Value::Bool(!value.is_truthy()))?;
                }

                // ── Bitwise ──────────────────────────────────────────────────
                OpCode::BitAnd => self.int_op(op, |a, b| Ok(a & b))?,
                OpCode::BitOr => self.int_op(op, |a, b| Ok(a | b))?,
                OpCode::BitXor => self.int_op(op, |a, b| Ok(a ^ b))?,
                OpCode::BitNot => {
                    let value = self.pop(op)?;
                    self.push(Value::Int(!value.to_int()))?;
                }
                OpCode::Shl => self.int_op(op, |a, b| {
                    Ok(u32::try_from(b).ok().and_then(|s| a.checked_shl(s)).unwrap_or(0))
                })?,
                OpCode::Shr => self.int_op(op, |a, b| {
                    let fill = if a < 0 { -1 } else { 0 };
                    Ok(u32::try_from(b).ok().and_then(|s| a.checked_shr(s)).unwrap_or(fill))
                })?,

                // ── Jumps ────────────────────────────────────────────────────
                OpCode::Jump => {
                    let offset = self.read_i16(code)?;
                    self.ip = self.jump_target(code, offset)?;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_i16(code)?;
                    let condition = self.pop(op)?;
                    if !condition.is_truthy() {
                        self.ip = self.jump_target(code, offset)?;
                    }
                }

                // ── Functions ────────────────────────────────────────────────
                OpCode::FuncCall => {
                    let _argc = self.read_byte(code)?;
                    let address = self.read_u16(code)?;
                    if code.get(usize::from(address)) != Some(&(OpCode::FuncDecl as u8)) {
                        return Err(RuntimeError::NotAFunction {
                            address,
                            ip: self.op_start,
                        });
                    }
                    if self.return_stack.len() >= self.config.max_call_depth {
                        return Err(RuntimeError::CallDepthExceeded {
                            limit: self.config.max_call_depth,
                        });
                    }
                    self.return_stack.push(self.ip);
                    self.ip = usize::from(address);
                }
                OpCode::FuncDecl => {
                    let argc = self.read_byte(code)?;
                    for _ in 0..argc {
                        let slot = self.read_byte(code)?;
                        let arg = self.pop(op)?;
                        self.variables[usize::from(slot)] = arg;
                    }
                }
                OpCode::Return => {
                    let value = self.pop(op)?;
                    match self.return_stack.pop() {
                        Some(address) => {
                            self.ip = address;
                            self.push(value)?;
                        }
                        None => return Ok(()),
                    }
                }
                OpCode::ExitFunc => match self.return_stack.pop() {
                    Some(address) => {
                        self.ip = address;
                        self.push(Value::Null)?;
                    }
                    None => return Ok(()),
                },

                OpCode::Halt => return Ok(()),
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn tick(&mut self) -> VmResult<()> {
        self.steps += 1;
        match self.config.max_steps {
            Some(limit) if self.steps > limit => Err(RuntimeError::StepLimitExceeded { limit }),
            _ => Ok(()),
        }
    }

    fn read_byte(&mut self, code: &[u8]) -> VmResult<u8> {
        let byte = *code
            .get(self.ip)
            .ok_or(RuntimeError::UnexpectedEnd { ip: self.ip })?;
        self.ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self, code: &[u8]) -> VmResult<u16> {
        let lo = self.read_byte(code)?;
        let hi = self.read_byte(code)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn read_i16(&mut self, code: &[u8]) -> VmResult<i16> {
        let lo = self.read_byte(code)?;
        let hi = self.read_byte(code)?;
        Ok(i16::from_le_bytes([lo, hi]))
    }

    fn jump_target(&self, code: &[u8], offset: i16) -> VmResult<usize> {
        let target = self.ip as i64 + i64::from(offset);
        usize::try_from(target)
            .ok()
            .filter(|&t| t < code.len())
            .ok_or(RuntimeError::JumpOutOfBounds {
                ip: self.op_start,
                target,
            })
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.config.stack_size {
            return Err(RuntimeError::StackOverflow {
                limit: self.config.stack_size,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, op: OpCode) -> VmResult<Value> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow {
            op,
            ip: self.op_start,
        })
    }

    /// Pop the right operand, then the left.
    fn pop2(&mut self, op: OpCode) -> VmResult<(Value, Value)> {
        let b = self.pop(op)?;
        let a = self.pop(op)?;
        Ok((a, b))
    }

    fn int_op(
        &mut self,
        op: OpCode,
        f: impl FnOnce(i64, i64) -> VmResult<i64>,
    ) -> VmResult<()> {
        let (a, b) = self.pop2(op)?;
        let result = f(a.to_int(), b.to_int())?;
        self.push(Value::Int(result))
    }

    fn compare(&mut self, op: OpCode, f: impl FnOnce(&Value, &Value) -> bool) -> VmResult<()> {
        let (a, b) = self.pop2(op)?;
        self.push(Value::Bool(f(&a, &b)))
    }
}

/// Run `chunk` on a fresh VM with default limits.
pub fn execute(chunk: &Chunk) -> VmResult<String> {
    Vm::new().run(chunk)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
