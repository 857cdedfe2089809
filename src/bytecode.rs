//! Bytecode representation for the PHP-subset stack machine.
//!
//! A compiled program is a [`Chunk`]: a flat `Vec<u8>` of instructions and the
//! constant array they index into. While compiling, bytes are written through a
//! [`BytecodeBuffer`], which owns the placeholder/patch protocol.
//!
//! # Encoding
//!
//! Each instruction is encoded as one or more bytes:
//! - The first byte is the [`OpCode`] discriminant.
//! - Operands immediately follow, multi-byte operands in little-endian order.
//!
//! Operand sizes:
//! - **u8** for constant indices, variable slots and argument counts.
//! - **i16** for jump offsets.
//! - **u16** for function entry addresses.
//!
//! Jump offsets are *relative* to the byte immediately following the offset
//! field: `target - (operand_position + 2)`. Backward jumps are negative and
//! are written through the same two-byte little-endian encoding.

use std::fmt;

use tracing::trace;

use crate::constants::Constant;
use crate::error::{CompileError, CompileResult};

/// Operand value written in place of a jump offset that is not known yet.
pub const PLACEHOLDER: u16 = 0xFFFF;

// ─────────────────────────────────────────────────────────────────────────────
// OpCode
// ─────────────────────────────────────────────────────────────────────────────

/// Every instruction the VM can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // ── Constants / output ───────────────────────────────────────────────────
    /// Push a constant.  Operand: u8 constant index.
    LoadConst = 0x01,
    /// Pop a value and write its string form to the output.
    Print = 0x02,

    // ── Arithmetic ───────────────────────────────────────────────────────────
    Add = 0x03,
    Sub = 0x04,
    Mul = 0x05,
    Div = 0x06,

    // ── Comparison / logic ───────────────────────────────────────────────────
    /// `>`
    Gt = 0x07,
    /// `<`
    Lt = 0x08,
    /// Logical AND of two already-evaluated operands (no short-circuit).
    And = 0x09,
    /// Logical OR of two already-evaluated operands (no short-circuit).
    Or = 0x0A,
    /// Loose equality `==`.
    Eq = 0x0B,

    /// Discard the top stack value.
    Pop = 0x0C,

    /// Remainder.
    Mod = 0x0D,
    /// `>=`
    Gte = 0x0E,
    /// `<=`
    Lte = 0x0F,

    // ── Variables ────────────────────────────────────────────────────────────
    /// Pop the top value into a variable.  Operand: u8 slot.
    StoreVar = 0x10,
    /// Push a variable's value.  Operand: u8 slot.
    LoadVar = 0x11,

    /// Logical negation.
    Not = 0x12,
    /// String concatenation `.`.
    Concat = 0x13,
    /// `===`
    IdentityEq = 0x14,
    /// `!==`
    IdentityNe = 0x15,

    // ── Increment / decrement ────────────────────────────────────────────────
    /// Pop `v`, push `v + 1` twice.
    Inc = 0x16,
    /// Pop `v`, push `v - 1` twice.
    Dec = 0x17,
    /// Pop `v`, push `v` then `v + 1`.
    PostInc = 0x18,
    /// Pop `v`, push `v` then `v - 1`.
    PostDec = 0x19,

    // ── Control flow ─────────────────────────────────────────────────────────
    /// Pop a value; jump if it is falsy.  Operand: i16 relative offset.
    JumpIfFalse = 0x20,
    /// Unconditional jump.  Operand: i16 relative offset.
    Jump = 0x21,

    // ── Bitwise ──────────────────────────────────────────────────────────────
    BitAnd = 0x30,
    BitOr = 0x31,
    BitXor = 0x32,
    BitNot = 0x33,
    Shl = 0x34,
    Shr = 0x35,

    // ── Compound assignment ──────────────────────────────────────────────────
    // Each pops `rhs` then `lhs` and pushes the combined value; the following
    // STORE_VAR writes it back.
    AssignAdd = 0x40,
    AssignSub = 0x41,
    AssignMul = 0x42,
    AssignDiv = 0x43,
    AssignMod = 0x44,
    AssignConcat = 0x45,

    // ── Functions ────────────────────────────────────────────────────────────
    /// Function prologue.  Operands: u8 argc, then argc × u8 parameter slot.
    FuncDecl = 0x80,
    /// Call a function.  Operands: u8 argc, u16 entry address.
    FuncCall = 0x81,
    /// Implicit end of a function body; returns `null`.
    ExitFunc = 0x82,
    /// Return the top of stack to the caller.
    Return = 0x83,

    /// Stop execution.
    Halt = 0xFF,
}

impl TryFrom<u8> for OpCode {
    type Error = u8;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(OpCode::LoadConst),
            0x02 => Ok(OpCode::Print),
            0x03 => Ok(OpCode::Add),
            0x04 => Ok(OpCode::Sub),
            0x05 => Ok(OpCode::Mul),
            0x06 => Ok(OpCode::Div),
            0x07 => Ok(OpCode::Gt),
            0x08 => Ok(OpCode::Lt),
            0x09 => Ok(OpCode::And),
            0x0A => Ok(OpCode::Or),
            0x0B => Ok(OpCode::Eq),
            0x0C => Ok(OpCode::Pop),
            0x0D => Ok(OpCode::Mod),
            0x0E => Ok(OpCode::Gte),
            0x0F => Ok(OpCode::Lte),
            0x10 => Ok(OpCode::StoreVar),
            0x11 => Ok(OpCode::LoadVar),
            0x12 => Ok(OpCode::Not),
            0x13 => Ok(OpCode::Concat),
            0x14 => Ok(OpCode::IdentityEq),
            0x15 => Ok(OpCode::IdentityNe),
            0x16 => Ok(OpCode::Inc),
            0x17 => Ok(OpCode::Dec),
            0x18 => Ok(OpCode::PostInc),
            0x19 => Ok(OpCode::PostDec),
            0x20 => Ok(OpCode::JumpIfFalse),
            0x21 => Ok(OpCode::Jump),
            0x30 => Ok(OpCode::BitAnd),
            0x31 => Ok(OpCode::BitOr),
            0x32 => Ok(OpCode::BitXor),
            0x33 => Ok(OpCode::BitNot),
            0x34 => Ok(OpCode::Shl),
            0x35 => Ok(OpCode::Shr),
            0x40 => Ok(OpCode::AssignAdd),
            0x41 => Ok(OpCode::AssignSub),
            0x42 => Ok(OpCode::AssignMul),
            0x43 => Ok(OpCode::AssignDiv),
            0x44 => Ok(OpCode::AssignMod),
            0x45 => Ok(OpCode::AssignConcat),
            0x80 => Ok(OpCode::FuncDecl),
            0x81 => Ok(OpCode::FuncCall),
            0x82 => Ok(OpCode::ExitFunc),
            0x83 => Ok(OpCode::Return),
            0xFF => Ok(OpCode::Halt),
            other => Err(other),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::LoadConst => "LOAD_CONST",
            OpCode::Print => "PRINT",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Gt => "GT",
            OpCode::Lt => "LT",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Eq => "EQ",
            OpCode::Pop => "POP",
            OpCode::Mod => "MOD",
            OpCode::Gte => "GTE",
            OpCode::Lte => "LTE",
            OpCode::StoreVar => "STORE_VAR",
            OpCode::LoadVar => "LOAD_VAR",
            OpCode::Not => "NOT",
            OpCode::Concat => "CONCAT",
            OpCode::IdentityEq => "IDENTITY_EQ",
            OpCode::IdentityNe => "IDENTITY_NE",
            OpCode::Inc => "INC",
            OpCode::Dec => "DEC",
            OpCode::PostInc => "POST_INC",
            OpCode::PostDec => "POST_DEC",
            OpCode::JumpIfFalse => "JUMP_IF_FALSE",
            OpCode::Jump => "JUMP",
            OpCode::BitAnd => "BIT_AND",
            OpCode::BitOr => "BIT_OR",
            OpCode::BitXor => "BIT_XOR",
            OpCode::BitNot => "BIT_NOT",
            OpCode::Shl => "SHL",
            OpCode::Shr => "SHR",
            OpCode::AssignAdd => "ASSIGN_ADD",
            OpCode::AssignSub => "ASSIGN_SUB",
            OpCode::AssignMul => "ASSIGN_MUL",
            OpCode::AssignDiv => "ASSIGN_DIV",
            OpCode::AssignMod => "ASSIGN_MOD",
            OpCode::AssignConcat => "ASSIGN_CONCAT",
            OpCode::FuncDecl => "FUNC_DECL",
            OpCode::FuncCall => "FUNC_CALL",
            OpCode::ExitFunc => "EXIT_FUNC",
            OpCode::Return => "RETURN",
            OpCode::Halt => "HALT",
        };
        f.write_str(name)
    }
}

/// Offset stored in a jump whose operand starts at `operand_pos` and whose
/// destination is `target`.
#[inline]
pub fn relative_offset(operand_pos: usize, target: usize) -> i64 {
    target as i64 - (operand_pos as i64 + 2)
}

// ─────────────────────────────────────────────────────────────────────────────
// Bytecode buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only byte stream with in-place patching of earlier operands.
#[derive(Default)]
pub struct BytecodeBuffer {
    code: Vec<u8>,
    on_update: Option<Box<dyn FnMut(&[u8])>>,
}

impl fmt::Debug for BytecodeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytecodeBuffer")
            .field("code", &self.code)
            .finish()
    }
}

impl BytecodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Emission helpers ─────────────────────────────────────────────────────

    #[inline]
    pub fn append(&mut self, byte: u8) {
        self.code.push(byte);
        self.notify_update();
    }

    #[inline]
    pub fn append_op(&mut self, op: OpCode) {
        self.append(op as u8);
    }

    /// Emit an opcode followed by a u8 operand.
    #[inline]
    pub fn append_op_u8(&mut self, op: OpCode, operand: u8) {
        self.append(op as u8);
        self.append(operand);
    }

    /// Emit a u16 operand as two bytes, little-endian.
    pub fn append_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
        self.notify_update();
    }

    /// Emit an i16 operand; same byte layout as [`append_u16`](Self::append_u16).
    pub fn append_i16(&mut self, value: i16) {
        self.code.extend_from_slice(&value.to_le_bytes());
        self.notify_update();
    }

    // ── Jump patching ────────────────────────────────────────────────────────

    /// Emit a jump instruction with a placeholder offset (`0xFFFF`).
    /// Returns the byte offset of the operand so it can be patched later.
    pub fn emit_jump(&mut self, op: OpCode) -> usize {
        self.append_op(op);
        let operand_pos = self.code.len();
        self.append_u16(PLACEHOLDER);
        operand_pos
    }

    /// Emit a jump to an already-known `target` (a backward jump).
    pub fn emit_jump_to(
        &mut self,
        op: OpCode,
        target: usize,
        construct: &'static str,
    ) -> CompileResult<()> {
        self.append_op(op);
        let operand_pos = self.code.len();
        let offset = checked_offset(operand_pos, target, construct)?;
        self.append_i16(offset);
        Ok(())
    }

    /// Point the jump operand at `operand_pos` to `target`.
    pub fn patch_jump(
        &mut self,
        operand_pos: usize,
        target: usize,
        construct: &'static str,
    ) -> CompileResult<()> {
        let offset = checked_offset(operand_pos, target, construct)?;
        trace!(at = operand_pos, target, offset, construct, "patch jump");
        self.patch_u16(operand_pos, offset as u16)
    }

    /// Point the jump operand at `operand_pos` to the current end of the buffer.
    pub fn patch_jump_here(
        &mut self,
        operand_pos: usize,
        construct: &'static str,
    ) -> CompileResult<()> {
        let target = self.code.len();
        self.patch_jump(operand_pos, target, construct)
    }

    /// Overwrite the two bytes at `position` with `value` (little-endian).
    pub fn patch_u16(&mut self, position: usize, value: u16) -> CompileResult<()> {
        if position + 1 >= self.code.len() {
            return Err(CompileError::PatchOutOfBounds {
                position,
                len: self.code.len(),
            });
        }
        let [lo, hi] = value.to_le_bytes();
        self.code[position] = lo;
        self.code[position + 1] = hi;
        self.notify_update();
        Ok(())
    }

    // ── Utilities ────────────────────────────────────────────────────────────

    /// Return the current write position (= next instruction offset).
    #[inline]
    pub fn current_position(&self) -> usize {
        self.code.len()
    }

    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        read_u16(&self.code, offset)
    }

    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|v| v as i16)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Register a callback invoked with the whole buffer after each mutation.
    pub fn set_sync_callback(&mut self, callback: impl FnMut(&[u8]) + 'static) {
        self.on_update = Some(Box::new(callback));
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.code
    }

    fn notify_update(&mut self) {
        if let Some(callback) = self.on_update.as_mut() {
            callback(&self.code);
        }
    }
}

fn checked_offset(
    operand_pos: usize,
    target: usize,
    construct: &'static str,
) -> CompileResult<i16> {
    let offset = relative_offset(operand_pos, target);
    i16::try_from(offset).map_err(|_| CompileError::JumpOutOfRange { construct, offset })
}

fn read_u16(code: &[u8], offset: usize) -> Option<u16> {
    let lo = *code.get(offset)?;
    let hi = *code.get(offset + 1)?;
    Some(u16::from_le_bytes([lo, hi]))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunk
// ─────────────────────────────────────────────────────────────────────────────

/// A compiled program: bytecode terminated by `HALT`, plus its constants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// Raw instruction bytes.
    pub code: Vec<u8>,
    /// Constant array, ordered by pool index.
    pub constants: Vec<Constant>,
}

impl Chunk {
    pub fn new(code: Vec<u8>, constants: Vec<Constant>) -> Self {
        Chunk { code, constants }
    }

    /// Read a u16 from `code[offset]` (little-endian).
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        read_u16(&self.code, offset)
    }

    #[inline]
    pub fn read_i16(&self, offset: usize) -> Option<i16> {
        self.read_u16(offset).map(|v| v as i16)
    }

    /// Iterate over `(offset, opcode)` for every decodable instruction.
    ///
    /// Stops at the first byte that is not an opcode.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            chunk: self,
            offset: 0,
        }
    }
}

/// Iterator returned by [`Chunk::instructions`].
pub struct Instructions<'a> {
    chunk: &'a Chunk,
    offset: usize,
}

impl Iterator for Instructions<'_> {
    type Item = (usize, OpCode);

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset;
        let op = OpCode::try_from(*self.chunk.code.get(offset)?).ok()?;
        self.offset += instruction_len(&self.chunk.code, offset, op);
        Some((offset, op))
    }
}

/// Encoded size of the instruction `op` starting at `offset`.
pub fn instruction_len(code: &[u8], offset: usize, op: OpCode) -> usize {
    match op {
        OpCode::LoadConst | OpCode::StoreVar | OpCode::LoadVar => 2,
        OpCode::Jump | OpCode::JumpIfFalse => 3,
        OpCode::FuncCall => 4,
        OpCode::FuncDecl => 2 + code.get(offset + 1).copied().unwrap_or(0) as usize,
        _ => 1,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Disassembler
// ─────────────────────────────────────────────────────────────────────────────

/// Disassemble `chunk` to a human-readable string.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("=== {name} ===\n");
    let mut offset = 0usize;
    while offset < chunk.code.len() {
        let (s, size) = disassemble_instruction(chunk, offset);
        out.push_str(&format!("{offset:04x}  {s}\n"));
        offset += size;
    }
    out
}

/// Disassemble a single instruction at `offset`.
///
/// Returns `(text, bytes_consumed)`. Jump targets are shown as absolute
/// offsets.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let Some(&byte) = chunk.code.get(offset) else {
        return ("<eof>".to_string(), 1);
    };
    let op = match OpCode::try_from(byte) {
        Ok(op) => op,
        Err(_) => return (format!("UNKNOWN({byte:#04x})"), 1),
    };
    let size = instruction_len(&chunk.code, offset, op);
    let operand = |i: usize| chunk.code.get(offset + i).copied().unwrap_or(0);

    let text = match op {
        OpCode::LoadConst => {
            let idx = operand(1);
            let c = chunk
                .constants
                .get(idx as usize)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "<oob>".to_string());
            format!("{op} [{idx}] = {c}")
        }
        OpCode::StoreVar | OpCode::LoadVar => format!("{op} ${}", operand(1)),
        OpCode::Jump | OpCode::JumpIfFalse => match chunk.read_i16(offset + 1) {
            Some(rel) => {
                let target = offset as i64 + 3 + rel as i64;
                format!("{op} -> {target:#06x}")
            }
            None => format!("{op} -> <truncated>"),
        },
        OpCode::FuncCall => {
            let argc = operand(1);
            let addr = chunk.read_u16(offset + 2).unwrap_or(0);
            format!("{op} argc={argc} -> {addr:#06x}")
        }
        OpCode::FuncDecl => {
            let slots: Vec<String> = (0..operand(1) as usize)
                .map(|i| format!("${}", operand(2 + i)))
                .collect();
            format!("{op} ({})", slots.join(", "))
        }
        _ => op.to_string(),
    };
    (text, size)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_opcode_bytes() {
        for byte in [0x01u8, 0x0F, 0x20, 0x21, 0x35, 0x45, 0x80, 0x83, 0xFF] {
            let op = OpCode::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(OpCode::try_from(0x1Au8), Err(0x1A));
        assert_eq!(OpCode::try_from(0x84u8), Err(0x84));
    }

    #[test]
    fn test_u16_is_little_endian() {
        let mut buf = BytecodeBuffer::new();
        buf.append_u16(0x1234);
        assert_eq!(buf.as_slice(), &[0x34, 0x12]);
        buf.append_i16(-2);
        assert_eq!(&buf.as_slice()[2..], &[0xFE, 0xFF]);
        assert_eq!(buf.read_i16(2), Some(-2));
    }

    #[test]
    fn test_forward_jump_patch() {
        let mut buf = BytecodeBuffer::new();
        let patch = buf.emit_jump(OpCode::JumpIfFalse);
        assert_eq!(buf.read_u16(patch), Some(PLACEHOLDER));
        buf.append_op(OpCode::Pop);
        buf.append_op(OpCode::Pop);
        buf.patch_jump_here(patch, "if").unwrap();
        // Offset counts from the byte after the operand.
        assert_eq!(buf.read_i16(patch), Some(2));
    }

    #[test]
    fn test_backward_jump_is_negative() {
        let mut buf = BytecodeBuffer::new();
        buf.append_op(OpCode::Pop);
        buf.emit_jump_to(OpCode::Jump, 0, "while").unwrap();
        assert_eq!(buf.read_i16(2), Some(-4));
    }

    #[test]
    fn test_patch_out_of_bounds() {
        let mut buf = BytecodeBuffer::new();
        buf.append(0);
        buf.append(0);
        assert!(buf.patch_u16(0, 7).is_ok());
        assert_eq!(
            buf.patch_u16(1, 7),
            Err(CompileError::PatchOutOfBounds { position: 1, len: 2 })
        );
    }

    #[test]
    fn test_jump_out_of_range() {
        let mut buf = BytecodeBuffer::new();
        let patch = buf.emit_jump(OpCode::Jump);
        assert!(matches!(
            buf.patch_jump(patch, 40_000, "while"),
            Err(CompileError::JumpOutOfRange { construct: "while", .. })
        ));
    }

    #[test]
    fn test_sync_callback_mirrors_patches() {
        let mirror = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&mirror);
        let mut buf = BytecodeBuffer::new();
        buf.set_sync_callback(move |code| *sink.borrow_mut() = code.to_vec());
        let patch = buf.emit_jump(OpCode::Jump);
        buf.patch_jump_here(patch, "if").unwrap();
        assert_eq!(*mirror.borrow(), buf.as_slice());
    }

    #[test]
    fn test_disassemble_resolves_targets() {
        let chunk = Chunk::new(
            vec![0x01, 0x00, 0x20, 0x01, 0x00, 0x02, 0x21, 0xF7, 0xFF, 0xFF],
            vec![Constant::Int(1)],
        );
        let text = disassemble(&chunk, "test");
        assert!(text.contains("LOAD_CONST [0] = 1"));
        assert!(text.contains("JUMP_IF_FALSE -> 0x0006"));
        assert!(text.contains("JUMP -> 0x0000"));
        assert!(text.contains("HALT"));
    }

    #[test]
    fn test_instructions_skip_operands() {
        let chunk = Chunk::new(
            vec![0x80, 0x02, 0x00, 0x01, 0x11, 0x00, 0x83, 0xFF],
            Vec::new(),
        );
        let ops: Vec<_> = chunk.instructions().collect();
        assert_eq!(
            ops,
            vec![
                (0, OpCode::FuncDecl),
                (4, OpCode::LoadVar),
                (6, OpCode::Return),
                (7, OpCode::Halt),
            ]
        );
    }
}
