//! Shared helpers for the integration tests.

#![allow(dead_code)]

use phpc::bytecode::{Chunk, OpCode};

/// Compile `src`, panicking with the source on failure.
pub fn compile(src: &str) -> Chunk {
    phpc::compile_source(src).unwrap_or_else(|e| panic!("{e}\nsource:\n{src}"))
}

/// Compile and run `src`, returning what it printed.
pub fn run(src: &str) -> String {
    phpc::run_source(src).unwrap_or_else(|e| panic!("{e}\nsource:\n{src}"))
}

/// The one-byte operand of every `op` instruction, in code order.
pub fn operands(chunk: &Chunk, op: OpCode) -> Vec<u8> {
    chunk
        .instructions()
        .filter(|(_, found)| *found == op)
        .map(|(offset, _)| chunk.code[offset + 1])
        .collect()
}

/// Absolute targets of every jump instruction.
pub fn jump_targets(chunk: &Chunk) -> Vec<i64> {
    chunk
        .instructions()
        .filter(|(_, op)| matches!(op, OpCode::Jump | OpCode::JumpIfFalse))
        .map(|(offset, _)| {
            let rel = chunk.read_i16(offset + 1).expect("jump operand");
            offset as i64 + 3 + i64::from(rel)
        })
        .collect()
}
