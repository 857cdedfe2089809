//! Expression lowering.
//!
//! Every expression leaves exactly one value on the stack. Operands are
//! evaluated strictly left to right; `&&` and `||` do not short-circuit.

use crate::ast::{BinOp, Expr, IncDec, UnOp};
use crate::bytecode::OpCode;
use crate::constants::Constant;
use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};

/// Compile `expr`, leaving its value on the stack.
pub fn compile_expr(ctx: &mut CompileContext, expr: &Expr) -> CompileResult<()> {
    match expr {
        Expr::Int(n) => ctx.emit_constant(Constant::Int(*n)),
        Expr::Str(s) => ctx.emit_constant(Constant::Str(s.clone())),
        Expr::Bool(b) => ctx.emit_constant(Constant::Int(i64::from(*b))),
        Expr::Null => ctx.emit_constant(Constant::Int(0)),
        Expr::Var(name) => ctx.emit_variable(OpCode::LoadVar, name).map(drop),
        Expr::Unary { op, operand } => compile_unary(ctx, *op, operand),
        Expr::Binary { op, left, right } => compile_binary(ctx, *op, left, right),
        Expr::IncDec { op, target } => compile_inc_dec(ctx, *op, target),
        Expr::Call { name, args } => compile_call(ctx, name, args),
        Expr::Assign { target, value } => {
            let name = variable_name(target, "assignment")?;
            compile_expr(ctx, value)?;
            let slot = ctx.emit_variable(OpCode::StoreVar, name)?;
            ctx.code.append_op_u8(OpCode::LoadVar, slot);
            Ok(())
        }
        Expr::CompoundAssign { op, target, value } => {
            let name = variable_name(target, "compound assignment")?;
            let slot = compile_compound_assign(ctx, name, *op, value)?;
            ctx.code.append_op_u8(OpCode::LoadVar, slot);
            Ok(())
        }
    }
}

/// `LOAD_VAR s; value; ASSIGN_<op>; STORE_VAR s`. Leaves nothing on the stack.
pub(crate) fn compile_compound_assign(
    ctx: &mut CompileContext,
    name: &str,
    op: BinOp,
    value: &Expr,
) -> CompileResult<u8> {
    let assign_op = assign_opcode(op)?;
    let slot = ctx.emit_variable(OpCode::LoadVar, name)?;
    compile_expr(ctx, value)?;
    ctx.code.append_op(assign_op);
    ctx.code.append_op_u8(OpCode::StoreVar, slot);
    Ok(slot)
}

// ── Operators ────────────────────────────────────────────────────────────────

fn compile_unary(ctx: &mut CompileContext, op: UnOp, operand: &Expr) -> CompileResult<()> {
    match op {
        UnOp::Not => {
            compile_expr(ctx, operand)?;
            ctx.code.append_op(OpCode::Not);
        }
        UnOp::BitNot => {
            compile_expr(ctx, operand)?;
            ctx.code.append_op(OpCode::BitNot);
        }
        UnOp::Neg => {
            ctx.emit_constant(Constant::Int(0))?;
            compile_expr(ctx, operand)?;
            ctx.code.append_op(OpCode::Sub);
        }
        UnOp::Plus => {
            return Err(CompileError::UnsupportedOperator {
                operator: op.to_string(),
                construct: "unary expression",
            })
        }
    }
    Ok(())
}

fn compile_binary(
    ctx: &mut CompileContext,
    op: BinOp,
    left: &Expr,
    right: &Expr,
) -> CompileResult<()> {
    let opcodes = binary_opcodes(op)?;
    compile_expr(ctx, left)?;
    compile_expr(ctx, right)?;
    for &opcode in opcodes {
        ctx.code.append_op(opcode);
    }
    Ok(())
}

fn binary_opcodes(op: BinOp) -> CompileResult<&'static [OpCode]> {
    let opcodes: &'static [OpCode] = match op {
        BinOp::Add => &[OpCode::Add],
        BinOp::Sub => &[OpCode::Sub],
        BinOp::Mul => &[OpCode::Mul],
        BinOp::Div => &[OpCode::Div],
        BinOp::Mod => &[OpCode::Mod],
        BinOp::Gt => &[OpCode::Gt],
        BinOp::Lt => &[OpCode::Lt],
        BinOp::Ge => &[OpCode::Gte],
        BinOp::Le => &[OpCode::Lte],
        BinOp::Eq => &[OpCode::Eq],
        BinOp::NotEq => &[OpCode::Eq, OpCode::Not],
        BinOp::Identical => &[OpCode::IdentityEq],
        BinOp::NotIdentical => &[OpCode::IdentityNe],
        BinOp::And => &[OpCode::And],
        BinOp::Or => &[OpCode::Or],
        BinOp::Concat => &[OpCode::Concat],
        BinOp::BitAnd => &[OpCode::BitAnd],
        BinOp::BitOr => &[OpCode::BitOr],
        BinOp::BitXor => &[OpCode::BitXor],
        BinOp::Shl => &[OpCode::Shl],
        BinOp::Shr => &[OpCode::Shr],
        BinOp::Pow | BinOp::Coalesce => {
            return Err(CompileError::UnsupportedOperator {
                operator: op.to_string(),
                construct: "binary expression",
            })
        }
    };
    Ok(opcodes)
}

fn assign_opcode(op: BinOp) -> CompileResult<OpCode> {
    match op {
        BinOp::Add => Ok(OpCode::AssignAdd),
        BinOp::Sub => Ok(OpCode::AssignSub),
        BinOp::Mul => Ok(OpCode::AssignMul),
        BinOp::Div => Ok(OpCode::AssignDiv),
        BinOp::Mod => Ok(OpCode::AssignMod),
        BinOp::Concat => Ok(OpCode::AssignConcat),
        other => Err(CompileError::UnsupportedOperator {
            operator: format!("{other}="),
            construct: "compound assignment",
        }),
    }
}

// ── Variables and calls ──────────────────────────────────────────────────────

fn compile_inc_dec(ctx: &mut CompileContext, op: IncDec, target: &Expr) -> CompileResult<()> {
    let construct = if op.is_prefix() {
        "prefix increment/decrement"
    } else {
        "postfix increment/decrement"
    };
    let name = variable_name(target, construct)?;
    let opcode = match op {
        IncDec::PreInc => OpCode::Inc,
        IncDec::PreDec => OpCode::Dec,
        IncDec::PostInc => OpCode::PostInc,
        IncDec::PostDec => OpCode::PostDec,
    };
    let slot = ctx.emit_variable(OpCode::LoadVar, name)?;
    ctx.code.append_op(opcode);
    ctx.code.append_op_u8(OpCode::StoreVar, slot);
    Ok(())
}

fn compile_call(ctx: &mut CompileContext, name: &str, args: &[Expr]) -> CompileResult<()> {
    let function = ctx
        .functions
        .get_function(name)
        .ok_or_else(|| CompileError::UndefinedFunction {
            name: name.to_string(),
        })?;
    if function.param_count != args.len() {
        return Err(CompileError::ArityMismatch {
            name: name.to_string(),
            expected: function.param_count,
            found: args.len(),
        });
    }
    let entry = function.entry_address;

    // Last argument first, so the callee pops them in declaration order.
    for arg in args.iter().rev() {
        compile_expr(ctx, arg)?;
    }
    // Declarations are capped at 255 parameters and arity was checked above.
    ctx.code.append_op_u8(OpCode::FuncCall, args.len() as u8);
    ctx.code.append_u16(entry);
    Ok(())
}

fn variable_name<'e>(target: &'e Expr, construct: &'static str) -> CompileResult<&'e str> {
    match target {
        Expr::Var(name) => Ok(name.as_str()),
        _ => Err(CompileError::InvalidOperand { construct }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(expr: &Expr) -> CompileResult<Vec<u8>> {
        let mut ctx = CompileContext::default();
        compile_expr(&mut ctx, expr)?;
        Ok(ctx.code.into_vec())
    }

    #[test]
    fn test_left_operand_first() {
        let code = emit(&Expr::binary(BinOp::Sub, Expr::var("a"), Expr::var("b"))).unwrap();
        assert_eq!(code, vec![0x11, 0, 0x11, 1, 0x04]);
    }

    #[test]
    fn test_negation_subtracts_from_zero() {
        let code = emit(&Expr::Unary {
            op: UnOp::Neg,
            operand: Box::new(Expr::Int(4)),
        })
        .unwrap();
        assert_eq!(code, vec![0x01, 0, 0x01, 1, 0x04]);
    }

    #[test]
    fn test_increment_requires_variable() {
        let err = emit(&Expr::IncDec {
            op: IncDec::PreInc,
            target: Box::new(Expr::Int(1)),
        })
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::InvalidOperand {
                construct: "prefix increment/decrement"
            }
        );
    }

    #[test]
    fn test_assignment_expression_reloads() {
        let code = emit(&Expr::Assign {
            target: Box::new(Expr::var("x")),
            value: Box::new(Expr::Int(7)),
        })
        .unwrap();
        assert_eq!(code, vec![0x01, 0, 0x10, 0, 0x11, 0]);
    }

    #[test]
    fn test_compound_assignment_expression() {
        let code = emit(&Expr::CompoundAssign {
            op: BinOp::Concat,
            target: Box::new(Expr::var("s")),
            value: Box::new(Expr::Str("!".into())),
        })
        .unwrap();
        assert_eq!(code, vec![0x11, 0, 0x01, 0, 0x45, 0x10, 0, 0x11, 0]);
    }

    #[test]
    fn test_call_pushes_arguments_in_reverse() {
        let mut ctx = CompileContext::default();
        ctx.functions.add_function("f", 2, 0x0102).unwrap();
        let call = Expr::Call {
            name: "f".into(),
            args: vec![Expr::Int(10), Expr::Int(20)],
        };
        compile_expr(&mut ctx, &call).unwrap();
        assert_eq!(ctx.constants.as_slice(), &[Constant::Int(20), Constant::Int(10)]);
        assert_eq!(
            ctx.code.as_slice(),
            &[0x01, 0, 0x01, 1, 0x81, 2, 0x02, 0x01]
        );
    }

    #[test]
    fn test_coalesce_is_unsupported() {
        let err = emit(&Expr::binary(BinOp::Coalesce, Expr::Null, Expr::Int(1))).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnsupportedOperator {
                operator: "??".into(),
                construct: "binary expression"
            }
        );
    }
}
