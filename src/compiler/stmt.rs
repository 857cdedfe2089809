//! Statement lowering: the control-flow part of the compiler.

use std::mem;

use tracing::{debug, trace};

use crate::ast::{Expr, FunctionDecl, Stmt, SwitchCase};
use crate::bytecode::OpCode;
use crate::constants::Constant;
use crate::context::{CompileContext, LoopKind};
use crate::error::{CompileError, CompileResult};

use super::expr::{compile_compound_assign, compile_expr};

/// Compile one statement. Statements leave the stack as they found it.
pub fn compile_stmt(ctx: &mut CompileContext, stmt: &Stmt) -> CompileResult<()> {
    trace!(
        kind = stmt.kind(),
        at = ctx.code.current_position(),
        "compile statement"
    );
    match stmt {
        Stmt::Echo(args) => {
            for arg in args {
                compile_expr(ctx, arg)?;
                ctx.code.append_op(OpCode::Print);
            }
            Ok(())
        }
        Stmt::Assign { name, value } => {
            compile_expr(ctx, value)?;
            ctx.emit_variable(OpCode::StoreVar, name).map(drop)
        }
        Stmt::CompoundAssign { name, op, value } => {
            compile_compound_assign(ctx, name, *op, value).map(drop)
        }
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            compile_expr(ctx, condition)?;
            compile_if(ctx, then_branch, else_branch.as_deref())
        }
        Stmt::While { condition, body } => compile_while(ctx, condition, body),
        Stmt::DoWhile { body, condition } => compile_do_while(ctx, body, condition),
        Stmt::For {
            init,
            condition,
            update,
            body,
        } => compile_for(ctx, init, condition.as_ref(), update, body),
        Stmt::Switch { subject, cases } => compile_switch(ctx, subject, cases),
        Stmt::Break => ctx.emit_break(),
        Stmt::Continue => ctx.emit_continue(),
        Stmt::Function(decl) => compile_function(ctx, decl),
        Stmt::Return(value) => {
            match value {
                Some(expr) => compile_expr(ctx, expr)?,
                None => ctx.emit_constant(Constant::Int(0))?,
            }
            ctx.code.append_op(OpCode::Return);
            Ok(())
        }
        Stmt::Expr(expr) => {
            compile_expr(ctx, expr)?;
            ctx.code.append_op(OpCode::Pop);
            Ok(())
        }
        Stmt::Block(stmts) => compile_block(ctx, stmts),
    }
}

fn compile_block(ctx: &mut CompileContext, stmts: &[Stmt]) -> CompileResult<()> {
    for stmt in stmts {
        compile_stmt(ctx, stmt)?;
    }
    Ok(())
}

// ── If ───────────────────────────────────────────────────────────────────────

/// Lower an `if` whose condition is already on the stack.
fn compile_if(
    ctx: &mut CompileContext,
    then_branch: &[Stmt],
    else_branch: Option<&[Stmt]>,
) -> CompileResult<()> {
    let else_jump = ctx.code.emit_jump(OpCode::JumpIfFalse);
    compile_block(ctx, then_branch)?;

    match else_branch {
        Some(else_branch) => {
            let end_jump = ctx.code.emit_jump(OpCode::Jump);
            ctx.code.patch_jump_here(else_jump, "if")?;
            compile_block(ctx, else_branch)?;
            ctx.code.patch_jump_here(end_jump, "if")
        }
        None => ctx.code.patch_jump_here(else_jump, "if"),
    }
}

// ── Loops ────────────────────────────────────────────────────────────────────

fn compile_while(
    ctx: &mut CompileContext,
    condition: &Expr,
    body: &[Stmt],
) -> CompileResult<()> {
    let loop_start = ctx.code.current_position();
    ctx.enter_loop(LoopKind::Loop);
    ctx.set_retest_address(loop_start);

    compile_expr(ctx, condition)?;
    let exit_jump = ctx.code.emit_jump(OpCode::JumpIfFalse);
    compile_block(ctx, body)?;
    ctx.code.emit_jump_to(OpCode::Jump, loop_start, "while")?;
    ctx.code.patch_jump_here(exit_jump, "while")?;

    ctx.exit_loop("while").map(drop)
}

fn compile_do_while(
    ctx: &mut CompileContext,
    body: &[Stmt],
    condition: &Expr,
) -> CompileResult<()> {
    let body_start = ctx.code.current_position();
    ctx.enter_loop(LoopKind::Loop);

    compile_block(ctx, body)?;
    let condition_at = ctx.code.current_position();
    ctx.set_retest_address(condition_at);
    compile_expr(ctx, condition)?;
    // Falls through to the back edge only while the condition holds.
    let exit_jump = ctx.code.emit_jump(OpCode::JumpIfFalse);
    ctx.code.emit_jump_to(OpCode::Jump, body_start, "do-while")?;
    ctx.code.patch_jump_here(exit_jump, "do-while")?;

    ctx.exit_loop("do-while").map(drop)
}

fn compile_for(
    ctx: &mut CompileContext,
    init: &[Expr],
    condition: Option<&Expr>,
    update: &[Expr],
    body: &[Stmt],
) -> CompileResult<()> {
    for expr in init {
        compile_expr(ctx, expr)?;
        ctx.code.append_op(OpCode::Pop);
    }

    let retest = ctx.code.current_position();
    ctx.enter_loop(LoopKind::Loop);
    match condition {
        Some(condition) => compile_expr(ctx, condition)?,
        None => ctx.emit_constant(Constant::Int(1))?,
    }
    let exit_jump = ctx.code.emit_jump(OpCode::JumpIfFalse);
    compile_block(ctx, body)?;

    let increment = ctx.code.current_position();
    ctx.set_retest_address(increment);
    for expr in update {
        compile_expr(ctx, expr)?;
        ctx.code.append_op(OpCode::Pop);
    }
    ctx.code.emit_jump_to(OpCode::Jump, retest, "for")?;
    ctx.code.patch_jump_here(exit_jump, "for")?;

    ctx.exit_loop("for").map(drop)
}

// ── Switch ───────────────────────────────────────────────────────────────────

/// Lower a `switch`.
///
/// ```text
///         <subject>; STORE_VAR s
/// test_1: LOAD_VAR s; <case 1>; EQ; JUMP_IF_FALSE test_2
///         <body 1>; JUMP body_2            ; fall-through skips test_2
/// test_2: LOAD_VAR s; <case 2>; EQ; JUMP_IF_FALSE default
/// body_2: <body 2>
/// default:<default body>
/// end:
/// ```
///
/// The default body is always emitted last, so falling out of the last
/// `case` enters it.
fn compile_switch(
    ctx: &mut CompileContext,
    subject: &Expr,
    cases: &[SwitchCase],
) -> CompileResult<()> {
    let mut default = None;
    for case in cases.iter().filter(|case| case.test.is_none()) {
        if default.replace(case).is_some() {
            return Err(CompileError::UnsupportedConstruct {
                construct: "switch with more than one default label".to_string(),
            });
        }
    }

    compile_expr(ctx, subject)?;
    let slot_name = format!("switch#{}", ctx.switch_count);
    ctx.switch_count += 1;
    let slot = ctx.emit_variable(OpCode::StoreVar, &slot_name)?;
    ctx.enter_loop(LoopKind::Switch);

    let mut next_test: Option<usize> = None;
    let mut fall_through: Option<usize> = None;
    let mut tests = cases
        .iter()
        .filter_map(|case| case.test.as_ref().map(|test| (test, &case.body)))
        .peekable();

    while let Some((test, body)) = tests.next() {
        if let Some(jump) = next_test.take() {
            ctx.code.patch_jump_here(jump, "switch")?;
        }
        ctx.code.append_op_u8(OpCode::LoadVar, slot);
        compile_expr(ctx, test)?;
        ctx.code.append_op(OpCode::Eq);
        next_test = Some(ctx.code.emit_jump(OpCode::JumpIfFalse));

        if let Some(jump) = fall_through.take() {
            ctx.code.patch_jump_here(jump, "switch")?;
        }
        compile_block(ctx, body)?;
        if tests.peek().is_some() {
            fall_through = Some(ctx.code.emit_jump(OpCode::Jump));
        }
    }

    if let Some(jump) = next_test {
        ctx.code.patch_jump_here(jump, "switch")?;
    }
    if let Some(default) = default {
        compile_block(ctx, &default.body)?;
    }

    ctx.exit_loop("switch").map(drop)
}

// ── Functions ────────────────────────────────────────────────────────────────

fn compile_function(ctx: &mut CompileContext, decl: &FunctionDecl) -> CompileResult<()> {
    if ctx.in_function {
        return Err(CompileError::UnsupportedConstruct {
            construct: format!("function {}() declared inside another function", decl.name),
        });
    }
    let argc = u8::try_from(decl.params.len()).map_err(|_| {
        CompileError::UnsupportedConstruct {
            construct: format!("function {}() with more than 255 parameters", decl.name),
        }
    })?;

    let skip_jump = ctx.code.emit_jump(OpCode::Jump);
    let entry = ctx.code.current_position();
    let entry_address =
        u16::try_from(entry).map_err(|_| CompileError::AddressOutOfRange {
            name: decl.name.clone(),
            address: entry,
        })?;
    // Registered before the body so the function can call itself.
    ctx.functions
        .add_function(&decl.name, decl.params.len(), entry_address)?;
    debug!(name = %decl.name, entry, params = argc, "registered function");

    ctx.code.append_op_u8(OpCode::FuncDecl, argc);
    for param in &decl.params {
        let slot = ctx.variables.get_index(param)?;
        ctx.code.append(slot);
    }

    // Loops around the declaration are not targets for the body.
    let outer_loops = mem::take(&mut ctx.loops);
    ctx.in_function = true;
    let body = compile_block(ctx, &decl.body);
    ctx.in_function = false;
    ctx.loops = outer_loops;
    body?;

    ctx.code.append_op(OpCode::ExitFunc);
    ctx.code.patch_jump_here(skip_jump, "function declaration")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, IncDec};

    fn emit(stmts: &[Stmt]) -> CompileResult<CompileContext> {
        let mut ctx = CompileContext::default();
        for stmt in stmts {
            compile_stmt(&mut ctx, stmt)?;
        }
        Ok(ctx)
    }

    #[test]
    fn test_do_while_layout() {
        let ctx = emit(&[Stmt::DoWhile {
            body: vec![Stmt::Continue],
            condition: Expr::Bool(false),
        }])
        .unwrap();
        // 0: JUMP (continue) -> 3
        // 3: LOAD_CONST 0
        // 5: JUMP_IF_FALSE -> 11
        // 8: JUMP -> 0
        assert_eq!(
            ctx.code.as_slice(),
            &[0x21, 0, 0, 0x01, 0, 0x20, 3, 0, 0x21, 0xF5, 0xFF]
        );
    }

    #[test]
    fn test_for_continue_targets_increment() {
        let ctx = emit(&[Stmt::For {
            init: vec![],
            condition: None,
            update: vec![Expr::IncDec {
                op: IncDec::PostInc,
                target: Box::new(Expr::var("i")),
            }],
            body: vec![Stmt::Continue],
        }])
        .unwrap();
        // 0: LOAD_CONST 1; 2: JUMP_IF_FALSE; 5: JUMP (continue); 8: increment
        assert_eq!(ctx.code.read_i16(6), Some(0));
        assert_eq!(ctx.code.as_slice()[8], OpCode::LoadVar as u8);
    }

    #[test]
    fn test_switch_cases_compare_stored_subject() {
        let ctx = emit(&[Stmt::Switch {
            subject: Expr::Int(2),
            cases: vec![
                SwitchCase {
                    test: Some(Expr::Int(1)),
                    body: vec![],
                },
                SwitchCase {
                    test: Some(Expr::Int(2)),
                    body: vec![Stmt::Break],
                },
            ],
        }])
        .unwrap();
        assert_eq!(ctx.variables.names(), ["switch#0"]);
        let code = ctx.code.as_slice();
        // subject, STORE_VAR 0, then the first test reloads slot 0.
        assert_eq!(&code[..6], &[0x01, 0, 0x10, 0, 0x11, 0]);
        assert!(ctx.loops.is_empty());
        assert_eq!(ctx.switch_count, 1);
    }

    #[test]
    fn test_sibling_and_nested_switches_get_distinct_slots() {
        let switch = |body: Vec<Stmt>| Stmt::Switch {
            subject: Expr::Int(1),
            cases: vec![SwitchCase {
                test: Some(Expr::Int(1)),
                body,
            }],
        };
        let ctx = emit(&[switch(vec![switch(vec![])]), switch(vec![])]).unwrap();
        assert_eq!(ctx.variables.names(), ["switch#0", "switch#1", "switch#2"]);
    }

    #[test]
    fn test_switch_rejects_two_defaults() {
        let err = emit(&[Stmt::Switch {
            subject: Expr::Int(1),
            cases: vec![
                SwitchCase {
                    test: None,
                    body: vec![],
                },
                SwitchCase {
                    test: None,
                    body: vec![],
                },
            ],
        }])
        .err()
        .unwrap();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_return_without_value_pushes_zero() {
        let ctx = emit(&[Stmt::Return(None)]).unwrap();
        assert_eq!(ctx.code.as_slice(), &[0x01, 0, 0x83]);
        assert_eq!(ctx.constants.as_slice(), &[Constant::Int(0)]);
    }

    #[test]
    fn test_function_entry_past_u16_is_rejected() {
        let mut ctx = CompileContext::default();
        for _ in 0..=usize::from(u16::MAX) {
            ctx.code.append_op(OpCode::Pop);
        }
        let err = compile_function(
            &mut ctx,
            &FunctionDecl {
                name: "far".into(),
                params: vec![],
                body: vec![],
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::AddressOutOfRange {
                name: "far".into(),
                address: 65_539,
            }
        );
        assert!(ctx.functions.get_function("far").is_none());
    }

    #[test]
    fn test_function_skip_jump_lands_after_exit() {
        let ctx = emit(&[Stmt::Function(FunctionDecl {
            name: "f".into(),
            params: vec!["a".into(), "b".into()],
            body: vec![Stmt::Echo(vec![Expr::binary(
                BinOp::Add,
                Expr::var("a"),
                Expr::var("b"),
            )])],
        })])
        .unwrap();
        let code = ctx.code.as_slice();
        assert_eq!(&code[3..6], &[0x80, 2, 0]);
        assert_eq!(code[6], 1);
        assert_eq!(*code.last().unwrap(), OpCode::ExitFunc as u8);
        assert_eq!(ctx.code.read_i16(1), Some(code.len() as i16 - 3));
        assert_eq!(ctx.functions.get_function("f").unwrap().entry_address, 3);
    }
}
