//! Source text to syntax tree.
//!
//! Tokenizing and statement structure come from the pest grammar in
//! `grammar.pest`; operator precedence is resolved by a [`PrattParser`].

use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;

use crate::ast::*;

#[derive(pest_derive::Parser)]
#[grammar = "grammar.pest"]
pub struct PhpParser;

lazy_static::lazy_static! {
    static ref PRATT_PARSER: PrattParser<Rule> = {
        use Rule::*;
        // Lowest precedence first.
        PrattParser::new()
            .op(Op::infix(word_or, Assoc::Left))
            .op(Op::infix(word_and, Assoc::Left))
            .op(Op::infix(assign, Assoc::Right)
                | Op::infix(add_assign, Assoc::Right)
                | Op::infix(sub_assign, Assoc::Right)
                | Op::infix(mul_assign, Assoc::Right)
                | Op::infix(div_assign, Assoc::Right)
                | Op::infix(mod_assign, Assoc::Right)
                | Op::infix(concat_assign, Assoc::Right)
                | Op::infix(and_assign, Assoc::Right)
                | Op::infix(or_assign, Assoc::Right)
                | Op::infix(xor_assign, Assoc::Right)
                | Op::infix(shl_assign, Assoc::Right)
                | Op::infix(shr_assign, Assoc::Right)
                | Op::infix(pow_assign, Assoc::Right)
                | Op::infix(coalesce_assign, Assoc::Right))
            .op(Op::infix(coalesce, Assoc::Right))
            .op(Op::infix(log_or, Assoc::Left))
            .op(Op::infix(log_and, Assoc::Left))
            .op(Op::infix(bit_or, Assoc::Left))
            .op(Op::infix(bit_xor, Assoc::Left))
            .op(Op::infix(bit_and, Assoc::Left))
            .op(Op::infix(eq, Assoc::Left)
                | Op::infix(neq, Assoc::Left)
                | Op::infix(identical, Assoc::Left)
                | Op::infix(not_identical, Assoc::Left))
            .op(Op::infix(lt, Assoc::Left)
                | Op::infix(gt, Assoc::Left)
                | Op::infix(le, Assoc::Left)
                | Op::infix(ge, Assoc::Left))
            .op(Op::infix(shl, Assoc::Left) | Op::infix(shr, Assoc::Left))
            .op(Op::infix(add, Assoc::Left)
                | Op::infix(sub, Assoc::Left)
                | Op::infix(concat, Assoc::Left))
            .op(Op::infix(mul, Assoc::Left)
                | Op::infix(div, Assoc::Left)
                | Op::infix(modulo, Assoc::Left))
            .op(Op::infix(pow, Assoc::Right))
            .op(Op::prefix(not)
                | Op::prefix(bit_not)
                | Op::prefix(neg)
                | Op::prefix(plus)
                | Op::prefix(pre_inc)
                | Op::prefix(pre_dec))
            .op(Op::postfix(post_inc) | Op::postfix(post_dec))
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The input does not match the grammar.
    #[error("syntax error:\n{0}")]
    Syntax(Box<pest::error::Error<Rule>>),

    /// An integer literal that does not fit in 64 bits.
    #[error("integer literal out of range: {0}")]
    IntegerOverflow(String),

    /// A parse tree shape the grammar should have ruled out.
    #[error("malformed {0}")]
    Malformed(&'static str),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::Syntax(Box::new(err))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a whole program. A leading `<?php` tag is optional.
pub fn parse(input: &str) -> ParseResult<Vec<Stmt>> {
    let mut pairs = PhpParser::parse(Rule::program, input)?;
    let program = pairs.next().ok_or(ParseError::Malformed("program"))?;
    let mut stmts = Vec::new();
    for pair in program.into_inner() {
        if pair.as_rule() == Rule::EOI {
            break;
        }
        push_stmt(&mut stmts, pair)?;
    }
    Ok(stmts)
}

/// Parse one statement pair into `out`. Empty statements add nothing.
fn push_stmt(out: &mut Vec<Stmt>, pair: Pair<Rule>) -> ParseResult<()> {
    if pair.as_rule() != Rule::empty_stmt {
        out.push(parse_stmt(pair)?);
    }
    Ok(())
}

fn parse_stmt(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let rule = pair.as_rule();
    let mut inner = children(pair);
    match rule {
        Rule::echo_stmt | Rule::print_stmt => {
            let args = inner.map(parse_expr).collect::<ParseResult<_>>()?;
            Ok(Stmt::Echo(args))
        }
        Rule::if_stmt => parse_if(inner),
        Rule::while_stmt => {
            let condition = parse_expr(expect(&mut inner, "while condition")?)?;
            let body = parse_body(expect(&mut inner, "while body")?)?;
            Ok(Stmt::While { condition, body })
        }
        Rule::do_while_stmt => {
            let body = parse_body(expect(&mut inner, "do-while body")?)?;
            let condition = parse_expr(expect(&mut inner, "do-while condition")?)?;
            Ok(Stmt::DoWhile { body, condition })
        }
        Rule::for_stmt => {
            let init = parse_expr_list(expect(&mut inner, "for init")?)?;
            let condition = expect(&mut inner, "for condition")?
                .into_inner()
                .next()
                .map(parse_expr)
                .transpose()?;
            let update = parse_expr_list(expect(&mut inner, "for update")?)?;
            let body = parse_body(expect(&mut inner, "for body")?)?;
            Ok(Stmt::For {
                init,
                condition,
                update,
                body,
            })
        }
        Rule::switch_stmt => {
            let subject = parse_expr(expect(&mut inner, "switch subject")?)?;
            let cases = inner.map(parse_switch_case).collect::<ParseResult<_>>()?;
            Ok(Stmt::Switch { subject, cases })
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::function_decl => {
            let name = expect(&mut inner, "function name")?.as_str().to_string();
            let params = expect(&mut inner, "parameter list")?
                .into_inner()
                .map(variable_name)
                .collect::<ParseResult<_>>()?;
            let body = parse_block(expect(&mut inner, "function body")?)?;
            Ok(Stmt::Function(FunctionDecl { name, params, body }))
        }
        Rule::return_stmt => Ok(Stmt::Return(inner.next().map(parse_expr).transpose()?)),
        Rule::block => Ok(Stmt::Block(parse_statements(inner)?)),
        Rule::expr_stmt => {
            let expr = parse_expr(expect(&mut inner, "expression statement")?)?;
            Ok(expression_statement(expr))
        }
        _ => Err(ParseError::Malformed("statement")),
    }
}

/// Top-level assignments to a plain variable become assignment statements.
fn expression_statement(expr: Expr) -> Stmt {
    match expr {
        Expr::Assign { target, value } => match *target {
            Expr::Var(name) => Stmt::Assign {
                name,
                value: *value,
            },
            target => Stmt::Expr(Expr::Assign {
                target: Box::new(target),
                value,
            }),
        },
        Expr::CompoundAssign { op, target, value } => match *target {
            Expr::Var(name) => Stmt::CompoundAssign {
                name,
                op,
                value: *value,
            },
            target => Stmt::Expr(Expr::CompoundAssign {
                op,
                target: Box::new(target),
                value,
            }),
        },
        other => Stmt::Expr(other),
    }
}

/// `if` with any `elseif` clauses folded into nested `else { if … }`.
fn parse_if<'i>(mut inner: impl Iterator<Item = Pair<'i, Rule>>) -> ParseResult<Stmt> {
    let condition = parse_expr(expect(&mut inner, "if condition")?)?;
    let then_branch = parse_body(expect(&mut inner, "if body")?)?;

    let mut elseifs = Vec::new();
    let mut else_branch = None;
    for clause in inner {
        match clause.as_rule() {
            Rule::elseif_clause => {
                let mut parts = children(clause);
                let condition = parse_expr(expect(&mut parts, "elseif condition")?)?;
                let body = parse_body(expect(&mut parts, "elseif body")?)?;
                elseifs.push((condition, body));
            }
            Rule::else_clause => {
                let body = expect(&mut children(clause), "else body")?;
                else_branch = Some(parse_body(body)?);
            }
            _ => return Err(ParseError::Malformed("if statement")),
        }
    }

    for (condition, body) in elseifs.into_iter().rev() {
        else_branch = Some(vec![Stmt::If {
            condition,
            then_branch: body,
            else_branch,
        }]);
    }
    Ok(Stmt::If {
        condition,
        then_branch,
        else_branch,
    })
}

fn parse_switch_case(pair: Pair<Rule>) -> ParseResult<SwitchCase> {
    let mut inner = pair.into_inner();
    let label = expect(&mut inner, "case label")?;
    let test = match label.as_rule() {
        Rule::case_label => Some(parse_expr(expect(&mut children(label), "case value")?)?),
        _ => None,
    };
    let body = parse_statements(inner)?;
    Ok(SwitchCase { test, body })
}

/// A loop or branch body: a braced block or a single statement.
fn parse_body(pair: Pair<Rule>) -> ParseResult<Vec<Stmt>> {
    match pair.as_rule() {
        Rule::block => parse_block(pair),
        _ => {
            let mut stmts = Vec::new();
            push_stmt(&mut stmts, pair)?;
            Ok(stmts)
        }
    }
}

fn parse_block(pair: Pair<Rule>) -> ParseResult<Vec<Stmt>> {
    parse_statements(pair.into_inner())
}

fn parse_statements<'i>(pairs: impl Iterator<Item = Pair<'i, Rule>>) -> ParseResult<Vec<Stmt>> {
    let mut stmts = Vec::new();
    for pair in pairs {
        push_stmt(&mut stmts, pair)?;
    }
    Ok(stmts)
}

fn parse_expr_list(pair: Pair<Rule>) -> ParseResult<Vec<Expr>> {
    pair.into_inner().map(parse_expr).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────────────────

fn parse_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    PRATT_PARSER
        .map_primary(parse_primary)
        .map_prefix(|op, operand| {
            let operand = Box::new(operand?);
            let expr = match op.as_rule() {
                Rule::not => Expr::Unary {
                    op: UnOp::Not,
                    operand,
                },
                Rule::bit_not => Expr::Unary {
                    op: UnOp::BitNot,
                    operand,
                },
                Rule::neg => Expr::Unary {
                    op: UnOp::Neg,
                    operand,
                },
                Rule::plus => Expr::Unary {
                    op: UnOp::Plus,
                    operand,
                },
                Rule::pre_inc => Expr::IncDec {
                    op: IncDec::PreInc,
                    target: operand,
                },
                Rule::pre_dec => Expr::IncDec {
                    op: IncDec::PreDec,
                    target: operand,
                },
                _ => return Err(ParseError::Malformed("prefix operator")),
            };
            Ok(expr)
        })
        .map_postfix(|target, op| {
            let target = Box::new(target?);
            let op = match op.as_rule() {
                Rule::post_inc => IncDec::PostInc,
                Rule::post_dec => IncDec::PostDec,
                _ => return Err(ParseError::Malformed("postfix operator")),
            };
            Ok(Expr::IncDec { op, target })
        })
        .map_infix(|lhs, op, rhs| {
            let lhs = Box::new(lhs?);
            let rhs = Box::new(rhs?);
            if op.as_rule() == Rule::assign {
                return Ok(Expr::Assign {
                    target: lhs,
                    value: rhs,
                });
            }
            if let Some(op) = compound_operator(op.as_rule()) {
                return Ok(Expr::CompoundAssign {
                    op,
                    target: lhs,
                    value: rhs,
                });
            }
            let op = binary_operator(op.as_rule()).ok_or(ParseError::Malformed("operator"))?;
            Ok(Expr::Binary {
                op,
                left: lhs,
                right: rhs,
            })
        })
        .parse(pair.into_inner())
}

fn binary_operator(rule: Rule) -> Option<BinOp> {
    let op = match rule {
        Rule::word_or | Rule::log_or => BinOp::Or,
        Rule::word_and | Rule::log_and => BinOp::And,
        Rule::coalesce => BinOp::Coalesce,
        Rule::bit_or => BinOp::BitOr,
        Rule::bit_xor => BinOp::BitXor,
        Rule::bit_and => BinOp::BitAnd,
        Rule::eq => BinOp::Eq,
        Rule::neq => BinOp::NotEq,
        Rule::identical => BinOp::Identical,
        Rule::not_identical => BinOp::NotIdentical,
        Rule::lt => BinOp::Lt,
        Rule::gt => BinOp::Gt,
        Rule::le => BinOp::Le,
        Rule::ge => BinOp::Ge,
        Rule::shl => BinOp::Shl,
        Rule::shr => BinOp::Shr,
        Rule::add => BinOp::Add,
        Rule::sub => BinOp::Sub,
        Rule::concat => BinOp::Concat,
        Rule::mul => BinOp::Mul,
        Rule::div => BinOp::Div,
        Rule::modulo => BinOp::Mod,
        Rule::pow => BinOp::Pow,
        _ => return None,
    };
    Some(op)
}

fn compound_operator(rule: Rule) -> Option<BinOp> {
    let op = match rule {
        Rule::add_assign => BinOp::Add,
        Rule::sub_assign => BinOp::Sub,
        Rule::mul_assign => BinOp::Mul,
        Rule::div_assign => BinOp::Div,
        Rule::mod_assign => BinOp::Mod,
        Rule::concat_assign => BinOp::Concat,
        Rule::and_assign => BinOp::BitAnd,
        Rule::or_assign => BinOp::BitOr,
        Rule::xor_assign => BinOp::BitXor,
        Rule::shl_assign => BinOp::Shl,
        Rule::shr_assign => BinOp::Shr,
        Rule::pow_assign => BinOp::Pow,
        Rule::coalesce_assign => BinOp::Coalesce,
        _ => return None,
    };
    Some(op)
}

fn parse_primary(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::int => pair
            .as_str()
            .parse()
            .map(Expr::Int)
            .map_err(|_| ParseError::IntegerOverflow(pair.as_str().to_string())),
        Rule::boolean => Ok(Expr::Bool(pair.as_str().eq_ignore_ascii_case("true"))),
        Rule::null => Ok(Expr::Null),
        Rule::string => {
            let inner = pair.into_inner().next().ok_or(ParseError::Malformed("string"))?;
            let text = match inner.as_rule() {
                Rule::dq_inner => unescape_double(inner.as_str()),
                _ => unescape_single(inner.as_str()),
            };
            Ok(Expr::Str(text))
        }
        Rule::variable => Ok(Expr::Var(variable_name(pair)?)),
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = expect(&mut inner, "function name")?.as_str().to_string();
            let args = inner.map(parse_expr).collect::<ParseResult<_>>()?;
            Ok(Expr::Call { name, args })
        }
        Rule::expr => parse_expr(pair),
        _ => Err(ParseError::Malformed("expression")),
    }
}

fn variable_name(pair: Pair<Rule>) -> ParseResult<String> {
    pair.into_inner()
        .next()
        .map(|name| name.as_str().to_string())
        .ok_or(ParseError::Malformed("variable"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Inner pairs of `pair` without the keyword tokens.
fn children<'i>(pair: Pair<'i, Rule>) -> impl Iterator<Item = Pair<'i, Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_echo
            | Rule::kw_print
            | Rule::kw_if
            | Rule::kw_elseif
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_do
            | Rule::kw_for
            | Rule::kw_switch
            | Rule::kw_case
            | Rule::kw_default
            | Rule::kw_break
            | Rule::kw_continue
            | Rule::kw_function
            | Rule::kw_return
    )
}

fn expect<'i>(
    pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
    what: &'static str,
) -> ParseResult<Pair<'i, Rule>> {
    pairs.next().ok_or(ParseError::Malformed(what))
}

/// Resolve `\n \t \r \v \e \f \0 \\ \$ \"`; other escapes keep their backslash.
fn unescape_double(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('v') => out.push('\x0B'),
            Some('e') => out.push('\x1B'),
            Some('f') => out.push('\x0C'),
            Some('0') => out.push('\0'),
            Some(c @ ('\\' | '$' | '"')) => out.push(c),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Single-quoted strings only resolve `\'` and `\\`.
fn unescape_single(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('\\', Some(&next @ ('\'' | '\\'))) => {
                out.push(next);
                chars.next();
            }
            _ => out.push(c),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> Stmt {
        let mut stmts = parse(src).expect("parse error");
        assert_eq!(stmts.len(), 1, "expected one statement: {stmts:?}");
        stmts.remove(0)
    }

    fn parse_echo_expr(src: &str) -> Expr {
        match parse_one(&format!("echo {src};")) {
            Stmt::Echo(mut args) => args.remove(0),
            other => panic!("expected echo, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_open_tag_and_comments() {
        let stmts = parse("<?php\n// line\n# hash\n/* block */ echo 1;\n").unwrap();
        assert_eq!(stmts, vec![Stmt::Echo(vec![Expr::Int(1)])]);
    }

    #[test]
    fn test_parse_precedence() {
        assert_eq!(
            parse_echo_expr("1 + 2 * 3"),
            Expr::binary(
                BinOp::Add,
                Expr::Int(1),
                Expr::binary(BinOp::Mul, Expr::Int(2), Expr::Int(3))
            )
        );
        assert_eq!(
            parse_echo_expr("1 < 2 == true"),
            Expr::binary(
                BinOp::Eq,
                Expr::binary(BinOp::Lt, Expr::Int(1), Expr::Int(2)),
                Expr::Bool(true)
            )
        );
        assert_eq!(
            parse_echo_expr("\"a\" . 1 + 2"),
            Expr::binary(
                BinOp::Add,
                Expr::binary(BinOp::Concat, Expr::Str("a".into()), Expr::Int(1)),
                Expr::Int(2)
            )
        );
    }

    #[test]
    fn test_parse_assignment_is_right_associative() {
        let stmt = parse_one("$a = $b = 3;");
        assert_eq!(
            stmt,
            Stmt::Assign {
                name: "a".into(),
                value: Expr::Assign {
                    target: Box::new(Expr::var("b")),
                    value: Box::new(Expr::Int(3)),
                },
            }
        );
    }

    #[test]
    fn test_parse_compound_assignment() {
        assert_eq!(
            parse_one("$s .= 'x';"),
            Stmt::CompoundAssign {
                name: "s".into(),
                op: BinOp::Concat,
                value: Expr::Str("x".into()),
            }
        );
    }

    #[test]
    fn test_parse_increment_forms() {
        assert_eq!(
            parse_one("$i++;"),
            Stmt::Expr(Expr::IncDec {
                op: IncDec::PostInc,
                target: Box::new(Expr::var("i")),
            })
        );
        assert_eq!(
            parse_echo_expr("--$i"),
            Expr::IncDec {
                op: IncDec::PreDec,
                target: Box::new(Expr::var("i")),
            }
        );
        assert_eq!(
            parse_echo_expr("$a - -1"),
            Expr::binary(
                BinOp::Sub,
                Expr::var("a"),
                Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(Expr::Int(1)),
                }
            )
        );
    }

    #[test]
    fn test_parse_elseif_nests() {
        let stmt = parse_one("if ($a) { echo 1; } elseif ($b) { echo 2; } else echo 3;");
        let Stmt::If { else_branch, .. } = stmt else {
            panic!("expected if");
        };
        let else_branch = else_branch.unwrap();
        assert!(matches!(
            &else_branch[..],
            [Stmt::If { else_branch: Some(inner), .. }] if inner.len() == 1
        ));
    }

    #[test]
    fn test_parse_for_with_lists() {
        let stmt = parse_one("for ($i = 0, $j = 1; ; $i++, $j--) {}");
        let Stmt::For {
            init,
            condition,
            update,
            body,
        } = stmt
        else {
            panic!("expected for");
        };
        assert_eq!(init.len(), 2);
        assert_eq!(condition, None);
        assert_eq!(update.len(), 2);
        assert!(body.is_empty());
    }

    #[test]
    fn test_parse_switch() {
        let stmt = parse_one("switch ($x) { case 1: echo 1; case 2: break; default: echo 0; }");
        let Stmt::Switch { cases, .. } = stmt else {
            panic!("expected switch");
        };
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].test, Some(Expr::Int(1)));
        assert_eq!(cases[1].body, vec![Stmt::Break]);
        assert_eq!(cases[2].test, None);
    }

    #[test]
    fn test_parse_function_and_call() {
        let stmts = parse("function add($a, $b) { return $a + $b; } echo add(1, 2);").unwrap();
        assert_eq!(
            stmts[0],
            Stmt::Function(FunctionDecl {
                name: "add".into(),
                params: vec!["a".into(), "b".into()],
                body: vec![Stmt::Return(Some(Expr::binary(
                    BinOp::Add,
                    Expr::var("a"),
                    Expr::var("b")
                )))],
            })
        );
        assert_eq!(
            stmts[1],
            Stmt::Echo(vec![Expr::Call {
                name: "add".into(),
                args: vec![Expr::Int(1), Expr::Int(2)],
            }])
        );
    }

    #[test]
    fn test_parse_string_escapes() {
        assert_eq!(
            parse_echo_expr(r#""a\n\t\"\\\q""#),
            Expr::Str("a\n\t\"\\\\q".into())
        );
        assert_eq!(parse_echo_expr(r"'it\'s \n'"), Expr::Str("it's \\n".into()));
    }

    #[test]
    fn test_parse_keywords_are_case_insensitive() {
        let stmts = parse("ECHO TRUE; Echo Null;").unwrap();
        assert_eq!(
            stmts,
            vec![
                Stmt::Echo(vec![Expr::Bool(true)]),
                Stmt::Echo(vec![Expr::Null]),
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("echo 1"), Err(ParseError::Syntax(_))));
        assert!(matches!(
            parse("echo 99999999999999999999;"),
            Err(ParseError::IntegerOverflow(_))
        ));
    }
}
