//! Syntax tree for the PHP subset.
//!
//! The tree is the output of the parser and the input to the compiler, which
//! matches on every variant exhaustively.
//!
//! All strings are owned; variable names are stored without the leading `$`.

use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `echo a, b;` / `print a;`
    Echo(Vec<Expr>),
    /// `$name = value;`
    Assign { name: String, value: Expr },
    /// `$name op= value;`
    CompoundAssign { name: String, op: BinOp, value: Expr },
    /// `if (cond) { … } else { … }`; `elseif` nests another `If` in `else_branch`.
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While { condition: Expr, body: Vec<Stmt> },
    DoWhile { body: Vec<Stmt>, condition: Expr },
    /// `for (init; condition; update) { … }`. An absent condition is always true.
    For {
        init: Vec<Expr>,
        condition: Option<Expr>,
        update: Vec<Expr>,
        body: Vec<Stmt>,
    },
    Switch { subject: Expr, cases: Vec<SwitchCase> },
    Break,
    Continue,
    Function(FunctionDecl),
    Return(Option<Expr>),
    /// An expression evaluated for its side effects.
    Expr(Expr),
    /// `{ … }`
    Block(Vec<Stmt>),
}

impl Stmt {
    /// Short name used in diagnostics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Stmt::Echo(_) => "echo",
            Stmt::Assign { .. } => "assignment",
            Stmt::CompoundAssign { .. } => "compound assignment",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::DoWhile { .. } => "do-while",
            Stmt::For { .. } => "for",
            Stmt::Switch { .. } => "switch",
            Stmt::Break => "break",
            Stmt::Continue => "continue",
            Stmt::Function(_) => "function",
            Stmt::Return(_) => "return",
            Stmt::Expr(_) => "expression statement",
            Stmt::Block(_) => "block",
        }
    }
}

/// One arm of a `switch`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for `default:`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// `function name($a, $b) { … }`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Expressions
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
    /// `$name`
    Var(String),
    Unary { op: UnOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `++$x`, `$x--`, …
    IncDec { op: IncDec, target: Box<Expr> },
    /// `name(args…)`
    Call { name: String, args: Vec<Expr> },
    /// `target = value` used as an expression.
    Assign { target: Box<Expr>, value: Box<Expr> },
    /// `target op= value` used as an expression.
    CompoundAssign {
        op: BinOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

impl Expr {
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operators
// ─────────────────────────────────────────────────────────────────────────────

/// Binary operators, in PHP precedence groups (lowest first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // `or` / `||`
    Or,
    // `and` / `&&`
    And,
    BitOr,
    BitXor,
    BitAnd,
    // Equality
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    // Comparison
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
    Pow,
    Coalesce,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
            BinOp::Identical => "===",
            BinOp::NotIdentical => "!==",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Concat => ".",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Coalesce => "??",
        };
        f.write_str(s)
    }
}

/// Prefix unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// `!x`
    Not,
    /// `~x`
    BitNot,
    /// `-x`
    Neg,
    /// `+x`
    Plus,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Not => write!(f, "!"),
            UnOp::BitNot => write!(f, "~"),
            UnOp::Neg => write!(f, "-"),
            UnOp::Plus => write!(f, "+"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDec {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl IncDec {
    pub fn is_prefix(self) -> bool {
        matches!(self, IncDec::PreInc | IncDec::PreDec)
    }
}
