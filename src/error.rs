//! Compile-time error taxonomy.
//!
//! Every error is fatal to the current compilation: the compiler methods
//! propagate them upward unchanged with `?`, and the partially filled
//! bytecode buffer is dropped rather than handed to the VM.

/// A compile-time error.
///
/// Variants carry the construct or identifier needed to localize the failure
/// in the source program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    /// A statement or expression form the compiler has no lowering for.
    #[error("unsupported construct: {construct}")]
    UnsupportedConstruct { construct: String },

    /// A unary or binary operator with no bytecode mapping.
    #[error("unsupported operator `{operator}` in {construct}")]
    UnsupportedOperator {
        operator: String,
        construct: &'static str,
    },

    /// An operand of the wrong shape, e.g. `++` applied to a non-variable.
    #[error("invalid operand for {construct}: expected a variable")]
    InvalidOperand { construct: &'static str },

    /// A call to a function that has not been declared (yet).
    #[error("undefined function: {name}()")]
    UndefinedFunction { name: String },

    /// A second declaration of an already-declared function.
    #[error("cannot redeclare function {name}()")]
    DuplicateFunction { name: String },

    /// A call whose argument count disagrees with the declaration.
    #[error("function {name}() requires {expected} argument(s), {found} given")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    /// `break` with no enclosing loop or switch.
    #[error("'break' not in the 'loop' or 'switch' context")]
    BreakOutsideLoop,

    /// `continue` with no enclosing loop.
    #[error("'continue' not in the 'loop' context")]
    ContinueOutsideLoop,

    /// A patch request past the end of the buffer. This is a compiler bug and
    /// never results from well-formed input.
    #[error("internal error: patch at {position} out of bounds (buffer length {len})")]
    PatchOutOfBounds { position: usize, len: usize },

    /// More distinct constants than a one-byte operand can index.
    #[error("constant pool overflow: more than {limit} distinct constants")]
    ConstantPoolOverflow { limit: usize },

    /// More distinct variables than a one-byte operand can index.
    #[error("too many variables: more than {limit} distinct names (at ${name})")]
    TooManyVariables { name: String, limit: usize },

    /// A relative jump that does not fit the signed 16-bit operand.
    #[error("jump in {construct} out of range: offset {offset}")]
    JumpOutOfRange {
        construct: &'static str,
        offset: i64,
    },

    /// A function entry address that does not fit the 16-bit call operand.
    #[error("function {name}() entry address {address} exceeds the 16-bit address space")]
    AddressOutOfRange { name: String, address: usize },
}

/// Shorthand result type for the compiler.
pub type CompileResult<T> = Result<T, CompileError>;
