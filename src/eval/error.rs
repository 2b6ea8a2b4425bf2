use std::fmt;

use derive_more::Display;

use super::value::{ValueId, ValueKind};

/// Everything that can go wrong while evaluating. The first five are the
/// core taxonomy, the rest are raised by operators and builtins.
#[derive(Debug, Clone, PartialEq, Display)]
pub enum EvalErrorKind {
    #[display(fmt = "name '{}' is not defined", _0)]
    UnboundName(String),
    #[display(fmt = "{}", _0)]
    UnpackArity(ArityMismatch),
    #[display(fmt = "multiple starred expressions in assignment")]
    MultipleStarTargets,
    #[display(fmt = "'{}' object does not support in-place mutation", _0)]
    ImmutableTarget(ValueKind),
    #[display(fmt = "access through reclaimed value {}", _0)]
    UseAfterFree(ValueId),

    #[display(fmt = "unsupported operand kind(s) for {}: {}", op, kinds)]
    TypeMismatch { op: &'static str, kinds: String },
    #[display(fmt = "'{}' object is not iterable", _0)]
    NotIterable(ValueKind),
    #[display(fmt = "'{}' object is not subscriptable", _0)]
    NotIndexable(ValueKind),
    #[display(fmt = "{} index {} out of range (length {})", kind, index, len)]
    IndexOutOfRange { kind: ValueKind, index: i64, len: usize },
    #[display(fmt = "key {} not found", _0)]
    KeyNotFound(String),
    #[display(fmt = "unhashable kind: '{}'", _0)]
    UnhashableKey(ValueKind),
    #[display(fmt = "division by zero")]
    DivisionByZero,
    #[display(fmt = "integer overflow in {}", _0)]
    ArithmeticOverflow(&'static str),
    #[display(fmt = "maximum nesting depth {} exceeded", _0)]
    RecursionLimit(usize),
    #[display(fmt = "'{}' outside loop", _0)]
    ControlFlowOutsideLoop(&'static str),
    #[display(fmt = "no binding for nonlocal '{}' found", _0)]
    NoNonlocalBinding(String),
    #[display(fmt = "{}", _0)]
    InvalidArgument(String),
    #[display(fmt = "invalid target: {}", _0)]
    InvalidTarget(&'static str),
    #[display(fmt = "snapshot error: {}", _0)]
    Serialization(String),
}

/// Source/target count mismatch of a sequence assignment. With a starred
/// target `expected` is the minimum number of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArityMismatch {
    pub expected: usize,
    pub got: usize,
    pub starred: bool,
}

impl fmt::Display for ArityMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.starred {
            write!(f, "not enough values to unpack (expected at least {}, got {})", self.expected, self.got)
        } else if self.got > self.expected {
            write!(f, "too many values to unpack (expected {})", self.expected)
        } else {
            write!(f, "not enough values to unpack (expected {}, got {})", self.expected, self.got)
        }
    }
}

/// Represents an error that surfaced while evaluating a program. Besides the
/// kind it records the path of statement indices (outermost block first)
/// that was executing when the error was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub(crate) kind: EvalErrorKind,
    pub(crate) position: Vec<usize>,
}

pub type EvalResult<T> = Result<T, EvalError>;

impl EvalError {
    pub fn kind(&self) -> &EvalErrorKind {
        &self.kind
    }

    /// Statement indices from the outermost block inwards. Empty if the error
    /// was raised outside of statement execution (e.g. directly on a store).
    pub fn position(&self) -> &[usize] {
        &self.position
    }

    pub(crate) fn at_statement(mut self, index: usize) -> Self {
        self.position.insert(0, index);
        self
    }

    pub(crate) fn unbound_name(name: &str) -> Self {
        EvalErrorKind::UnboundName(name.to_string()).into()
    }

    pub(crate) fn type_mismatch(op: &'static str, lhs: ValueKind, rhs: Option<ValueKind>) -> Self {
        let kinds = match rhs {
            Some(rhs) => format!("'{}' and '{}'", lhs, rhs),
            None => format!("'{}'", lhs),
        };
        EvalErrorKind::TypeMismatch{ op, kinds }.into()
    }
}

impl From<EvalErrorKind> for EvalError {
    fn from(kind: EvalErrorKind) -> Self {
        Self{ kind, position: Vec::new() }
    }
}

impl From<bincode::Error> for EvalError {
    fn from(err: bincode::Error) -> Self {
        EvalErrorKind::Serialization(err.to_string()).into()
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.position.is_empty() {
            write!(f, " (at statement ")?;
            for (idx, pos) in self.position.iter().enumerate() {
                if idx != 0 {
                    write!(f, ".")?;
                }
                write!(f, "{}", pos)?;
            }
            write!(f, ")")?;
        }

        Ok(())
    }
}

impl std::error::Error for EvalError {}
