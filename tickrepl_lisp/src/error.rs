// Reader and evaluation errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    #[error("EOF while reading, expected `{0}`")]
    Unbalanced(char),
    #[error("unmatched delimiter `{0}`")]
    UnexpectedClose(char),
    #[error("EOF while reading string")]
    UnterminatedString,
    #[error("unsupported escape character `\\{0}`")]
    InvalidEscape(char),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("EOF after quote")]
    DanglingQuote,
    #[error("forms nested deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error("unable to resolve symbol: {0}")]
    Unbound(String),
    #[error("{0} cannot be called")]
    NotCallable(String),
    #[error("wrong number of args ({got}) passed to {name}")]
    Arity { name: String, got: usize },
    #[error("{op}: expected {expected}, got {got}")]
    Type {
        op: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("divide by zero")]
    DivideByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("malformed {form}: {reason}")]
    Syntax { form: &'static str, reason: String },
    #[error("stack depth exceeded")]
    StackOverflow,
    #[error("{0}")]
    Limit(String),
    #[error("could not read {path}: {reason}")]
    Io { path: String, reason: String },
}

impl EvalError {
    pub fn syntax(form: &'static str, reason: impl Into<String>) -> Self {
        EvalError::Syntax {
            form,
            reason: reason.into(),
        }
    }

    /// Short exception class name for the nREPL `ex` field.
    pub fn class(&self) -> &'static str {
        match self {
            EvalError::Read(_) => "ReaderException",
            EvalError::Unbound(_) => "UnresolvedSymbol",
            EvalError::NotCallable(_) | EvalError::Type { .. } => "TypeError",
            EvalError::Arity { .. } => "ArityException",
            EvalError::DivideByZero | EvalError::Overflow => "ArithmeticException",
            EvalError::Syntax { .. } => "CompilerException",
            EvalError::StackOverflow | EvalError::Limit(_) => "RuntimeException",
            EvalError::Io { .. } => "IOException",
        }
    }
}
