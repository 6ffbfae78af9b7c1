//! Error kinds shared by the compiler and the interpreter.

use std::fmt;

/// Location in script text. Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(offset: usize, line: usize, column: usize) -> Self {
        Position { offset, line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed script: bad token, unknown type, unbalanced braces, duplicate names.
    #[error("syntax error at {position}: {message}")]
    Syntax { message: String, position: Position },
    /// Expression names a field that is unknown, ambiguous or declared later.
    #[error("reference error at {position}: {message}")]
    Reference { message: String, position: Position },
    /// Division/modulo by zero or a missing numeric value during evaluation.
    #[error("arithmetic: {0}")]
    Arithmetic(String),
    /// Stream ended before a fixed-size read completed.
    #[error("unexpected end of stream: {0}")]
    Exhausted(String),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Values do not fit the compiled layout, or an external value is missing.
    #[error("structure: {0}")]
    Structural(String),
}

impl Error {
    pub(crate) fn syntax(message: impl Into<String>, position: Position) -> Self {
        Error::Syntax { message: message.into(), position }
    }

    pub(crate) fn reference(message: impl Into<String>, position: Position) -> Self {
        Error::Reference { message: message.into(), position }
    }

    /// Source position for compile-time errors.
    pub fn position(&self) -> Option<Position> {
        match self {
            Error::Syntax { position, .. } | Error::Reference { position, .. } => Some(*position),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
