//! The strategy script language.
//!
//! Strategies are written in a small indentation-structured language with Python-like syntax.
//! Source text goes through [`parse`] into a [`Module`]; the validator inspects that tree
//! statically and the [`Interpreter`] runs one function at a time under a step budget.

mod ast;
mod interpreter;
mod lexer;
mod parser;
mod value;

use std::fmt;

pub use ast::{FunctionDef, Module, Stmt, StmtKind};
pub use interpreter::Interpreter;
pub use parser::{is_keyword, parse};
pub use value::Value;

/// Source text that does not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Error raised while a strategy function runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub line: usize,
}

impl RuntimeError {
    pub(crate) fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for RuntimeError {}
