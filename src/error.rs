//! Layered error types for the engine.
//!
//! Each subsystem gets its own `thiserror` enum; [`EngineError`] composes them
//! the way the lower layers expect to be driven from a single `Result` at the
//! public API boundary.

use thiserror::Error;

/// Raised by the lexer while tokenizing raw SQL/FilterQL text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated string literal starting at byte {pos}")]
    UnterminatedString { pos: usize },
    #[error("unterminated quoted identifier starting at byte {pos}")]
    UnterminatedIdent { pos: usize },
    #[error("unterminated block comment starting at byte {pos}")]
    UnterminatedComment { pos: usize },
    #[error("unexpected character `{ch}` at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },
}

/// Raised by the statement/expression parsers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("parse error at {pos} near `{near}`: {message}")]
pub struct ParseError {
    pub message: String,
    pub pos: usize,
    /// Up to 40 raw characters of look-ahead from the offending token.
    pub near: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: usize, near: impl Into<String>) -> Self {
        let mut near = near.into();
        if near.len() > 40 {
            near.truncate(40);
        }
        Self {
            message: message.into(),
            pos,
            near,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::new(e.to_string(), 0, "")
    }
}

/// Raised while turning a [`crate::parser::Statement`] into a task DAG.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("unknown table: `{0}`")]
    UnknownTable(String),
    #[error("source `{0}` does not support this operation")]
    UnsupportedCapability(String),
    #[error("no FROM clause in statement")]
    MissingFrom,
    #[error("filter `{0}` is not defined")]
    UnknownFilter(String),
    #[error("plan error: {0}")]
    Other(String),
}

/// The VM never propagates a Rust error for evaluation failure;
/// this type exists only for the handful of VM-adjacent operations (function
/// registration, malformed function signature) that can fail structurally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorVm {
    #[error("unknown function: `{0}`")]
    UnknownFunction(String),
    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("malformed date-math literal: `{0}`")]
    BadDateMath(String),
}

/// Raised by a datasource capability implementation.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("table `{0}` not found")]
    TableNotFound(String),
    #[error("key not found")]
    KeyNotFound,
    #[error("source does not implement `{0}`")]
    CapabilityMissing(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Raised by the executor: task failure, cancellation, or an internal bug
/// trapped at a task's panic boundary.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("query was cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Top-level error returned by the public `Engine`/`Driver` surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Vm(#[from] ErrorVm),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<LexError> for EngineError {
    fn from(e: LexError) -> Self {
        EngineError::Parse(e.into())
    }
}
