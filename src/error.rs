//! Error types for the rule session crate.

use crate::compiler::SessionState;
use crate::diagnostic::Diagnostic;
use std::convert::Infallible;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// Failures reported by the pattern engine itself, independent of source
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid engine handle: {0}")]
    InvalidHandle(u64),
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("duplicated identifier: {0:?}")]
    DuplicateIdentifier(String),
    #[error("capacity exceeded: at most {0} entries")]
    CapacityExceeded(usize),
    #[error("compiler context was already materialized")]
    ContextFinalized,
    #[error("compiler context has unresolved errors")]
    CompilerHasErrors,
    #[error("internal engine failure: {0}")]
    Internal(String),
}

/// Errors surfaced by sessions, the variable binder and `compile`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("cannot {operation}: session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("unsupported variable type: {kind} (expected boolean, integer or text)")]
    UnsupportedType { kind: String },

    #[error("engine rejected variable {name:?}: {source}")]
    EngineRejected {
        name: String,
        #[source]
        source: EngineError,
    },

    #[error(
        "compilation failed with {} error(s): {}",
        .errors.len(),
        DiagnosticList(.errors)
    )]
    CompilationFailed {
        errors: Vec<Diagnostic>,
        warnings: Vec<Diagnostic>,
    },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("no rule sources were added to the session")]
    EmptySource,

    #[error("IO error: {0}")]
    Io(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CompileError {
    /// Every diagnostic carried by a `CompilationFailed`, errors first.
    pub fn diagnostics(&self) -> Vec<&Diagnostic> {
        match self {
            CompileError::CompilationFailed { errors, warnings } => {
                errors.iter().chain(warnings.iter()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for CompileError {
    fn from(err: std::io::Error) -> Self {
        CompileError::Io(err.to_string())
    }
}

impl From<Infallible> for CompileError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

struct DiagnosticList<'a>(&'a [Diagnostic]);

impl fmt::Display for DiagnosticList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}
