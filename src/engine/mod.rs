//! Boundary with the pattern engine.
//!
//! The engine owns the rule grammar, code generation and matching. This crate
//! only drives it through the [`PatternEngine`] trait, which mirrors the shape
//! of a native compiler library:
//!
//! - opaque [`ContextHandle`] / [`RulesetHandle`] values that must be destroyed
//!   explicitly,
//! - a single process-wide [`DiagnosticSink`] that receives every error and
//!   warning raised while a source is being added,
//! - a bounded "last error message" query.
//!
//! `BuiltinEngine` (feature `builtin-engine`, on by default) is an in-process
//! implementation of that contract used by `Session::new`; a binding to a native library can be plugged in with
//! [`Session::with_engine`](crate::Session::with_engine).

#[cfg(feature = "builtin-engine")]
pub mod builtin;
#[cfg(feature = "builtin-engine")]
pub(crate) mod check;
#[cfg(feature = "builtin-engine")]
pub(crate) mod parser;

#[cfg(feature = "builtin-engine")]
pub use builtin::BuiltinEngine;

use crate::diagnostic::Severity;
use crate::error::EngineError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
#[cfg(feature = "builtin-engine")]
use std::sync::{Arc, OnceLock};

/// Opaque handle to a compiler context owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

/// Opaque handle to a compiled ruleset owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RulesetHandle(u64);

impl ContextHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl RulesetHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// A diagnostic as the engine reports it, borrowed for the duration of the
/// callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticEvent<'a> {
    pub severity: Severity,
    pub source_name: &'a str,
    pub line: Option<u32>,
    pub message: &'a str,
}

/// The one callback slot the engine offers for diagnostics.
pub type DiagnosticSink = fn(DiagnosticEvent<'_>);

/// Rule text handed to the engine.
pub enum Source<'a> {
    Text {
        text: &'a str,
        name: Option<&'a str>,
    },
    Stream {
        reader: &'a mut dyn Read,
        name: &'a str,
    },
}

impl<'a> Source<'a> {
    /// Unnamed rule text; diagnostics carry an empty source name.
    pub fn text(text: &'a str) -> Self {
        Source::Text { text, name: None }
    }

    /// Rule text reported under `name`.
    pub fn named(text: &'a str, name: &'a str) -> Self {
        Source::Text {
            text,
            name: Some(name),
        }
    }

    /// A readable stream reported under `name`.
    pub fn stream(reader: &'a mut dyn Read, name: &'a str) -> Self {
        Source::Stream { reader, name }
    }

    pub fn name(&self) -> &str {
        match self {
            Source::Text { name, .. } => name.unwrap_or(""),
            Source::Stream { name, .. } => name,
        }
    }
}

impl<'a> From<&'a str> for Source<'a> {
    fn from(text: &'a str) -> Self {
        Source::text(text)
    }
}

impl<'a> From<&'a String> for Source<'a> {
    fn from(text: &'a String) -> Self {
        Source::text(text)
    }
}

impl fmt::Debug for Source<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Text { text, name } => f
                .debug_struct("Text")
                .field("name", name)
                .field("len", &text.len())
                .finish(),
            Source::Stream { name, .. } => f.debug_struct("Stream").field("name", name).finish(),
        }
    }
}

/// Description of one compiled rule, as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub namespace: String,
    pub identifier: String,
    pub tags: Vec<String>,
    pub metadata: Vec<(String, Value)>,
    pub strings: Vec<String>,
    pub private: bool,
    pub global: bool,
}

/// Operations a pattern engine exposes to compilation sessions.
///
/// Handles are only meaningful to the engine that issued them. `add_source`
/// reports diagnostics synchronously through the sink registered with
/// [`set_diagnostic_sink`](PatternEngine::set_diagnostic_sink) before it
/// returns, and its return value is the number of error-level events it
/// raised.
pub trait PatternEngine: Send + Sync + fmt::Debug {
    /// Register the diagnostic callback. Calling it again replaces the
    /// previous callback.
    fn set_diagnostic_sink(&self, sink: DiagnosticSink);

    fn create_context(&self) -> Result<ContextHandle, EngineError>;

    /// Compile `source` into the context under `namespace` (`None` for the
    /// default namespace) and return the number of errors raised.
    fn add_source(
        &self,
        context: ContextHandle,
        source: Source<'_>,
        namespace: Option<&str>,
    ) -> usize;

    fn define_boolean_variable(
        &self,
        context: ContextHandle,
        name: &str,
        value: bool,
    ) -> Result<(), EngineError>;

    fn define_integer_variable(
        &self,
        context: ContextHandle,
        name: &str,
        value: i64,
    ) -> Result<(), EngineError>;

    fn define_string_variable(
        &self,
        context: ContextHandle,
        name: &str,
        value: &str,
    ) -> Result<(), EngineError>;

    /// Write the message of the last failed add into `buffer` and return the
    /// number of bytes the engine claims to have written. Callers must not
    /// trust the returned length or a terminating NUL beyond `buffer.len()`.
    fn last_error_message(&self, context: ContextHandle, buffer: &mut [u8]) -> usize;

    fn materialize(&self, context: ContextHandle) -> Result<RulesetHandle, EngineError>;

    fn ruleset_rules(&self, ruleset: RulesetHandle) -> Result<Vec<RuleInfo>, EngineError>;

    fn destroy_context(&self, context: ContextHandle);

    fn destroy_ruleset(&self, ruleset: RulesetHandle);
}

#[cfg(feature = "builtin-engine")]
static BUILTIN_ENGINE: OnceLock<Arc<BuiltinEngine>> = OnceLock::new();

/// The process-wide built-in engine used by [`Session::new`](crate::Session::new).
#[cfg(feature = "builtin-engine")]
pub fn builtin() -> Arc<BuiltinEngine> {
    Arc::clone(BUILTIN_ENGINE.get_or_init(|| Arc::new(BuiltinEngine::new())))
}
