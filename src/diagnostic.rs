//! Structured compiler diagnostics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity reported by the engine for a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// An error or warning emitted while a source was being added.
///
/// `source_name` is empty for unnamed text sources and `line` is `None` when
/// the engine could not attribute the event to a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub source_name: String,
    pub line: Option<u32>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        source_name: impl Into<String>,
        line: Option<u32>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            line,
            severity,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.source_name.is_empty() {
            "<string>"
        } else {
            &self.source_name
        };
        match self.line {
            Some(line) => write!(f, "{name}({line}): {}: {}", self.severity, self.message),
            None => write!(f, "{name}: {}: {}", self.severity, self.message),
        }
    }
}
