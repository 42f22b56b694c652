//! # Rule Session
//!
//! Compilation sessions that turn textual pattern-matching rules into an
//! immutable, shareable compiled [`Ruleset`].
//!
//! The rule grammar, code generation and matching belong to a pattern engine
//! behind the [`PatternEngine`](engine::PatternEngine) trait. This crate
//! manages everything around it:
//!
//! - routing the engine's single, process-wide diagnostic callback to the
//!   session currently compiling, with a lock so concurrent sessions never
//!   receive each other's diagnostics,
//! - collecting structured errors and warnings with file and line,
//! - binding typed external variables before compilation,
//! - releasing engine contexts and rulesets exactly once.
//!
//! The built-in reference engine, and with it `Session::new` and
//! `compile`, is behind the default `builtin-engine` feature. Without it,
//! sessions are opened with [`Session::with_engine`].
//!
//! ## Quick Start
//!
//! ### One-shot compilation
//!
//! ```rust
//! use rule_session::{compile, Value};
//! use std::collections::HashMap;
//!
//! let ruleset = compile("rule t { condition: true }", HashMap::<&str, Value>::new())?;
//! assert_eq!(ruleset.rule_count(), 1);
//! # Ok::<(), rule_session::CompileError>(())
//! ```
//!
//! ### Sessions with several sources
//!
//! ```rust
//! use rule_session::{CompileError, Session, Source};
//!
//! let mut session = Session::new()?;
//! session.define_variable("max_size", 1024i64)?;
//! session.add_source(Source::named("rule small { condition: filesize < max_size }", "size.rule"), "files")?;
//! session.add_source(Source::named("rule broken { condition: nope }", "broken.rule"), "misc")?;
//!
//! match session.materialize() {
//!     Ok(ruleset) => println!("{} rules", ruleset.rule_count()),
//!     Err(CompileError::CompilationFailed { errors, .. }) => {
//!         for error in &errors {
//!             eprintln!("{error}");
//!         }
//!     }
//!     Err(other) => return Err(other),
//! }
//! # Ok::<(), rule_session::CompileError>(())
//! ```

pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod engine;
pub mod error;
pub mod ruleset;
pub mod value;

// Sessions
pub use compiler::{Session, SessionState};
#[cfg(feature = "builtin-engine")]
pub use compiler::{compile, new_session};
pub use config::SessionConfig;

// Core types and errors
pub use diagnostic::{Diagnostic, Severity};
pub use engine::{PatternEngine, RuleInfo, Source};
pub use error::{CompileError, EngineError, Result};
pub use ruleset::Ruleset;
pub use value::Value;
