//! Compilation sessions.
//!
//! A [`Session`] owns one engine compiler context. Sources are added to it
//! (each in a namespace), external variables are bound before compilation,
//! and [`Session::materialize`] turns the context into a [`Ruleset`].
//!
//! The module is organized into:
//! - [`relay`] - routes the engine's single diagnostic callback to the
//!   session that is adding a source
//! - [`variables`] - forwards typed external variables to the engine
//!
//! Diagnostics accumulate in the session and only become an error at
//! materialization time, so several sources can be added before deciding
//! whether the compilation succeeded. Adding sources after one reported
//! errors is allowed; the errors are still reported by `materialize`.
//!
//! # Examples
//!
//! ```rust
//! use rule_session::Session;
//!
//! let mut session = Session::new()?;
//! session.define_variable("debug", true)?;
//! let errors = session.add_source("rule t { condition: debug }", "")?;
//! assert_eq!(errors, 0);
//!
//! let ruleset = session.materialize()?;
//! assert_eq!(ruleset.rule_count(), 1);
//! # Ok::<(), rule_session::CompileError>(())
//! ```

pub(crate) mod relay;
pub(crate) mod variables;

use crate::config::SessionConfig;
use crate::diagnostic::{Diagnostic, Severity};
use crate::engine::{ContextHandle, PatternEngine, Source};
use crate::error::{CompileError, Result};
use crate::ruleset::Ruleset;
use crate::value::Value;
use relay::{DiagnosticLog, Relay};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Accepts sources and variables.
    Open,
    /// `materialize` ran, successfully or not. Terminal for compilation.
    Finalized,
    /// The engine context has been released.
    Destroyed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Open => f.write_str("open"),
            SessionState::Finalized => f.write_str("finalized"),
            SessionState::Destroyed => f.write_str("destroyed"),
        }
    }
}

/// A compilation session over one engine compiler context.
///
/// The context is released by [`destroy`](Session::destroy) or when the
/// session is dropped, whichever comes first. Rulesets produced by the
/// session stay valid after that.
pub struct Session {
    engine: Arc<dyn PatternEngine>,
    context: Option<ContextHandle>,
    state: SessionState,
    diagnostics: DiagnosticLog,
    config: SessionConfig,
    sources_added: usize,
    last_error: Option<String>,
}

impl Session {
    /// Open a session on the built-in engine with the default configuration.
    #[cfg(feature = "builtin-engine")]
    pub fn new() -> Result<Self> {
        Self::with_config(SessionConfig::default())
    }

    /// Open a session on the built-in engine.
    #[cfg(feature = "builtin-engine")]
    pub fn with_config(config: SessionConfig) -> Result<Self> {
        Self::with_engine(crate::engine::builtin(), config)
    }

    /// Open a session on `engine`.
    ///
    /// Registers the diagnostic relay as the engine's callback. Registration
    /// is repeated for every session; it always installs the same function
    /// and never overlaps another session's `add_source`.
    pub fn with_engine(engine: Arc<dyn PatternEngine>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Relay::global().register(engine.as_ref());
        let context = engine.create_context()?;
        debug!(context = context.raw(), "opened compilation session");

        Ok(Self {
            engine,
            context: Some(context),
            state: SessionState::Open,
            diagnostics: DiagnosticLog::default(),
            config,
            sources_added: 0,
            last_error: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of `add_*` calls that reached the engine.
    pub fn sources_added(&self) -> usize {
        self.sources_added
    }

    fn open_context(&self, operation: &'static str) -> Result<ContextHandle> {
        match (self.state, self.context) {
            (SessionState::Open, Some(context)) => Ok(context),
            (state, _) => Err(CompileError::InvalidState { operation, state }),
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Compile `source` into the session under `namespace` (empty for the
    /// default namespace).
    ///
    /// Returns the number of errors the engine reported for this call. The
    /// diagnostics themselves are kept in the session and reported by
    /// [`materialize`](Session::materialize); a nonzero count does not close
    /// the session.
    pub fn add_source<'a>(&mut self, source: impl Into<Source<'a>>, namespace: &str) -> Result<usize> {
        let context = self.open_context("add source")?;
        let source = source.into();
        let source_name = source.name().to_string();
        let ns = (!namespace.is_empty()).then_some(namespace);
        let recorded_before = self.log().len();

        let reported = {
            let _relay = Relay::global().activate(&self.diagnostics);
            self.engine.add_source(context, source, ns)
        };
        self.sources_added += 1;

        if self.config.log_diagnostics {
            for diagnostic in &self.log()[recorded_before..] {
                match diagnostic.severity {
                    Severity::Error => error!(context = context.raw(), "{diagnostic}"),
                    Severity::Warning => warn!(context = context.raw(), "{diagnostic}"),
                }
            }
        }

        if reported > 0 {
            self.last_error = Some(self.fetch_last_error(context));
            warn!(
                context = context.raw(),
                source = %source_name,
                namespace,
                errors = reported,
                "source added with errors"
            );
        } else {
            debug!(
                context = context.raw(),
                source = %source_name,
                namespace,
                "source added"
            );
        }

        Ok(reported)
    }

    /// Compile rules read from `reader`, reported under `name`.
    pub fn add_reader<R: Read>(&mut self, mut reader: R, name: &str, namespace: &str) -> Result<usize> {
        self.add_source(Source::stream(&mut reader, name), namespace)
    }

    /// Compile the rule file at `path`. The path is the diagnostic source name.
    pub fn add_file(&mut self, path: impl AsRef<Path>, namespace: &str) -> Result<usize> {
        self.open_context("add file")?;
        let path = path.as_ref();
        let file = File::open(path)?;
        let name = path.display().to_string();
        self.add_reader(file, &name, namespace)
    }

    /// Retrieve the engine's message for the last failed add through a
    /// buffer of `message_capacity` bytes. The engine's reported length and
    /// terminator are not trusted past the buffer.
    fn fetch_last_error(&self, context: ContextHandle) -> String {
        let mut buffer = vec![0u8; self.config.message_capacity];
        let claimed = self.engine.last_error_message(context, &mut buffer);
        let bounded = &buffer[..claimed.min(buffer.len())];
        let end = bounded.iter().position(|&b| b == 0).unwrap_or(bounded.len());
        String::from_utf8_lossy(&bounded[..end]).into_owned()
    }

    /// Bind an external variable before compilation.
    ///
    /// `value` must convert into a boolean, 64-bit integer or text
    /// [`Value`]; any other kind fails with `UnsupportedType` without
    /// reaching the engine.
    ///
    /// ```rust
    /// use rule_session::{CompileError, Session};
    ///
    /// let mut session = Session::new()?;
    /// session.define_variable("level", 3i64)?;
    /// session.define_variable("name", "scanner")?;
    ///
    /// let err = session.define_variable("ratio", serde_json::json!(0.5)).unwrap_err();
    /// assert!(matches!(err, CompileError::UnsupportedType { .. }));
    /// # Ok::<(), rule_session::CompileError>(())
    /// ```
    pub fn define_variable<V>(&mut self, name: &str, value: V) -> Result<()>
    where
        V: TryInto<Value>,
        CompileError: From<V::Error>,
    {
        let value = value.try_into()?;
        let context = self.open_context("define variable")?;
        variables::bind(self.engine.as_ref(), context, name, &value)
    }

    /// All diagnostics recorded so far, in emission order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.log().clone()
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.log().iter().filter(|d| d.is_error()).cloned().collect()
    }

    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.log().iter().filter(|d| d.is_warning()).cloned().collect()
    }

    pub fn has_errors(&self) -> bool {
        self.log().iter().any(Diagnostic::is_error)
    }

    /// Message the engine gave for the most recent add that reported errors.
    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Finish compilation.
    ///
    /// The session is finalized whatever the outcome. Fails with
    /// `CompilationFailed` carrying every recorded diagnostic if any error
    /// was recorded, with `EmptySource` if no source was added and the
    /// configuration forbids empty rulesets, and with `Engine` if the engine
    /// cannot build the ruleset.
    pub fn materialize(&mut self) -> Result<Ruleset> {
        let context = self.open_context("materialize")?;
        self.state = SessionState::Finalized;

        let (errors, warnings): (Vec<Diagnostic>, Vec<Diagnostic>) =
            self.log().iter().cloned().partition(Diagnostic::is_error);

        if !errors.is_empty() {
            warn!(
                context = context.raw(),
                errors = errors.len(),
                warnings = warnings.len(),
                "compilation failed"
            );
            return Err(CompileError::CompilationFailed { errors, warnings });
        }

        if self.sources_added == 0 && !self.config.allow_empty {
            return Err(CompileError::EmptySource);
        }

        let handle = self.engine.materialize(context)?;
        let rules = match self.engine.ruleset_rules(handle) {
            Ok(rules) => rules,
            Err(e) => {
                self.engine.destroy_ruleset(handle);
                return Err(e.into());
            }
        };

        info!(
            context = context.raw(),
            ruleset = handle.raw(),
            rules = rules.len(),
            warnings = warnings.len(),
            "materialized ruleset"
        );
        Ok(Ruleset::new(Arc::clone(&self.engine), handle, rules))
    }

    /// Release the engine context. Calling it again does nothing.
    pub fn destroy(&mut self) {
        if let Some(context) = self.context.take() {
            self.engine.destroy_context(context);
            debug!(context = context.raw(), "destroyed compilation session");
        }
        self.state = SessionState::Destroyed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .field("state", &self.state)
            .field("sources_added", &self.sources_added)
            .field("diagnostics", &self.log().len())
            .finish()
    }
}

/// Open a session on the built-in engine.
#[cfg(feature = "builtin-engine")]
pub fn new_session() -> Result<Session> {
    Session::new()
}

/// Compile `source` in one step: open a session, bind every variable, add
/// the source to the default namespace and materialize.
///
/// ```rust
/// use rule_session::{compile, CompileError, Value};
/// use std::collections::HashMap;
///
/// let ruleset = compile("rule t { condition: true }", HashMap::<&str, Value>::new())?;
/// assert_eq!(ruleset.rule_count(), 1);
///
/// let err = compile("rule t { condition: undefined_id }", HashMap::<&str, Value>::new())
///     .unwrap_err();
/// assert!(matches!(err, CompileError::CompilationFailed { .. }));
/// # Ok::<(), rule_session::CompileError>(())
/// ```
#[cfg(feature = "builtin-engine")]
pub fn compile<I, K, V>(source: &str, variables: I) -> Result<Ruleset>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: TryInto<Value>,
    CompileError: From<V::Error>,
{
    let mut session = Session::new()?;
    for (name, value) in variables {
        session.define_variable(name.as_ref(), value)?;
    }
    session.add_source(source, "")?;
    session.materialize()
}
