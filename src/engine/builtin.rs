//! In-process pattern engine.
//!
//! Implements the [`PatternEngine`] contract with the same observable
//! behaviour as a native compiler library: handle tables instead of
//! pointers, one diagnostic callback slot, diagnostics raised synchronously
//! while a source is added, and a bounded last-error buffer.

use super::check::{check_source, Scope, Type};
use super::parser::parse_source;
use super::{
    ContextHandle, DiagnosticEvent, DiagnosticSink, PatternEngine, RuleInfo, RulesetHandle, Source,
};
use crate::diagnostic::Severity;
use crate::error::EngineError;
use crate::value::Value;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use tracing::{debug, warn};

/// Namespace used when a source is added without one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum number of external variables per context.
pub const MAX_EXTERNAL_VARIABLES: usize = 256;

fn identifier_pattern() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

#[derive(Debug, Default)]
struct ContextState {
    rules: Vec<RuleInfo>,
    namespaces: HashMap<String, HashSet<String>>,
    externals: Vec<(String, Value)>,
    error_count: usize,
    last_error: Option<String>,
    finalized: bool,
}

impl ContextState {
    fn external_types(&self) -> HashMap<String, Type> {
        self.externals
            .iter()
            .map(|(name, value)| {
                let ty = match value {
                    Value::Boolean(_) => Type::Boolean,
                    Value::Integer(_) => Type::Integer,
                    Value::Text(_) => Type::Text,
                };
                (name.clone(), ty)
            })
            .collect()
    }
}

/// Compiled artifact. Owns copies of everything it needs so it outlives the
/// context it came from.
#[derive(Debug)]
struct CompiledRules {
    rules: Vec<RuleInfo>,
}

type Finding = (Severity, Option<u32>, String);

/// Parse and check `text`, folding accepted rules into `state`.
fn compile_into(state: &mut ContextState, text: &str, namespace: &str) -> Vec<Finding> {
    if state.finalized {
        let message = "compiler context was already materialized".to_string();
        state.error_count += 1;
        state.last_error = Some(message.clone());
        return vec![(Severity::Error, None, message)];
    }

    let file = match parse_source(text) {
        Ok(file) => file,
        Err(syntax) => {
            state.error_count += 1;
            state.last_error = Some(syntax.message.clone());
            return vec![(Severity::Error, Some(syntax.line), syntax.message)];
        }
    };

    let empty = HashSet::new();
    let externals = state.external_types();
    let scope = Scope {
        rules: state.namespaces.get(namespace).unwrap_or(&empty),
        externals: &externals,
    };
    let outcome = check_source(&file, &scope);

    let accepted: Vec<RuleInfo> = outcome
        .accepted
        .iter()
        .map(|rule| RuleInfo {
            namespace: namespace.to_string(),
            identifier: rule.identifier.clone(),
            tags: rule.tags.clone(),
            metadata: rule.metadata.clone(),
            strings: rule.strings.iter().map(|s| format!("${}", s.id)).collect(),
            private: rule.private,
            global: rule.global,
        })
        .collect();
    state.error_count += outcome.error_count();

    let findings: Vec<Finding> = outcome
        .findings
        .into_iter()
        .map(|f| (f.severity, Some(f.line), f.message))
        .collect();
    if let Some((_, _, message)) = findings
        .iter()
        .rev()
        .find(|(severity, _, _)| *severity == Severity::Error)
    {
        state.last_error = Some(message.clone());
    }

    let names = state.namespaces.entry(namespace.to_string()).or_default();
    names.extend(accepted.iter().map(|r| r.identifier.clone()));
    state.rules.extend(accepted);
    findings
}

/// The default [`PatternEngine`].
///
/// # Examples
///
/// ```rust
/// use rule_session::engine::{BuiltinEngine, PatternEngine, Source};
///
/// let engine = BuiltinEngine::new();
/// let context = engine.create_context()?;
/// let errors = engine.add_source(context, Source::text("rule t { condition: true }"), None);
/// assert_eq!(errors, 0);
/// let ruleset = engine.materialize(context)?;
/// assert_eq!(engine.ruleset_rules(ruleset)?.len(), 1);
/// engine.destroy_ruleset(ruleset);
/// engine.destroy_context(context);
/// # Ok::<(), rule_session::EngineError>(())
/// ```
pub struct BuiltinEngine {
    sink: RwLock<Option<DiagnosticSink>>,
    next_handle: AtomicU64,
    contexts: Mutex<HashMap<u64, ContextState>>,
    rulesets: Mutex<HashMap<u64, CompiledRules>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BuiltinEngine {
    pub fn new() -> Self {
        Self {
            sink: RwLock::new(None),
            next_handle: AtomicU64::new(1),
            contexts: Mutex::new(HashMap::new()),
            rulesets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        lock(&self.contexts).len()
    }

    /// Number of rulesets materialized and not yet destroyed.
    pub fn live_rulesets(&self) -> usize {
        lock(&self.rulesets).len()
    }

    /// Whether `ruleset` still refers to a live compiled artifact.
    pub fn is_live(&self, ruleset: RulesetHandle) -> bool {
        lock(&self.rulesets).contains_key(&ruleset.raw())
    }

    fn allocate_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, severity: Severity, source_name: &str, line: Option<u32>, message: &str) {
        let sink = *self.sink.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink {
            sink(DiagnosticEvent {
                severity,
                source_name,
                line,
                message,
            });
        }
    }

    fn define(&self, context: ContextHandle, name: &str, value: Value) -> Result<(), EngineError> {
        if !identifier_pattern().is_match(name) {
            return Err(EngineError::InvalidIdentifier(name.to_string()));
        }

        let mut contexts = lock(&self.contexts);
        let state = contexts
            .get_mut(&context.raw())
            .ok_or(EngineError::InvalidHandle(context.raw()))?;

        if state.finalized {
            return Err(EngineError::ContextFinalized);
        }
        if state.externals.iter().any(|(existing, _)| existing == name) {
            return Err(EngineError::DuplicateIdentifier(name.to_string()));
        }
        if state.externals.len() >= MAX_EXTERNAL_VARIABLES {
            return Err(EngineError::CapacityExceeded(MAX_EXTERNAL_VARIABLES));
        }

        state.externals.push((name.to_string(), value));
        Ok(())
    }
}

impl Default for BuiltinEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BuiltinEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinEngine")
            .field("live_contexts", &self.live_contexts())
            .field("live_rulesets", &self.live_rulesets())
            .finish()
    }
}

impl PatternEngine for BuiltinEngine {
    fn set_diagnostic_sink(&self, sink: DiagnosticSink) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn create_context(&self) -> Result<ContextHandle, EngineError> {
        let raw = self.allocate_handle();
        lock(&self.contexts).insert(raw, ContextState::default());
        Ok(ContextHandle::from_raw(raw))
    }

    fn add_source(
        &self,
        context: ContextHandle,
        source: Source<'_>,
        namespace: Option<&str>,
    ) -> usize {
        let namespace = namespace.unwrap_or(DEFAULT_NAMESPACE);

        let (text, name) = match source {
            Source::Text { text, name } => (text.to_string(), name.unwrap_or("").to_string()),
            Source::Stream { reader, name } => {
                let mut text = String::new();
                if let Err(e) = reader.read_to_string(&mut text) {
                    let message = format!("could not read source: {e}");
                    if let Some(state) = lock(&self.contexts).get_mut(&context.raw()) {
                        state.error_count += 1;
                        state.last_error = Some(message.clone());
                    }
                    self.emit(Severity::Error, name, None, &message);
                    return 1;
                }
                (text, name.to_string())
            }
        };

        // The table lock is released before any finding reaches the sink.
        let findings = match lock(&self.contexts).get_mut(&context.raw()) {
            Some(state) => compile_into(state, &text, namespace),
            None => vec![(
                Severity::Error,
                None,
                format!("invalid compiler context {}", context.raw()),
            )],
        };

        let mut errors = 0;
        for (severity, line, message) in &findings {
            if *severity == Severity::Error {
                errors += 1;
            }
            self.emit(*severity, &name, *line, message);
        }
        debug!(
            context = context.raw(),
            namespace,
            errors,
            "built-in engine processed source"
        );
        errors
    }

    fn define_boolean_variable(
        &self,
        context: ContextHandle,
        name: &str,
        value: bool,
    ) -> Result<(), EngineError> {
        self.define(context, name, Value::Boolean(value))
    }

    fn define_integer_variable(
        &self,
        context: ContextHandle,
        name: &str,
        value: i64,
    ) -> Result<(), EngineError> {
        self.define(context, name, Value::Integer(value))
    }

    fn define_string_variable(
        &self,
        context: ContextHandle,
        name: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        self.define(context, name, Value::Text(value.to_string()))
    }

    fn last_error_message(&self, context: ContextHandle, buffer: &mut [u8]) -> usize {
        if buffer.is_empty() {
            return 0;
        }
        let contexts = lock(&self.contexts);
        let message = contexts
            .get(&context.raw())
            .and_then(|state| state.last_error.as_deref())
            .unwrap_or("");

        let written = message.len().min(buffer.len() - 1);
        buffer[..written].copy_from_slice(&message.as_bytes()[..written]);
        buffer[written] = 0;
        written
    }

    fn materialize(&self, context: ContextHandle) -> Result<RulesetHandle, EngineError> {
        let compiled = {
            let mut contexts = lock(&self.contexts);
            let state = contexts
                .get_mut(&context.raw())
                .ok_or(EngineError::InvalidHandle(context.raw()))?;

            if state.finalized {
                return Err(EngineError::ContextFinalized);
            }
            if state.error_count > 0 {
                return Err(EngineError::CompilerHasErrors);
            }
            state.finalized = true;

            CompiledRules {
                rules: state.rules.clone(),
            }
        };

        let raw = self.allocate_handle();
        lock(&self.rulesets).insert(raw, compiled);
        Ok(RulesetHandle::from_raw(raw))
    }

    fn ruleset_rules(&self, ruleset: RulesetHandle) -> Result<Vec<RuleInfo>, EngineError> {
        let rulesets = lock(&self.rulesets);
        let compiled = rulesets
            .get(&ruleset.raw())
            .ok_or(EngineError::InvalidHandle(ruleset.raw()))?;
        Ok(compiled.rules.clone())
    }

    fn destroy_context(&self, context: ContextHandle) {
        if lock(&self.contexts).remove(&context.raw()).is_none() {
            warn!(context = context.raw(), "destroy of unknown compiler context ignored");
        }
    }

    fn destroy_ruleset(&self, ruleset: RulesetHandle) {
        if lock(&self.rulesets).remove(&ruleset.raw()).is_none() {
            warn!(ruleset = ruleset.raw(), "destroy of unknown ruleset ignored");
        }
    }
}
