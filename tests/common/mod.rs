//! Shared test support: a scriptable pattern engine that records every call.

#![allow(dead_code)]

use rule_session::engine::{
    ContextHandle, DiagnosticEvent, DiagnosticSink, PatternEngine, RuleInfo, RulesetHandle, Source,
};
use rule_session::{EngineError, Severity};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// One diagnostic the engine will raise during an `add_source` call.
#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    pub severity: Severity,
    pub source_name: String,
    pub line: Option<u32>,
    pub message: String,
}

impl ScriptedEvent {
    pub fn error(source_name: &str, line: u32, message: &str) -> Self {
        Self {
            severity: Severity::Error,
            source_name: source_name.to_string(),
            line: Some(line),
            message: message.to_string(),
        }
    }

    pub fn warning(source_name: &str, line: u32, message: &str) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(source_name, line, message)
        }
    }
}

/// A [`PatternEngine`] whose behaviour is driven by the test.
#[derive(Default)]
pub struct ScriptedEngine {
    sink: Mutex<Option<DiagnosticSink>>,
    next_handle: AtomicU64,
    calls: Mutex<Vec<&'static str>>,
    scripts: Mutex<VecDeque<Vec<ScriptedEvent>>>,
    repeating: Mutex<Option<Vec<ScriptedEvent>>>,
    event_delay: Mutex<Option<Duration>>,
    last_error: Mutex<Vec<u8>>,
    claimed_length: Mutex<Option<usize>>,
    rules: Mutex<Vec<RuleInfo>>,
    fail_materialize: AtomicBool,
    reject_variables: AtomicBool,
    adding: AtomicBool,
    sink_replaced_while_adding: AtomicBool,
    pub contexts_destroyed: AtomicUsize,
    pub rulesets_destroyed: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for the next `add_source` call, consumed in order.
    pub fn script(&self, events: Vec<ScriptedEvent>) {
        self.scripts.lock().unwrap().push_back(events);
    }

    /// Events raised by every `add_source` call that has no queued script.
    pub fn repeat(&self, events: Vec<ScriptedEvent>) {
        *self.repeating.lock().unwrap() = Some(events);
    }

    /// Pause between events, widening the window in which a second session
    /// could interfere.
    pub fn delay_events(&self, delay: Duration) {
        *self.event_delay.lock().unwrap() = Some(delay);
    }

    /// Raw bytes copied into the caller's buffer by `last_error_message`,
    /// without a terminator, and the length the engine will claim.
    pub fn set_last_error(&self, bytes: Vec<u8>, claimed_length: usize) {
        *self.last_error.lock().unwrap() = bytes;
        *self.claimed_length.lock().unwrap() = Some(claimed_length);
    }

    pub fn set_rules(&self, rules: Vec<RuleInfo>) {
        *self.rules.lock().unwrap() = rules;
    }

    pub fn fail_materialize(&self) {
        self.fail_materialize.store(true, Ordering::SeqCst);
    }

    pub fn reject_variables(&self) {
        self.reject_variables.store(true, Ordering::SeqCst);
    }

    /// Whether the callback slot was written while an `add_source` was
    /// emitting events.
    pub fn sink_replaced_while_adding(&self) -> bool {
        self.sink_replaced_while_adding.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn define(&self, call: &'static str, name: &str) -> Result<(), EngineError> {
        self.record(call);
        if self.reject_variables.load(Ordering::SeqCst) {
            Err(EngineError::InvalidIdentifier(name.to_string()))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("calls", &self.calls())
            .finish()
    }
}

impl PatternEngine for ScriptedEngine {
    fn set_diagnostic_sink(&self, sink: DiagnosticSink) {
        self.record("set_diagnostic_sink");
        if self.adding.load(Ordering::SeqCst) {
            self.sink_replaced_while_adding.store(true, Ordering::SeqCst);
        }
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn create_context(&self) -> Result<ContextHandle, EngineError> {
        self.record("create_context");
        Ok(ContextHandle::from_raw(
            self.next_handle.fetch_add(1, Ordering::SeqCst),
        ))
    }

    fn add_source(
        &self,
        _context: ContextHandle,
        _source: Source<'_>,
        _namespace: Option<&str>,
    ) -> usize {
        self.record("add_source");
        self.adding.store(true, Ordering::SeqCst);
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeating.lock().unwrap().clone())
            .unwrap_or_default();
        let sink = *self.sink.lock().unwrap();
        let delay = *self.event_delay.lock().unwrap();

        let mut errors = 0;
        for event in &events {
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            if event.severity == Severity::Error {
                errors += 1;
            }
            if let Some(sink) = sink {
                sink(DiagnosticEvent {
                    severity: event.severity,
                    source_name: &event.source_name,
                    line: event.line,
                    message: &event.message,
                });
            }
        }
        self.adding.store(false, Ordering::SeqCst);
        errors
    }

    fn define_boolean_variable(
        &self,
        _context: ContextHandle,
        name: &str,
        _value: bool,
    ) -> Result<(), EngineError> {
        self.define("define_boolean_variable", name)
    }

    fn define_integer_variable(
        &self,
        _context: ContextHandle,
        name: &str,
        _value: i64,
    ) -> Result<(), EngineError> {
        self.define("define_integer_variable", name)
    }

    fn define_string_variable(
        &self,
        _context: ContextHandle,
        name: &str,
        _value: &str,
    ) -> Result<(), EngineError> {
        self.define("define_string_variable", name)
    }

    fn last_error_message(&self, _context: ContextHandle, buffer: &mut [u8]) -> usize {
        self.record("last_error_message");
        let bytes = self.last_error.lock().unwrap();
        let copied = bytes.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&bytes[..copied]);
        self.claimed_length.lock().unwrap().unwrap_or(copied)
    }

    fn materialize(&self, _context: ContextHandle) -> Result<RulesetHandle, EngineError> {
        self.record("materialize");
        if self.fail_materialize.load(Ordering::SeqCst) {
            return Err(EngineError::Internal("out of memory".to_string()));
        }
        Ok(RulesetHandle::from_raw(
            self.next_handle.fetch_add(1, Ordering::SeqCst),
        ))
    }

    fn ruleset_rules(&self, _ruleset: RulesetHandle) -> Result<Vec<RuleInfo>, EngineError> {
        self.record("ruleset_rules");
        Ok(self.rules.lock().unwrap().clone())
    }

    fn destroy_context(&self, _context: ContextHandle) {
        self.record("destroy_context");
        self.contexts_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy_ruleset(&self, _ruleset: RulesetHandle) {
        self.record("destroy_ruleset");
        self.rulesets_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn rule(namespace: &str, identifier: &str) -> RuleInfo {
    RuleInfo {
        namespace: namespace.to_string(),
        identifier: identifier.to_string(),
        tags: Vec::new(),
        metadata: Vec::new(),
        strings: Vec::new(),
        private: false,
        global: false,
    }
}
