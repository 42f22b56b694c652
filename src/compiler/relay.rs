//! Diagnostic relay.
//!
//! The engine accepts exactly one diagnostic callback for the whole process.
//! The relay is that callback: it forwards each event to the log of the
//! session that is currently adding a source.
//!
//! Registration with an engine goes through [`Relay::register`], which holds
//! the same gate, so an engine's callback slot is never rewritten while a
//! source is being added on another thread.
//!
//! Routing is only set up through [`Relay::activate`], which takes the
//! process-wide gate and returns a [`RelayGuard`]. Dropping the guard clears
//! the target and releases the gate, on every exit path including unwinding,
//! so two sessions can never have overlapping `add_source` windows and a
//! finished session is never left as the routing target.

use crate::diagnostic::Diagnostic;
use crate::engine::{DiagnosticEvent, PatternEngine};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{trace, warn};

/// Ordered diagnostics of one session, shared with the relay while active.
pub(crate) type DiagnosticLog = Arc<Mutex<Vec<Diagnostic>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Relay {
    gate: Mutex<()>,
    target: Mutex<Option<DiagnosticLog>>,
}

static RELAY: Relay = Relay::new();

impl Relay {
    pub(crate) const fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            target: Mutex::new(None),
        }
    }

    /// The relay backing [`relay_diagnostic`].
    pub(crate) fn global() -> &'static Relay {
        &RELAY
    }

    /// Install [`relay_diagnostic`] as `engine`'s callback. Waits for any
    /// open routing window to close first.
    pub(crate) fn register(&self, engine: &dyn PatternEngine) {
        let _gate = lock(&self.gate);
        engine.set_diagnostic_sink(relay_diagnostic);
        trace!("diagnostic relay registered");
    }

    /// Route events to `log` until the returned guard is dropped. Blocks while
    /// another session holds the relay.
    pub(crate) fn activate(&self, log: &DiagnosticLog) -> RelayGuard<'_> {
        let gate = lock(&self.gate);
        *lock(&self.target) = Some(Arc::clone(log));
        trace!("diagnostic relay activated");
        RelayGuard {
            relay: self,
            _gate: gate,
        }
    }

    fn deactivate(&self) {
        lock(&self.target).take();
        trace!("diagnostic relay deactivated");
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        lock(&self.target).is_some()
    }

    /// Append `event` to the active session's log, or drop it when no session
    /// is active.
    pub(crate) fn dispatch(&self, event: DiagnosticEvent<'_>) {
        let target = lock(&self.target).clone();
        match target {
            Some(log) => lock(&log).push(Diagnostic::new(
                event.source_name,
                event.line,
                event.severity,
                event.message,
            )),
            None => warn!(
                severity = %event.severity,
                source = event.source_name,
                text = event.message,
                "diagnostic received with no active session, dropped"
            ),
        }
    }
}

/// Scoped routing window. Deactivates the relay, then releases the gate.
pub(crate) struct RelayGuard<'a> {
    relay: &'a Relay,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for RelayGuard<'_> {
    fn drop(&mut self) {
        self.relay.deactivate();
    }
}

/// The callback registered with every engine.
pub(crate) fn relay_diagnostic(event: DiagnosticEvent<'_>) {
    Relay::global().dispatch(event);
}
