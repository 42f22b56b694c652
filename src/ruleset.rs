//! The compiled, shareable ruleset.

use crate::engine::{PatternEngine, RuleInfo, RulesetHandle};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Immutable compiled artifact handed to the scanning subsystem.
///
/// Cloning is cheap and shares the same engine ruleset. The engine ruleset
/// is destroyed exactly once, when the last clone is dropped or released;
/// it does not depend on the [`Session`](crate::Session) that produced it.
#[derive(Clone)]
pub struct Ruleset {
    inner: Arc<RulesetInner>,
}

struct RulesetInner {
    engine: Arc<dyn PatternEngine>,
    handle: RulesetHandle,
    rules: Vec<RuleInfo>,
}

impl Drop for RulesetInner {
    fn drop(&mut self) {
        self.engine.destroy_ruleset(self.handle);
        debug!(ruleset = self.handle.raw(), "destroyed ruleset");
    }
}

impl Ruleset {
    /// Take ownership of a freshly materialized engine ruleset.
    pub(crate) fn new(
        engine: Arc<dyn PatternEngine>,
        handle: RulesetHandle,
        rules: Vec<RuleInfo>,
    ) -> Self {
        Self {
            inner: Arc::new(RulesetInner {
                engine,
                handle,
                rules,
            }),
        }
    }

    /// The engine handle, valid for as long as this value is alive.
    pub fn handle(&self) -> RulesetHandle {
        self.inner.handle
    }

    pub fn rules(&self) -> &[RuleInfo] {
        &self.inner.rules
    }

    pub fn rule_count(&self) -> usize {
        self.inner.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rules.is_empty()
    }

    /// Namespaces that contributed at least one rule.
    pub fn namespaces(&self) -> BTreeSet<&str> {
        self.inner
            .rules
            .iter()
            .map(|rule| rule.namespace.as_str())
            .collect()
    }

    pub fn get(&self, namespace: &str, identifier: &str) -> Option<&RuleInfo> {
        self.inner
            .rules
            .iter()
            .find(|rule| rule.namespace == namespace && rule.identifier == identifier)
    }

    /// Number of live holders sharing this ruleset.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Give up this holder's reference. The engine ruleset is destroyed if
    /// this was the last one.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ruleset")
            .field("handle", &self.inner.handle)
            .field("rules", &self.inner.rules.len())
            .field("holders", &self.holders())
            .finish()
    }
}
