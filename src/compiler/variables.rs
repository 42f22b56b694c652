//! External variable binding.

use crate::engine::{ContextHandle, PatternEngine};
use crate::error::{CompileError, Result};
use crate::value::Value;
use tracing::debug;

/// Forward an already-typed value to the engine's matching define call.
pub(crate) fn bind(
    engine: &dyn PatternEngine,
    context: ContextHandle,
    name: &str,
    value: &Value,
) -> Result<()> {
    let outcome = match value {
        Value::Boolean(b) => engine.define_boolean_variable(context, name, *b),
        Value::Integer(i) => engine.define_integer_variable(context, name, *i),
        Value::Text(s) => engine.define_string_variable(context, name, s),
    };

    outcome.map_err(|source| CompileError::EngineRejected {
        name: name.to_string(),
        source,
    })?;

    debug!(
        context = context.raw(),
        name,
        kind = value.kind(),
        "defined external variable"
    );
    Ok(())
}
