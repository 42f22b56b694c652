//! Session configuration.
//!
//! Configuration is a plain struct with sensible defaults and a couple of
//! presets. It can also be loaded from YAML, where missing keys fall back to
//! their defaults.

use crate::error::{CompileError, Result};
use serde::{Deserialize, Serialize};

/// Size of the buffer used to fetch the engine's last error message.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 1024;

/// Behaviour knobs for a compilation [`Session`](crate::Session).
///
/// # Examples
///
/// ```rust
/// use rule_session::SessionConfig;
///
/// let config = SessionConfig::default();
/// assert_eq!(config.message_capacity, 1024);
/// assert!(config.allow_empty);
///
/// let strict = SessionConfig::strict();
/// assert!(!strict.allow_empty);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity in bytes of the buffer handed to the engine when retrieving
    /// the formatted message of a failed add. Longer messages are truncated.
    ///
    /// **Default**: 1024
    pub message_capacity: usize,

    /// Whether a session with no sources may materialize into an empty
    /// ruleset. When false, `materialize` fails with `EmptySource`.
    ///
    /// **Default**: true
    pub allow_empty: bool,

    /// Emit every recorded diagnostic through `tracing` as it is surfaced.
    ///
    /// **Default**: true
    pub log_diagnostics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            allow_empty: true,
            log_diagnostics: true,
        }
    }
}

impl SessionConfig {
    /// Rejects empty sessions instead of producing an empty ruleset.
    pub fn strict() -> Self {
        Self {
            allow_empty: false,
            ..Self::default()
        }
    }

    /// Parse a configuration from YAML.
    ///
    /// ```rust
    /// use rule_session::SessionConfig;
    ///
    /// let config = SessionConfig::from_yaml("message_capacity: 256\n")?;
    /// assert_eq!(config.message_capacity, 256);
    /// assert!(config.allow_empty);
    /// # Ok::<(), rule_session::CompileError>(())
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SessionConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CompileError::Config(format!("Failed to parse YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.message_capacity < 2 {
            return Err(CompileError::Config(format!(
                "message_capacity must be at least 2 bytes, got {}",
                self.message_capacity
            )));
        }
        Ok(())
    }
}
