//! Environment-driven configuration for the custody primitives.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: a config passed to [`init`] before first use
//! 2. **Environment variables**: values from `CUSTODY_*` env vars
//! 3. **Defaults**: built-in defaults from [`CoreConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CUSTODY_DEFAULT_RETRIES` | `u32` | `default_retries` |
//! | `CUSTODY_BACKEND_ENABLED` | `bool` | `backend_enabled` |
//! | `CUSTODY_TRACE_LOCK_EVENTS` | `bool` | `trace_lock_events` |

use std::sync::OnceLock;

/// Environment variable name for the default retry budget.
pub const ENV_DEFAULT_RETRIES: &str = "CUSTODY_DEFAULT_RETRIES";
/// Environment variable name for the acceleration backend toggle.
pub const ENV_BACKEND_ENABLED: &str = "CUSTODY_BACKEND_ENABLED";
/// Environment variable name for lock state-transition tracing.
pub const ENV_TRACE_LOCK_EVENTS: &str = "CUSTODY_TRACE_LOCK_EVENTS";

/// Built-in default for `default_retries`.
pub const DEFAULT_RETRIES: u32 = 3;

/// Errors raised while resolving configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// The offending variable name.
        var: &'static str,
        /// The raw value that failed to parse.
        value: String,
    },
    /// The global config was already initialized.
    #[error("configuration already initialized")]
    AlreadyInitialized,
}

/// Configuration shared by the custody primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Retry budget used by `SharedLockedCell::set_async` when the caller's
    /// policy does not override it.
    pub default_retries: u32,
    /// Whether installed acceleration backends are honored. When false,
    /// every cell is constructed on the pure path.
    pub backend_enabled: bool,
    /// Emit a trace event on every lock state transition.
    pub trace_lock_events: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_retries: DEFAULT_RETRIES,
            backend_enabled: true,
            trace_lock_events: false,
        }
    }
}

impl CoreConfig {
    /// Builds a config from defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

/// Apply environment variable overrides to a [`CoreConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut CoreConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_DEFAULT_RETRIES) {
        config.default_retries = parse_u32(ENV_DEFAULT_RETRIES, &val)?;
    }
    if let Some(val) = read_env(ENV_BACKEND_ENABLED) {
        config.backend_enabled = parse_bool(ENV_BACKEND_ENABLED, &val)?;
    }
    if let Some(val) = read_env(ENV_TRACE_LOCK_EVENTS) {
        config.trace_lock_events = parse_bool(ENV_TRACE_LOCK_EVENTS, &val)?;
    }
    Ok(())
}

static GLOBAL: OnceLock<CoreConfig> = OnceLock::new();

/// Installs the given config as the process-wide default.
///
/// Must be called before any primitive consults the config; later calls
/// fail with [`ConfigError::AlreadyInitialized`].
pub fn init(config: CoreConfig) -> Result<(), ConfigError> {
    GLOBAL
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)
}

/// Returns the process-wide config.
///
/// Resolved on first access from [`CoreConfig::from_env`]; unparseable
/// environment values fall back to the defaults rather than aborting.
pub fn global() -> &'static CoreConfig {
    GLOBAL.get_or_init(|| CoreConfig::from_env().unwrap_or_default())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_u32(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}
