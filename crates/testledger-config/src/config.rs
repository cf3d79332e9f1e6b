// crates/testledger-config/src/config.rs
// ============================================================================
// Module: Test Ledger Configuration
// Description: Configuration loading and validation for the test ledger.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, testledger-store-sqlite, thiserror, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The path comes from the caller, then `TESTLEDGER_CONFIG`, then
//! `testledger.toml` in the working directory. Only the implicit default file
//! may be absent, in which case every section takes its defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use testledger_store_sqlite::BatchConfig;
use testledger_store_sqlite::SqliteLedgerConfig;
use testledger_store_sqlite::SqliteStoreMode;
use testledger_store_sqlite::SqliteSyncMode;
use testledger_store_sqlite::TransactionConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "testledger.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "TESTLEDGER_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default database file.
const DEFAULT_STORE_PATH: &str = "testledger.db";
/// Log levels accepted by `[logging] level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Root `testledger.toml` model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LedgerConfig {
    /// Database settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Transaction retry settings.
    #[serde(default)]
    pub transactions: TransactionConfig,
    /// Run batching settings.
    #[serde(default)]
    pub batching: BatchConfig,
    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LedgerConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let source = resolve_path(path, env::var(CONFIG_ENV_VAR).ok())?;
        validate_path(source.path())?;
        let bytes = match fs::read(source.path()) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound && source.is_implicit() => {
                return Ok(Self::default());
            }
            Err(err) => return Err(ConfigError::Io(err.to_string())),
        };
        Self::from_bytes(&bytes)
    }

    /// Parses and validates configuration from raw file contents.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the contents are oversized, not UTF-8,
    /// malformed, or invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any section is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.logging.validate()?;
        self.store_config().validate().map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Builds the store configuration consumed by the `SQLite` ledger.
    #[must_use]
    pub fn store_config(&self) -> SqliteLedgerConfig {
        let mut config = SqliteLedgerConfig::new(&self.store.path);
        config.busy_timeout_ms = self.store.busy_timeout_ms;
        config.journal_mode = self.store.journal_mode;
        config.sync_mode = self.store.sync_mode;
        config.pool_size = self.store.pool_size;
        config.pool_timeout_ms = self.store.pool_timeout_ms;
        config.transaction = self.transactions;
        config.batching = self.batching;
        config
    }
}

// ============================================================================
// SECTION: Store Section
// ============================================================================

/// `[store]` section.
///
/// Omitted fields take the `SQLite` ledger's own defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    pub sync_mode: SqliteSyncMode,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// Pool checkout timeout in milliseconds.
    pub pool_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let defaults = SqliteLedgerConfig::new(DEFAULT_STORE_PATH);
        Self {
            path: defaults.path,
            busy_timeout_ms: defaults.busy_timeout_ms,
            journal_mode: defaults.journal_mode,
            sync_mode: defaults.sync_mode,
            pool_size: defaults.pool_size,
            pool_timeout_ms: defaults.pool_timeout_ms,
        }
    }
}

impl StoreConfig {
    /// Validates the database path against length limits.
    fn validate(&self) -> Result<(), ConfigError> {
        let text = self.path.to_string_lossy();
        if text.trim().is_empty() {
            return Err(ConfigError::Invalid("store.path must be non-empty".to_string()));
        }
        validate_path(&self.path)
    }
}

// ============================================================================
// SECTION: Logging Section
// ============================================================================

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Line encoding.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingConfig {
    /// Rejects unknown level names.
    fn validate(&self) -> Result<(), ConfigError> {
        let level = self.level.trim().to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Where the config path came from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    /// Named by the caller or the environment; must exist.
    Explicit(PathBuf),
    /// The default file name; may be absent.
    Implicit(PathBuf),
}

impl ConfigSource {
    /// Returns the resolved path.
    fn path(&self) -> &Path {
        match self {
            Self::Explicit(path) | Self::Implicit(path) => path,
        }
    }

    /// Returns true for the default file name.
    const fn is_implicit(&self) -> bool {
        matches!(self, Self::Implicit(_))
    }
}

/// Resolves the config path from the caller, the environment, or the default.
fn resolve_path(
    path: Option<&Path>,
    env_path: Option<String>,
) -> Result<ConfigSource, ConfigError> {
    if let Some(path) = path {
        return Ok(ConfigSource::Explicit(path.to_path_buf()));
    }
    if let Some(env_path) = env_path {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(ConfigSource::Explicit(PathBuf::from(env_path)));
    }
    Ok(ConfigSource::Implicit(PathBuf::from(DEFAULT_CONFIG_NAME)))
}

/// Validates a path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Returns the default log level.
fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
