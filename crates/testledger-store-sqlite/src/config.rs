// crates/testledger-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Ledger Configuration
// Description: Store, transaction, and batching settings for the SQLite ledger.
// Purpose: Centralize tunables with safe defaults and fail-closed validation.
// Dependencies: serde, testledger-core
// ============================================================================

//! ## Overview
//! [`SqliteLedgerConfig`] carries everything the ledger needs to open its
//! database, size its connection pool, retry transactions, and split large
//! runs into batches. Every field has a default; [`SqliteLedgerConfig::validate`]
//! rejects values that would make the ledger unusable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use testledger_core::LedgerError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default connection pool size.
const DEFAULT_POOL_SIZE: u32 = 8;
/// Default pool checkout timeout (ms).
const DEFAULT_POOL_TIMEOUT_MS: u64 = 30_000;
/// Default retry budget after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default base backoff delay (ms).
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
/// Default backoff ceiling (ms).
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
/// Default per-attempt execution timeout (ms).
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 30_000;
/// Default long transaction warning threshold (ms).
const DEFAULT_LONG_TRANSACTION_THRESHOLD_MS: u64 = 5_000;
/// Default outcomes per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Upper bound on the configurable pool size.
pub const MAX_POOL_SIZE: u32 = 64;
/// Upper bound on the configurable retry budget.
pub const MAX_RETRIES_LIMIT: u32 = 20;
/// Upper bound on the configurable batch size.
pub const MAX_BATCH_SIZE: usize = 10_000;

// ============================================================================
// SECTION: Pragma Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended for concurrent writers).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Transaction Settings
// ============================================================================

/// Retry and timeout settings for the transactional executor.
///
/// # Invariants
/// - `retry_base_delay_ms <= retry_max_delay_ms`.
/// - `attempt_timeout_ms == 0` disables the per-attempt deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionConfig {
    /// Retries allowed after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Whether unique violations are retried.
    #[serde(default = "default_true")]
    pub retry_on_constraint_violation: bool,
    /// Whether lock conflicts are retried.
    #[serde(default = "default_true")]
    pub retry_on_deadlock: bool,
    /// Per-attempt execution timeout in milliseconds.
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Attempts slower than this are logged at warn level.
    #[serde(default = "default_long_transaction_threshold_ms")]
    pub long_transaction_threshold_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            retry_on_constraint_violation: true,
            retry_on_deadlock: true,
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
            long_transaction_threshold_ms: DEFAULT_LONG_TRANSACTION_THRESHOLD_MS,
        }
    }
}

impl TransactionConfig {
    /// Validates retry and timeout settings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] when a setting is out of range.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(LedgerError::Validation(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(LedgerError::Validation(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Batch Settings
// ============================================================================

/// Settings controlling how runs are split into transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Whether large runs are split into chunks.
    #[serde(default = "default_true")]
    pub enable_batching: bool,
    /// Outcomes per chunk; runs smaller than this use one transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Whether the first chunk failure aborts the run.
    #[serde(default)]
    pub throw_on_error: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enable_batching: true,
            batch_size: DEFAULT_BATCH_SIZE,
            throw_on_error: false,
        }
    }
}

impl BatchConfig {
    /// Validates batch settings.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] when the batch size is out of range.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(LedgerError::Validation(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Ledger Settings
// ============================================================================

/// Configuration for the `SQLite` test ledger.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `pool_size` is between 1 and [`MAX_POOL_SIZE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteLedgerConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Maximum pooled connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Pool checkout timeout in milliseconds.
    #[serde(default = "default_pool_timeout_ms")]
    pub pool_timeout_ms: u64,
    /// Transaction retry settings.
    #[serde(default)]
    pub transaction: TransactionConfig,
    /// Batching settings.
    #[serde(default)]
    pub batching: BatchConfig,
}

impl SqliteLedgerConfig {
    /// Creates a configuration for `path` with default settings.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            pool_size: DEFAULT_POOL_SIZE,
            pool_timeout_ms: DEFAULT_POOL_TIMEOUT_MS,
            transaction: TransactionConfig::default(),
            batching: BatchConfig::default(),
        }
    }

    /// Validates every nested setting.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.path.as_os_str().is_empty() {
            return Err(LedgerError::Validation("store path must not be empty".to_string()));
        }
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(LedgerError::Validation(format!(
                "pool_size must be between 1 and {MAX_POOL_SIZE}"
            )));
        }
        if self.pool_timeout_ms == 0 {
            return Err(LedgerError::Validation(
                "pool_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.transaction.validate()?;
        self.batching.validate()
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default pool size.
const fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

/// Returns the default pool checkout timeout.
const fn default_pool_timeout_ms() -> u64 {
    DEFAULT_POOL_TIMEOUT_MS
}

/// Returns the default retry budget.
const fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Returns the default base backoff delay.
const fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

/// Returns the default backoff ceiling.
const fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

/// Returns the default per-attempt timeout.
const fn default_attempt_timeout_ms() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT_MS
}

/// Returns the default long transaction threshold.
const fn default_long_transaction_threshold_ms() -> u64 {
    DEFAULT_LONG_TRANSACTION_THRESHOLD_MS
}

/// Returns the default batch size.
const fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Returns `true` for boolean settings that default on.
const fn default_true() -> bool {
    true
}
