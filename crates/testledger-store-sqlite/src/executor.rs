// crates/testledger-store-sqlite/src/executor.rs
// ============================================================================
// Module: Transactional Executor
// Description: Retrying transactions with savepoints, deadlines, and metrics.
// Purpose: Give every unit of work atomicity and bounded transient-failure retry.
// Dependencies: rand, rusqlite, tracing, testledger-core
// ============================================================================

//! ## Overview
//! [`TransactionalExecutor::run_in_transaction`] runs a unit of work inside
//! one `SQLite` transaction (`BEGIN IMMEDIATE` for writes, deferred for
//! reads). Retryable failure classes roll the attempt back and try again
//! after an exponential, jittered backoff; everything else propagates on the
//! first failure. Each attempt runs under a watchdog that interrupts the
//! connection once the attempt deadline passes, which surfaces as a timeout.
//!
//! Work closures receive a [`TxHandle`] that exposes the live connection,
//! the injected clock, and named savepoints.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use rusqlite::Connection;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use testledger_core::Clock;
use testledger_core::FailureClass;
use testledger_core::LedgerError;
use testledger_core::Timestamp;
use testledger_core::TransactionMetrics;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::TransactionConfig;
use crate::error::db_error;
use crate::pool::LedgerPool;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Jitter added on top of the exponential delay, as a fraction of it.
pub const JITTER_FRACTION: f64 = 0.3;
/// Maximum savepoint name length.
const MAX_SAVEPOINT_NAME_LENGTH: usize = 64;
/// Largest exponent applied to the base delay.
const MAX_BACKOFF_EXPONENT: u32 = 32;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Locking mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Takes the write lock up front (`BEGIN IMMEDIATE`).
    Write,
    /// Defers locking until the first statement.
    Read,
}

/// Per-call transaction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    /// Locking mode.
    pub mode: TxMode,
    /// Short label used in logs.
    pub label: &'static str,
}

impl TxOptions {
    /// Options for a write transaction.
    #[must_use]
    pub const fn write(label: &'static str) -> Self {
        Self {
            mode: TxMode::Write,
            label,
        }
    }

    /// Options for a read transaction.
    #[must_use]
    pub const fn read(label: &'static str) -> Self {
        Self {
            mode: TxMode::Read,
            label,
        }
    }
}

// ============================================================================
// SECTION: Backoff
// ============================================================================

/// Computes the delay before retry number `attempt` (zero-based).
///
/// `delay = min(base * 2^attempt + jitter_sample * 0.3 * base * 2^attempt, max)`
/// where `jitter_sample` is clamped to `[0, 1]`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "Delays are bounded by max_delay_ms and non-negative by construction."
)]
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64, jitter_sample: f64) -> Duration {
    let exponent = attempt.min(MAX_BACKOFF_EXPONENT);
    let exponential = base_ms.saturating_mul(1u64 << exponent);
    let sample = if jitter_sample.is_finite() { jitter_sample.clamp(0.0, 1.0) } else { 0.0 };
    let jitter = (exponential as f64 * JITTER_FRACTION * sample) as u64;
    Duration::from_millis(exponential.saturating_add(jitter).min(max_ms))
}

// ============================================================================
// SECTION: Savepoints
// ============================================================================

/// Result of work run inside a savepoint.
///
/// # Invariants
/// - `success` implies `result.is_some()` and `error.is_none()`.
#[derive(Debug)]
pub struct SavepointOutcome<T> {
    /// Whether the inner work succeeded and was released.
    pub success: bool,
    /// Inner result on success.
    pub result: Option<T>,
    /// Inner or savepoint error on failure.
    pub error: Option<LedgerError>,
}

/// Validates that a savepoint name is a plain SQL identifier.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] for empty, overlong, or non-identifier
/// names.
pub fn validate_savepoint_name(name: &str) -> Result<(), LedgerError> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(LedgerError::Validation("savepoint name must not be empty".to_string()));
    };
    if name.len() > MAX_SAVEPOINT_NAME_LENGTH {
        return Err(LedgerError::Validation(format!(
            "savepoint name exceeds {MAX_SAVEPOINT_NAME_LENGTH} characters"
        )));
    }
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(LedgerError::Validation(format!("invalid savepoint name: {name}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Transaction Handle
// ============================================================================

/// Live transaction handed to units of work.
pub struct TxHandle<'a> {
    /// Open transaction.
    tx: Transaction<'a>,
    /// Injected clock.
    clock: &'a dyn Clock,
    /// Metrics sink.
    metrics: &'a dyn TransactionMetrics,
}

impl TxHandle<'_> {
    /// Returns the connection executing this transaction.
    #[must_use]
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    /// Returns the current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Creates a named savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid names or a classified
    /// database error.
    pub fn savepoint(&self, name: &str) -> Result<(), LedgerError> {
        validate_savepoint_name(name)?;
        self.tx.execute_batch(&format!("SAVEPOINT {name};")).map_err(db_error)
    }

    /// Rolls back to a named savepoint, keeping it on the stack.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid names or a classified
    /// database error.
    pub fn rollback_to_savepoint(&self, name: &str) -> Result<(), LedgerError> {
        validate_savepoint_name(name)?;
        self.tx.execute_batch(&format!("ROLLBACK TO SAVEPOINT {name};")).map_err(db_error)?;
        self.metrics.record_savepoint_rollback();
        Ok(())
    }

    /// Releases a named savepoint, merging its work into the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid names or a classified
    /// database error.
    pub fn release_savepoint(&self, name: &str) -> Result<(), LedgerError> {
        validate_savepoint_name(name)?;
        self.tx.execute_batch(&format!("RELEASE SAVEPOINT {name};")).map_err(db_error)
    }

    /// Runs `inner` inside a savepoint without failing the transaction.
    ///
    /// On inner failure only the savepoint's work is rolled back; the outer
    /// transaction stays usable and the error is reported in the outcome.
    pub fn with_savepoint<T, F>(&self, name: &str, inner: F) -> SavepointOutcome<T>
    where
        F: FnOnce(&Self) -> Result<T, LedgerError>,
    {
        if let Err(error) = self.savepoint(name) {
            return SavepointOutcome {
                success: false,
                result: None,
                error: Some(error),
            };
        }
        match inner(self) {
            Ok(value) => match self.release_savepoint(name) {
                Ok(()) => SavepointOutcome {
                    success: true,
                    result: Some(value),
                    error: None,
                },
                Err(error) => SavepointOutcome {
                    success: false,
                    result: None,
                    error: Some(error),
                },
            },
            Err(error) => {
                if let Some(class) = error.failure_class() {
                    self.metrics.record_failure(class);
                }
                let cleanup = self
                    .rollback_to_savepoint(name)
                    .and_then(|()| self.release_savepoint(name));
                if let Err(cleanup_error) = cleanup {
                    debug!(savepoint = name, error = %cleanup_error, "savepoint cleanup failed");
                }
                SavepointOutcome {
                    success: false,
                    result: None,
                    error: Some(error),
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Retrying transaction runner shared by every ledger component.
#[derive(Clone)]
pub struct TransactionalExecutor {
    /// Connection pool.
    pool: LedgerPool,
    /// Retry and timeout settings.
    config: TransactionConfig,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Metrics sink.
    metrics: Arc<dyn TransactionMetrics>,
}

impl TransactionalExecutor {
    /// Creates an executor over `pool`.
    #[must_use]
    pub fn new(
        pool: LedgerPool,
        config: TransactionConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn TransactionMetrics>,
    ) -> Self {
        Self {
            pool,
            config,
            clock,
            metrics,
        }
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &LedgerPool {
        &self.pool
    }

    /// Returns the metrics sink.
    #[must_use]
    pub fn metrics(&self) -> &dyn TransactionMetrics {
        self.metrics.as_ref()
    }

    /// Returns the current time from the injected clock.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the retry settings.
    #[must_use]
    pub const fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Runs `work` in a transaction, retrying transient failures.
    ///
    /// `work` may run more than once; it must derive all effects from its
    /// arguments and the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] and other non-database errors
    /// from `work` unchanged, [`LedgerError::FatalDatabase`] for fatal
    /// classes, and [`LedgerError::TransientDatabase`] once retries are
    /// exhausted.
    pub fn run_in_transaction<T, F>(
        &self,
        options: TxOptions,
        mut work: F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut(&TxHandle<'_>) -> Result<T, LedgerError>,
    {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.run_attempt(options, &mut work) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            label = options.label,
                            attempts = attempt,
                            "transaction succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.is_retryable(&error) || attempt >= max_attempts {
                        return Err(error.into_terminal(attempt));
                    }
                    self.metrics.record_retry();
                    let delay = backoff_delay(
                        attempt - 1,
                        self.config.retry_base_delay_ms,
                        self.config.retry_max_delay_ms,
                        rand::thread_rng().gen_range(0.0 .. 1.0),
                    );
                    debug!(
                        label = options.label,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying transaction"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    /// Returns true when the error's class is configured to be retried.
    const fn is_retryable(&self, error: &LedgerError) -> bool {
        let LedgerError::Database {
            class, ..
        } = error
        else {
            return false;
        };
        match class {
            FailureClass::UniqueViolation => self.config.retry_on_constraint_violation,
            FailureClass::Deadlock => self.config.retry_on_deadlock,
            FailureClass::Timeout => true,
            FailureClass::Fatal => false,
        }
    }

    /// Runs one attempt under the attempt deadline and records metrics.
    fn run_attempt<T, F>(&self, options: TxOptions, work: &mut F) -> Result<T, LedgerError>
    where
        F: FnMut(&TxHandle<'_>) -> Result<T, LedgerError>,
    {
        let mut connection = self.pool.get()?;
        self.metrics.record_started();
        let started = Instant::now();
        let result = if self.config.attempt_timeout_ms == 0 {
            self.execute_attempt(&mut connection, options, work)
        } else {
            let interrupt = connection.get_interrupt_handle();
            let timeout = Duration::from_millis(self.config.attempt_timeout_ms);
            let (cancel, cancelled) = mpsc::channel::<()>();
            thread::scope(|scope| {
                scope.spawn(move || {
                    if matches!(cancelled.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                        interrupt.interrupt();
                    }
                });
                let result = self.execute_attempt(&mut connection, options, work);
                drop(cancel);
                result
            })
        };
        let elapsed = started.elapsed();
        if elapsed >= Duration::from_millis(self.config.long_transaction_threshold_ms) {
            warn!(
                label = options.label,
                elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                "long transaction"
            );
        }
        match &result {
            Ok(_) => self.metrics.record_committed(),
            Err(error) => {
                self.metrics.record_rolled_back();
                if let Some(class) = error.failure_class() {
                    self.metrics.record_failure(class);
                }
            }
        }
        result
    }

    /// Opens the transaction, runs the work, and commits.
    fn execute_attempt<T, F>(
        &self,
        connection: &mut Connection,
        options: TxOptions,
        work: &mut F,
    ) -> Result<T, LedgerError>
    where
        F: FnMut(&TxHandle<'_>) -> Result<T, LedgerError>,
    {
        let behavior = match options.mode {
            TxMode::Write => TransactionBehavior::Immediate,
            TxMode::Read => TransactionBehavior::Deferred,
        };
        let tx = connection.transaction_with_behavior(behavior).map_err(db_error)?;
        let handle = TxHandle {
            tx,
            clock: self.clock.as_ref(),
            metrics: self.metrics.as_ref(),
        };
        let value = work(&handle)?;
        let TxHandle {
            tx, ..
        } = handle;
        tx.commit().map_err(db_error)?;
        Ok(value)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
