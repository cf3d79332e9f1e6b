// crates/testledger-core/src/interfaces/mod.rs
// ============================================================================
// Module: Test Ledger Interfaces
// Description: Error taxonomy, clock, and metrics sink contracts.
// Purpose: Define the seams stores and hosts plug into.
// Dependencies: serde, thiserror, crate::core
// ============================================================================

//! ## Overview
//! Interfaces keep the core backend-agnostic. Stores classify raw backend
//! failures into [`FailureClass`] and surface them through [`LedgerError`].
//! Hosts inject time through [`Clock`] and observe transactions through a
//! [`TransactionMetrics`] sink.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Failure Classes
// ============================================================================

/// Classified database failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Unique or primary key constraint violation.
    UniqueViolation,
    /// Lock conflict between transactions.
    Deadlock,
    /// Busy database, interrupted statement, or pool checkout timeout.
    Timeout,
    /// Anything not worth retrying.
    Fatal,
}

impl FailureClass {
    /// Returns true for classes that can succeed on retry.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UniqueViolation => "unique_violation",
            Self::Deadlock => "deadlock",
            Self::Timeout => "timeout",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by ledger operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Input rejected before touching the database.
    #[error("validation error: {0}")]
    Validation(String),
    /// Classified failure raised inside a unit of work.
    #[error("database error ({class}): {message}")]
    Database {
        /// Failure class.
        class: FailureClass,
        /// Backend message.
        message: String,
    },
    /// Transient failure that outlived every retry.
    #[error("transient database error ({class}) after {attempts} attempt(s): {message}")]
    TransientDatabase {
        /// Failure class of the last attempt.
        class: FailureClass,
        /// Attempts made.
        attempts: u32,
        /// Backend message of the last attempt.
        message: String,
    },
    /// Failure that is never retried.
    #[error("fatal database error: {0}")]
    FatalDatabase(String),
    /// Chunk failure surfaced because the caller asked to stop on error.
    #[error("batch {batch_index} failed ({failed_batches} failed batch(es)): {message}")]
    PartialBatchFailure {
        /// Zero-based chunk index.
        batch_index: usize,
        /// Chunks failed so far.
        failed_batches: usize,
        /// Rendered chunk error.
        message: String,
    },
}

impl LedgerError {
    /// Builds a classified database error.
    #[must_use]
    pub fn database(class: FailureClass, message: impl Into<String>) -> Self {
        Self::Database {
            class,
            message: message.into(),
        }
    }

    /// Returns the failure class carried by database errors.
    #[must_use]
    pub const fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::Database {
                class, ..
            }
            | Self::TransientDatabase {
                class, ..
            } => Some(*class),
            Self::FatalDatabase(_) => Some(FailureClass::Fatal),
            Self::Validation(_)
            | Self::PartialBatchFailure {
                ..
            } => None,
        }
    }

    /// Returns true when the datastore itself failed.
    #[must_use]
    pub const fn is_datastore_failure(&self) -> bool {
        matches!(
            self,
            Self::Database { .. } | Self::TransientDatabase { .. } | Self::FatalDatabase(_)
        )
    }

    /// Converts a raw classified error into its terminal form.
    ///
    /// Transient classes become [`LedgerError::TransientDatabase`] carrying
    /// the attempt count; fatal classes become [`LedgerError::FatalDatabase`].
    /// Other variants pass through.
    #[must_use]
    pub fn into_terminal(self, attempts: u32) -> Self {
        match self {
            Self::Database {
                class: FailureClass::Fatal,
                message,
            } => Self::FatalDatabase(message),
            Self::Database {
                class,
                message,
            } => Self::TransientDatabase {
                class,
                attempts,
                message,
            },
            other => other,
        }
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

// ============================================================================
// SECTION: Transaction Metrics
// ============================================================================

/// Point-in-time transaction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetricsSnapshot {
    /// Transaction attempts started.
    pub started: u64,
    /// Attempts committed.
    pub committed: u64,
    /// Attempts rolled back.
    pub rolled_back: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Unique violations observed.
    pub constraint_violations: u64,
    /// Lock conflicts observed.
    pub deadlocks: u64,
    /// Timeouts observed.
    pub timeouts: u64,
    /// Rollbacks to a savepoint.
    pub savepoint_rollbacks: u64,
}

/// Sink for transaction counters.
pub trait TransactionMetrics: Send + Sync {
    /// Records a started attempt.
    fn record_started(&self);
    /// Records a committed attempt.
    fn record_committed(&self);
    /// Records a rolled back attempt.
    fn record_rolled_back(&self);
    /// Records a scheduled retry.
    fn record_retry(&self);
    /// Records a classified failure.
    fn record_failure(&self, class: FailureClass);
    /// Records a rollback to a savepoint.
    fn record_savepoint_rollback(&self);
    /// Returns current counters.
    fn snapshot(&self) -> TransactionMetricsSnapshot;
    /// Resets all counters to zero.
    fn reset(&self);
}
