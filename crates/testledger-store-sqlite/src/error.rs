// crates/testledger-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Failure Classification
// Description: Maps rusqlite and pool errors onto ledger failure classes.
// Purpose: Decide which database failures are worth retrying.
// Dependencies: r2d2, rusqlite, testledger-core
// ============================================================================

//! ## Overview
//! Classification reads the primary and extended `SQLite` result codes:
//!
//! | `SQLite` result | Class |
//! |---|---|
//! | `CONSTRAINT_UNIQUE`, `CONSTRAINT_PRIMARYKEY` | unique violation |
//! | any other constraint | fatal |
//! | `LOCKED` | deadlock |
//! | `BUSY`, `INTERRUPT` | timeout |
//! | everything else | fatal |
//!
//! Pool checkout failures are timeouts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::ErrorCode;
use testledger_core::FailureClass;
use testledger_core::LedgerError;

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Classifies a rusqlite error.
#[must_use]
pub fn classify_sqlite_error(error: &rusqlite::Error) -> FailureClass {
    let rusqlite::Error::SqliteFailure(failure, _) = error else {
        return FailureClass::Fatal;
    };
    match failure.code {
        ErrorCode::ConstraintViolation => {
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                FailureClass::UniqueViolation
            } else {
                FailureClass::Fatal
            }
        }
        ErrorCode::DatabaseLocked => FailureClass::Deadlock,
        ErrorCode::DatabaseBusy | ErrorCode::OperationInterrupted => FailureClass::Timeout,
        _ => FailureClass::Fatal,
    }
}

/// Converts a rusqlite error into a classified ledger error.
#[must_use]
pub fn db_error(error: rusqlite::Error) -> LedgerError {
    LedgerError::database(classify_sqlite_error(&error), error.to_string())
}

/// Converts a pool checkout failure into a timeout.
#[must_use]
pub fn pool_error(error: &r2d2::Error) -> LedgerError {
    LedgerError::database(FailureClass::Timeout, format!("connection pool: {error}"))
}

/// Converts a stored integer into an unsigned count.
///
/// # Errors
///
/// Returns [`LedgerError::FatalDatabase`] when the stored value is negative.
pub fn stored_count(value: i64, column: &str) -> Result<u64, LedgerError> {
    u64::try_from(value)
        .map_err(|_| LedgerError::FatalDatabase(format!("negative value in {column}: {value}")))
}

/// Converts an unsigned count into a storable integer.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] when the value exceeds `i64::MAX`.
pub fn sql_count(value: u64, field: &str) -> Result<i64, LedgerError> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Validation(format!("{field} too large to store: {value}")))
}

/// Converts an in-memory index into a storable integer.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] when the index exceeds `i64::MAX`.
pub fn sql_index(value: usize, field: &str) -> Result<i64, LedgerError> {
    i64::try_from(value)
        .map_err(|_| LedgerError::Validation(format!("{field} too large to store: {value}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use rusqlite::Connection;
    use testledger_core::FailureClass;

    use super::classify_sqlite_error;

    fn failing(sql: &str) -> rusqlite::Error {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, slug TEXT UNIQUE, n INTEGER CHECK (n > 0));
                 INSERT INTO t (id, slug, n) VALUES (1, 'a', 1);",
            )
            .unwrap();
        connection.execute_batch(sql).unwrap_err()
    }

    /// Verifies unique and primary key violations are retryable uniqueness failures.
    #[test]
    fn unique_constraints_classify_as_unique_violation() {
        let unique = failing("INSERT INTO t (id, slug, n) VALUES (2, 'a', 1);");
        assert_eq!(classify_sqlite_error(&unique), FailureClass::UniqueViolation);
        let primary = failing("INSERT INTO t (id, slug, n) VALUES (1, 'b', 1);");
        assert_eq!(classify_sqlite_error(&primary), FailureClass::UniqueViolation);
    }

    /// Verifies other constraint failures are fatal.
    #[test]
    fn check_constraints_classify_as_fatal() {
        let check = failing("INSERT INTO t (id, slug, n) VALUES (3, 'c', 0);");
        assert_eq!(classify_sqlite_error(&check), FailureClass::Fatal);
        let missing = failing("SELECT * FROM nowhere;");
        assert_eq!(classify_sqlite_error(&missing), FailureClass::Fatal);
    }

    /// Verifies non-engine errors are fatal.
    #[test]
    fn conversion_errors_classify_as_fatal() {
        assert_eq!(
            classify_sqlite_error(&rusqlite::Error::QueryReturnedNoRows),
            FailureClass::Fatal
        );
    }
}
