// crates/testledger-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Ledger Schema
// Description: Versioned DDL for suites, runs, identities, history, and results.
// Purpose: Create the ledger schema once and refuse unknown versions.
// Dependencies: rusqlite, testledger-core
// ============================================================================

//! ## Overview
//! The schema encodes the ledger invariants the database can enforce on its
//! own:
//! - `test_runs` checks `total = passed + failed + skipped`.
//! - `tests.slug` is unique.
//! - a partial unique index allows one open history interval per test.
//! - triggers make `test_results` append-only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use testledger_core::LedgerError;

use crate::error::db_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the ledger.
pub const SCHEMA_VERSION: i64 = 1;

/// Ledger tables, indexes, and triggers.
const LEDGER_DDL: &str = "
CREATE TABLE IF NOT EXISTS test_suites (
    suite_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS test_runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    suite_id INTEGER REFERENCES test_suites(suite_id),
    environment TEXT NOT NULL,
    branch TEXT,
    commit_sha TEXT,
    commit_message TEXT,
    triggered_by TEXT,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    total INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    persisted_count INTEGER NOT NULL DEFAULT 0,
    failed_batches INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    CHECK (passed >= 0 AND failed >= 0 AND skipped >= 0),
    CHECK (total = passed + failed + skipped)
);
CREATE INDEX IF NOT EXISTS idx_test_runs_started
    ON test_runs (started_at DESC, run_id DESC);
CREATE TABLE IF NOT EXISTS run_suites (
    run_id INTEGER NOT NULL REFERENCES test_runs(run_id),
    suite_id INTEGER NOT NULL REFERENCES test_suites(suite_id),
    position INTEGER NOT NULL,
    PRIMARY KEY (run_id, suite_id)
);
CREATE TABLE IF NOT EXISTS tests (
    test_id INTEGER PRIMARY KEY AUTOINCREMENT,
    slug TEXT NOT NULL UNIQUE,
    hash TEXT NOT NULL,
    current_name TEXT NOT NULL,
    current_description TEXT,
    suite_name TEXT NOT NULL,
    test_file TEXT,
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    total_runs INTEGER NOT NULL DEFAULT 0,
    deleted_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_tests_suite_active
    ON tests (suite_name, deleted_at);
CREATE TABLE IF NOT EXISTS test_history (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL REFERENCES tests(test_id),
    name TEXT NOT NULL,
    description TEXT,
    hash TEXT NOT NULL,
    valid_from INTEGER NOT NULL,
    valid_to INTEGER,
    CHECK (valid_to IS NULL OR valid_to >= valid_from)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_test_history_open
    ON test_history (test_id) WHERE valid_to IS NULL;
CREATE TABLE IF NOT EXISTS test_results (
    result_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES test_runs(run_id),
    test_id INTEGER NOT NULL REFERENCES tests(test_id),
    position INTEGER NOT NULL,
    suite_name TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    hash TEXT NOT NULL,
    endpoint TEXT,
    method TEXT,
    status_code INTEGER,
    status TEXT NOT NULL CHECK (status IN ('passed', 'failed', 'skipped')),
    duration_ms INTEGER NOT NULL,
    error_message TEXT,
    stack_trace TEXT,
    recorded_at INTEGER NOT NULL,
    UNIQUE (run_id, position)
);
CREATE INDEX IF NOT EXISTS idx_test_results_test
    ON test_results (test_id, run_id);
CREATE TRIGGER IF NOT EXISTS test_results_no_update
    BEFORE UPDATE ON test_results
BEGIN
    SELECT RAISE(ABORT, 'test_results rows are immutable');
END;
CREATE TRIGGER IF NOT EXISTS test_results_no_delete
    BEFORE DELETE ON test_results
BEGIN
    SELECT RAISE(ABORT, 'test_results rows are immutable');
END;
CREATE TABLE IF NOT EXISTS test_deletions (
    deletion_id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id INTEGER NOT NULL REFERENCES tests(test_id),
    deleted_by_run_id INTEGER REFERENCES test_runs(run_id),
    deleted_at INTEGER NOT NULL,
    restored_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_test_deletions_test
    ON test_deletions (test_id, restored_at);
";

// ============================================================================
// SECTION: Initialization
// ============================================================================

/// Initializes the ledger schema or validates the existing version.
///
/// # Errors
///
/// Returns [`LedgerError::FatalDatabase`] when the stored version is not
/// supported, or a classified database error when DDL fails.
pub fn initialize_schema(connection: &mut Connection) -> Result<(), LedgerError> {
    let tx = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(LEDGER_DDL).map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(LedgerError::FatalDatabase(format!(
                "unsupported ledger schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
