// crates/testledger-store-sqlite/tests/run_persistence.rs
// ============================================================================
// Module: Run Persistence Tests
// Description: Single-transaction and batched run persistence.
// Purpose: Validate atomicity, chunk isolation, and stored run bookkeeping.
// Dependencies: testledger-core, testledger-store-sqlite, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Failures are injected with `SQLite` triggers that abort result inserts for
//! a chosen test name, so the production code path fails exactly where a
//! real constraint or I/O failure would.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use rusqlite::params;
use testledger_core::LedgerError;
use testledger_core::PersistMode;
use testledger_core::RunCounts;
use testledger_core::Slug;
use testledger_core::TestStatus;
use testledger_core::TransactionMetrics;
use testledger_store_sqlite::SCHEMA_VERSION;
use testledger_store_sqlite::SqliteLedgerConfig;
use testledger_store_sqlite::SqliteTestLedger;

use crate::common::harness;
use crate::common::harness_with;
use crate::common::meta_on_day;
use crate::common::numbered_outcomes;
use crate::common::outcome;
use crate::common::outcome_with_slug;

// ============================================================================
// SECTION: Single Transaction
// ============================================================================

/// Verifies a small run commits header, results, and counts together.
#[test]
fn small_run_commits_in_one_transaction() {
    let h = harness();
    let outcomes = vec![
        outcome("users", "a", TestStatus::Passed),
        outcome("users", "b", TestStatus::Failed),
        outcome("orders", "c", TestStatus::Skipped),
    ];
    let summary = h.persist_on_day(0, &outcomes);

    assert_eq!(summary.mode, PersistMode::SingleTransaction);
    assert!(summary.is_complete());
    assert_eq!(summary.processed_count, 3);
    assert_eq!(summary.succeeded_batches, 1);

    let page = h.ledger.list_runs(10, None).unwrap();
    assert_eq!(page.runs.len(), 1);
    let run = &page.runs[0];
    assert_eq!(run.suite_name.as_deref(), Some("users"));
    assert_eq!(run.counts, RunCounts {
        total: 3,
        passed: 1,
        failed: 1,
        skipped: 1,
    });
    assert_eq!(run.persisted_count, 3);

    let results = h.ledger.run_results(summary.run_id).unwrap();
    let positions: Vec<u64> = results.iter().map(|result| result.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(results[2].suite_name, "orders");

    let detail = h.ledger.get_run_detail(summary.run_id).unwrap().unwrap();
    assert_eq!(detail.metadata.suites, vec!["users".to_string(), "orders".to_string()]);
    assert_eq!(detail.metadata.triggered_by.as_deref(), Some("ci"));
}

/// Verifies a failure mid-run leaves no trace of a small run.
#[test]
fn small_run_failure_rolls_back_everything() {
    let h = harness();
    h.fail_results_named("boom");
    let outcomes = vec![
        outcome("users", "a", TestStatus::Passed),
        outcome("users", "boom", TestStatus::Passed),
        outcome("users", "c", TestStatus::Passed),
    ];
    let meta = meta_on_day(0);
    let error = h.ledger.persist_run(&meta, &outcomes).unwrap_err();

    assert!(matches!(error, LedgerError::FatalDatabase(_)), "unexpected error: {error}");
    assert_eq!(h.count("SELECT COUNT(*) FROM test_runs"), 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM tests"), 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_suites"), 0);
    assert_eq!(outcomes.len(), 3);
}

/// Verifies invalid input is rejected before any write.
#[test]
fn invalid_input_writes_nothing() {
    let h = harness();
    let mut meta = meta_on_day(0);
    meta.environment = " ".to_string();
    let error = h.ledger.persist_run(&meta, &[outcome("users", "a", TestStatus::Passed)]);
    assert!(matches!(error, Err(LedgerError::Validation(_))));

    let meta = meta_on_day(0);
    let blank_slug = outcome_with_slug("users", "a", "   ", TestStatus::Passed);
    let error = h.ledger.persist_run(&meta, &[blank_slug]);
    assert!(matches!(error, Err(LedgerError::Validation(_))));
    assert_eq!(h.count("SELECT COUNT(*) FROM test_runs"), 0);
    assert_eq!(h.metrics.snapshot().started, 0);
}

/// Verifies suite descriptions are stored and never erased by later runs.
#[test]
fn suite_descriptions_are_upserted() {
    let h = harness();
    let mut meta = meta_on_day(0);
    meta.suite_descriptions.insert("users".to_string(), "User API".to_string());
    h.ledger.persist_run(&meta, &[outcome("users", "a", TestStatus::Passed)]).unwrap();
    h.persist_on_day(1, &[outcome("users", "a", TestStatus::Passed)]);

    let description: Option<String> = h
        .raw()
        .query_row("SELECT description FROM test_suites WHERE name = 'users'", params![], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(description.as_deref(), Some("User API"));
    assert_eq!(h.count("SELECT COUNT(*) FROM test_suites"), 1);
}

// ============================================================================
// SECTION: Batched
// ============================================================================

/// Verifies a failing chunk is isolated and reported.
#[test]
fn failing_chunk_is_isolated() {
    let h = harness();
    h.persist_on_day(0, &[outcome("load", "t120", TestStatus::Passed)]);
    h.fail_results_named("t150");
    let outcomes = numbered_outcomes("load", 250);
    let summary = h.persist_on_day(1, &outcomes);

    assert_eq!(summary.mode, PersistMode::Batched);
    assert_eq!(summary.total_count, 250);
    assert_eq!(summary.processed_count, 150);
    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.succeeded_batches, 2);
    assert_eq!(summary.batch_failures.len(), 1);
    assert_eq!(summary.batch_failures[0].batch_index, 1);
    assert_eq!(summary.batch_failures[0].first_position, 100);
    assert_eq!(summary.batch_failures[0].outcome_count, 100);
    assert!(!summary.is_complete());

    let results = h.ledger.run_results(summary.run_id).unwrap();
    assert_eq!(results.len(), 150);
    assert_eq!(results[99].position, 99);
    assert_eq!(results[100].position, 200);

    assert!(summary.deleted_tests.is_empty());
    let survivor = h.ledger.test_by_slug(&Slug::new("load:t120")).unwrap().unwrap();
    assert!(!survivor.is_deleted());

    let run = h.ledger.list_runs(1, None).unwrap().runs.remove(0);
    assert_eq!(run.persisted_count, 150);
    assert_eq!(run.failed_batches, 1);
    assert_eq!(run.counts.total, 250);
}

/// Verifies a failed reconciliation still reports and records committed chunks.
#[test]
fn failed_reconciliation_keeps_batched_progress() {
    let h = harness();
    h.persist_on_day(0, &[outcome("load", "gone", TestStatus::Passed)]);
    h.raw()
        .execute_batch(
            "CREATE TRIGGER inject_reconcile_failure BEFORE INSERT ON test_deletions
             BEGIN SELECT RAISE(ABORT, 'injected reconcile failure'); END;",
        )
        .unwrap();
    let outcomes = numbered_outcomes("load", 250);
    let summary = h.persist_on_day(1, &outcomes);

    assert_eq!(summary.mode, PersistMode::Batched);
    assert_eq!(summary.processed_count, 250);
    assert_eq!(summary.failed_batches, 0);
    assert!(summary.deleted_tests.is_empty());
    assert!(summary.reconcile_error.as_deref().unwrap().contains("injected reconcile failure"));
    assert!(!summary.is_complete());

    assert_eq!(h.count("SELECT COUNT(*) FROM test_runs"), 2);
    assert_eq!(
        h.count(&format!(
            "SELECT COUNT(*) FROM test_results WHERE run_id = {}",
            summary.run_id.get()
        )),
        250
    );
    assert_eq!(
        h.count(&format!(
            "SELECT persisted_count FROM test_runs WHERE run_id = {}",
            summary.run_id.get()
        )),
        250
    );
    let gone = h.ledger.test_by_slug(&Slug::new("load:gone")).unwrap().unwrap();
    assert!(!gone.is_deleted());
}

/// Verifies `throw_on_error` stops at the first failing chunk.
#[test]
fn throw_on_error_aborts_on_first_failure() {
    let h = harness_with(|config| config.batching.throw_on_error = true);
    h.fail_results_named("t150");
    let outcomes = numbered_outcomes("load", 250);
    let meta = meta_on_day(0);
    let error = h.ledger.persist_run(&meta, &outcomes).unwrap_err();

    match error {
        LedgerError::PartialBatchFailure {
            batch_index,
            failed_batches,
            ..
        } => {
            assert_eq!(batch_index, 1);
            assert_eq!(failed_batches, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.count("SELECT COUNT(*) FROM test_results"), 100);
    assert_eq!(h.count("SELECT persisted_count FROM test_runs"), 100);
    assert_eq!(h.count("SELECT failed_batches FROM test_runs"), 1);
}

/// Verifies disabling batching keeps large runs atomic.
#[test]
fn disabled_batching_uses_one_transaction() {
    let h = harness_with(|config| config.batching.enable_batching = false);
    let summary = h.persist_on_day(0, &numbered_outcomes("load", 150));
    assert_eq!(summary.mode, PersistMode::SingleTransaction);
    assert_eq!(summary.processed_count, 150);
}

/// Verifies a run exactly one batch long is batched.
#[test]
fn run_of_batch_size_is_batched() {
    let h = harness_with(|config| config.batching.batch_size = 10);
    let summary = h.persist_on_day(0, &numbered_outcomes("load", 10));
    assert_eq!(summary.mode, PersistMode::Batched);
    assert_eq!(summary.succeeded_batches, 1);
    assert!(summary.is_complete());
}

// ============================================================================
// SECTION: Immutability and Schema
// ============================================================================

/// Verifies stored results reject updates and deletes.
#[test]
fn results_are_append_only() {
    let h = harness();
    h.persist_on_day(0, &[outcome("users", "a", TestStatus::Passed)]);
    let raw = h.raw();

    let update = raw.execute("UPDATE test_results SET status = 'failed'", params![]);
    assert!(update.unwrap_err().to_string().contains("immutable"));
    let delete = raw.execute("DELETE FROM test_results", params![]);
    assert!(delete.is_err());
    assert_eq!(h.count("SELECT COUNT(*) FROM test_results WHERE status = 'passed'"), 1);
}

/// Verifies the run count invariant is enforced by the database.
#[test]
fn run_counts_must_add_up() {
    let h = harness();
    let insert = h.raw().execute(
        "INSERT INTO test_runs (environment, started_at, total, passed, failed, skipped, \
         created_at) VALUES ('x', 0, 3, 1, 1, 0, 0)",
        params![],
    );
    assert!(insert.is_err());
}

/// Verifies an unknown schema version refuses to open.
#[test]
fn unknown_schema_version_is_fatal() {
    let h = harness();
    h.raw()
        .execute("UPDATE store_meta SET version = ?1", params![SCHEMA_VERSION + 1])
        .unwrap();
    let config = SqliteLedgerConfig::new(&h.path);
    let error = SqliteTestLedger::open(&config).err().expect("open must fail");
    assert!(matches!(error, LedgerError::FatalDatabase(_)));
}

/// Verifies reopening an existing store keeps its data.
#[test]
fn reopen_preserves_data() {
    let h = harness();
    h.persist_on_day(0, &[outcome("users", "a", TestStatus::Passed)]);
    let reopened = SqliteTestLedger::open(&SqliteLedgerConfig::new(&h.path)).unwrap();
    assert_eq!(reopened.list_runs(10, None).unwrap().runs.len(), 1);
}

/// Verifies invalid configuration is rejected before touching disk.
#[test]
fn invalid_config_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = SqliteLedgerConfig::new(dir.path().join("ledger.db"));
    config.pool_size = 0;
    assert!(matches!(SqliteTestLedger::open(&config), Err(LedgerError::Validation(_))));

    let mut config = SqliteLedgerConfig::new(dir.path().join("ledger.db"));
    config.batching.batch_size = 0;
    assert!(matches!(SqliteTestLedger::open(&config), Err(LedgerError::Validation(_))));

    let config = SqliteLedgerConfig::new(dir.path());
    assert!(matches!(SqliteTestLedger::open(&config), Err(LedgerError::Validation(_))));
}
