// crates/testledger-store-sqlite/tests/transactions.rs
// ============================================================================
// Module: Transactional Executor Tests
// Description: Retry bounds, savepoints, deadlines, and metrics.
// Purpose: Validate the retrying transaction primitive end to end.
// Dependencies: testledger-core, testledger-store-sqlite, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Units of work inject classified failures directly, so retry behavior is
//! observed without depending on real lock contention.

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

use std::cell::Cell;

use rusqlite::params;
use testledger_core::FailureClass;
use testledger_core::LedgerError;
use testledger_core::TestStatus;
use testledger_core::TransactionMetrics;
use testledger_core::TransactionMetricsSnapshot;
use testledger_store_sqlite::TxOptions;
use testledger_store_sqlite::error::db_error;

use crate::common::harness;
use crate::common::harness_with;
use crate::common::outcome;

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Verifies transient failures are retried until the work succeeds.
#[test]
fn transient_failures_retry_until_success() {
    let h = harness();
    let calls = Cell::new(0_u32);
    let value = h
        .ledger
        .executor()
        .run_in_transaction(TxOptions::write("retry"), |_tx| {
            calls.set(calls.get() + 1);
            if calls.get() <= 2 {
                return Err(LedgerError::database(FailureClass::Deadlock, "injected"));
            }
            Ok(42)
        })
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.get(), 3);
    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.deadlocks, 2);
    assert_eq!(metrics.committed, 1);
    assert_eq!(metrics.rolled_back, 2);
}

/// Verifies the work runs `max_retries + 1` times before failing.
#[test]
fn retries_are_bounded() {
    let h = harness_with(|config| config.transaction.max_retries = 3);
    let calls = Cell::new(0_u32);
    let error = h
        .ledger
        .executor()
        .run_in_transaction(TxOptions::write("exhaust"), |_tx| -> Result<(), LedgerError> {
            calls.set(calls.get() + 1);
            Err(LedgerError::database(FailureClass::Timeout, "injected"))
        })
        .unwrap_err();

    assert_eq!(calls.get(), 4);
    assert_eq!(error, LedgerError::TransientDatabase {
        class: FailureClass::Timeout,
        attempts: 4,
        message: "injected".to_string(),
    });
    let metrics = h.metrics.snapshot();
    assert_eq!(metrics.started, 4);
    assert_eq!(metrics.retries, 3);
    assert_eq!(metrics.timeouts, 4);
}

/// Verifies fatal failures are never retried.
#[test]
fn fatal_failures_are_not_retried() {
    let h = harness();
    let calls = Cell::new(0_u32);
    let error = h
        .ledger
        .executor()
        .run_in_transaction(TxOptions::write("fatal"), |_tx| -> Result<(), LedgerError> {
            calls.set(calls.get() + 1);
            Err(LedgerError::database(FailureClass::Fatal, "disk gone"))
        })
        .unwrap_err();

    assert_eq!(calls.get(), 1);
    assert_eq!(error, LedgerError::FatalDatabase("disk gone".to_string()));
}

/// Verifies validation errors pass through untouched.
#[test]
fn validation_errors_pass_through() {
    let h = harness();
    let calls = Cell::new(0_u32);
    let error = h
        .ledger
        .executor()
        .run_in_transaction(TxOptions::write("validation"), |_tx| -> Result<(), LedgerError> {
            calls.set(calls.get() + 1);
            Err(LedgerError::Validation("bad input".to_string()))
        })
        .unwrap_err();

    assert_eq!(calls.get(), 1);
    assert_eq!(error, LedgerError::Validation("bad input".to_string()));
    assert_eq!(h.metrics.snapshot().retries, 0);
}

/// Verifies retry flags disable retries per class.
#[test]
fn retry_flags_disable_classes() {
    let h = harness_with(|config| {
        config.transaction.retry_on_deadlock = false;
        config.transaction.retry_on_constraint_violation = false;
    });
    for class in [FailureClass::Deadlock, FailureClass::UniqueViolation] {
        let calls = Cell::new(0_u32);
        let error = h
            .ledger
            .executor()
            .run_in_transaction(TxOptions::write("flags"), |_tx| -> Result<(), LedgerError> {
                calls.set(calls.get() + 1);
                Err(LedgerError::database(class, "injected"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert_eq!(error.failure_class(), Some(class));
    }
}

/// Verifies a failed attempt leaves no writes behind.
#[test]
fn failed_attempts_roll_back_writes() {
    let h = harness_with(|config| config.transaction.max_retries = 1);
    let result = h.ledger.executor().run_in_transaction(
        TxOptions::write("rollback"),
        |tx| -> Result<(), LedgerError> {
            tx.conn()
                .execute(
                    "INSERT INTO test_suites (name, created_at) VALUES ('ghost', 0)",
                    params![],
                )
                .map_err(db_error)?;
            Err(LedgerError::database(FailureClass::Deadlock, "injected"))
        },
    );

    assert!(result.is_err());
    assert_eq!(h.count("SELECT COUNT(*) FROM test_suites"), 0);
}

// ============================================================================
// SECTION: Savepoints
// ============================================================================

/// Verifies a failed savepoint discards only its own work.
#[test]
fn savepoint_failure_keeps_outer_work() {
    let h = harness();
    h.ledger
        .executor()
        .run_in_transaction(TxOptions::write("savepoint"), |tx| {
            tx.conn()
                .execute("INSERT INTO test_suites (name, created_at) VALUES ('kept', 0)", params![])
                .map_err(db_error)?;
            let outcome = tx.with_savepoint("inner_work", |tx| -> Result<(), LedgerError> {
                tx.conn()
                    .execute(
                        "INSERT INTO test_suites (name, created_at) VALUES ('discarded', 0)",
                        params![],
                    )
                    .map_err(db_error)?;
                Err(LedgerError::Validation("inner failure".to_string()))
            });
            assert!(!outcome.success);
            assert!(outcome.result.is_none());
            assert_eq!(outcome.error, Some(LedgerError::Validation("inner failure".to_string())));

            let ok = tx.with_savepoint("second_work", |tx| {
                tx.conn()
                    .execute(
                        "INSERT INTO test_suites (name, created_at) VALUES ('merged', 0)",
                        params![],
                    )
                    .map_err(db_error)
            });
            assert!(ok.success);
            assert_eq!(ok.result, Some(1));
            Ok(())
        })
        .unwrap();

    assert_eq!(h.count("SELECT COUNT(*) FROM test_suites WHERE name = 'kept'"), 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_suites WHERE name = 'discarded'"), 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_suites WHERE name = 'merged'"), 1);
    assert_eq!(h.metrics.snapshot().savepoint_rollbacks, 1);
}

/// Verifies savepoint names must be SQL identifiers.
#[test]
fn savepoint_names_are_validated() {
    let h = harness();
    h.ledger
        .executor()
        .run_in_transaction(TxOptions::write("names"), |tx| {
            let outcome = tx.with_savepoint("bad name; DROP TABLE tests", |_tx| Ok(()));
            assert!(!outcome.success);
            assert!(matches!(outcome.error, Some(LedgerError::Validation(_))));
            assert!(matches!(tx.savepoint(""), Err(LedgerError::Validation(_))));
            Ok(())
        })
        .unwrap();
    assert_eq!(h.count("SELECT COUNT(*) FROM store_meta"), 1);
}

// ============================================================================
// SECTION: Deadlines
// ============================================================================

/// Verifies a runaway statement is interrupted and classified as a timeout.
#[test]
fn attempt_deadline_interrupts_runaway_work() {
    let h = harness_with(|config| {
        config.transaction.attempt_timeout_ms = 50;
        config.transaction.max_retries = 1;
    });
    let error = h
        .ledger
        .executor()
        .run_in_transaction(TxOptions::read("runaway"), |tx| {
            tx.conn()
                .query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                     SELECT COUNT(*) FROM c",
                    params![],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(db_error)
        })
        .unwrap_err();

    match error {
        LedgerError::TransientDatabase {
            class,
            attempts,
            ..
        } => {
            assert_eq!(class, FailureClass::Timeout);
            assert_eq!(attempts, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.metrics.snapshot().timeouts, 2);
}

/// Verifies fast work is unaffected by the deadline.
#[test]
fn deadline_does_not_affect_fast_work() {
    let h = harness_with(|config| config.transaction.attempt_timeout_ms = 5_000);
    let summary = h.persist_on_day(0, &[outcome("users", "a", TestStatus::Passed)]);
    assert!(summary.is_complete());
    assert_eq!(h.metrics.snapshot().timeouts, 0);
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Verifies transaction and pool metrics are exposed and resettable.
#[test]
fn metrics_are_exposed_and_resettable() {
    let h = harness();
    h.persist_on_day(0, &[outcome("users", "a", TestStatus::Passed)]);
    h.ledger.list_runs(10, None).unwrap();

    let tx_metrics = h.ledger.transaction_metrics();
    assert_eq!(tx_metrics.started, 2);
    assert_eq!(tx_metrics.committed, 2);
    let pool = h.ledger.pool_metrics();
    assert_eq!(pool.max_size, 8);
    assert!(pool.checkouts >= 2);
    assert_eq!(pool.waiting, 0);

    h.ledger.reset_transaction_metrics();
    h.ledger.reset_pool_metrics();
    assert_eq!(h.ledger.transaction_metrics(), TransactionMetricsSnapshot::default());
    assert_eq!(h.ledger.pool_metrics().checkouts, 0);
}

/// Verifies a saturated pool queues instead of failing immediately.
#[test]
fn pool_exhaustion_queues_callers() {
    let h = harness_with(|config| {
        config.pool_size = 1;
        config.pool_timeout_ms = 5_000;
    });
    let held = h.ledger.executor().pool().get().unwrap();
    let ledger = h.ledger.clone();
    let waiter = std::thread::spawn(move || ledger.list_runs(10, None));
    std::thread::sleep(std::time::Duration::from_millis(100));
    drop(held);
    let page = waiter.join().expect("waiter").unwrap();

    assert!(page.runs.is_empty());
    assert_eq!(h.ledger.pool_metrics().checkout_timeouts, 0);
}
