// crates/testledger-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: Ledger Test Harness
// Description: Shared fixtures for SQLite ledger integration tests.
// Purpose: Open isolated ledgers with a manual clock and inspectable metrics.
// Dependencies: tempfile, rusqlite, testledger-core, testledger-store-sqlite
// ============================================================================

//! ## Overview
//! Each harness owns a temporary directory, a ledger opened with a
//! [`ManualClock`] and [`AtomicTransactionMetrics`], and helpers for building
//! runner input and inspecting the database directly.

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers.")]

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use rusqlite::params;
use tempfile::TempDir;
use testledger_core::AtomicTransactionMetrics;
use testledger_core::DAY_MILLIS;
use testledger_core::ManualClock;
use testledger_core::RunMeta;
use testledger_core::TestOutcome;
use testledger_core::TestStatus;
use testledger_core::Timestamp;
use testledger_store_sqlite::SqliteLedgerConfig;
use testledger_store_sqlite::SqliteTestLedger;

/// 2026-03-01T10:00:00Z.
pub const T0: i64 = 1_772_359_200_000;

/// Isolated ledger plus its clock and metrics.
pub struct Harness {
    /// Keeps the database directory alive.
    pub dir: TempDir,
    /// Database file.
    pub path: PathBuf,
    /// Ledger under test.
    pub ledger: SqliteTestLedger,
    /// Clock injected into the ledger.
    pub clock: Arc<ManualClock>,
    /// Metrics injected into the ledger.
    pub metrics: Arc<AtomicTransactionMetrics>,
}

impl Harness {
    /// Opens a raw connection to the ledger database.
    pub fn raw(&self) -> Connection {
        Connection::open(&self.path).expect("open raw connection")
    }

    /// Counts rows matching `sql`, which must select a single integer.
    pub fn count(&self, sql: &str) -> i64 {
        self.raw().query_row(sql, params![], |row| row.get(0)).expect("count query")
    }

    /// Installs a trigger that aborts result inserts for tests named `name`.
    pub fn fail_results_named(&self, name: &str) {
        self.raw()
            .execute_batch(&format!(
                "CREATE TRIGGER inject_failure BEFORE INSERT ON test_results
                 WHEN NEW.name = '{name}'
                 BEGIN SELECT RAISE(ABORT, 'injected failure'); END;"
            ))
            .expect("install trigger");
    }

    /// Persists a run started `day` days after [`T0`], with the clock one
    /// second past the start.
    pub fn persist_on_day(
        &self,
        day: i64,
        outcomes: &[TestOutcome],
    ) -> testledger_core::PersistSummary {
        let meta = meta_on_day(day);
        self.clock.set(meta.started_at.saturating_add_millis(1_000));
        self.ledger.persist_run(&meta, outcomes).expect("persist run")
    }
}

/// Opens a harness with fast retries.
pub fn harness() -> Harness {
    harness_with(|_| {})
}

/// Opens a harness after adjusting the default configuration.
pub fn harness_with(adjust: impl FnOnce(&mut SqliteLedgerConfig)) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("ledger.db");
    let mut config = SqliteLedgerConfig::new(&path);
    config.transaction.retry_base_delay_ms = 1;
    config.transaction.retry_max_delay_ms = 5;
    adjust(&mut config);
    let clock = Arc::new(ManualClock::new(Timestamp::from_unix_millis(T0)));
    let metrics = Arc::new(AtomicTransactionMetrics::new());
    let ledger = SqliteTestLedger::open_with(&config, clock.clone(), metrics.clone())
        .expect("open ledger");
    Harness {
        dir,
        path,
        ledger,
        clock,
        metrics,
    }
}

/// Builds run metadata started `day` days after [`T0`].
pub fn meta_on_day(day: i64) -> RunMeta {
    RunMeta {
        environment: "staging".to_string(),
        branch: Some("main".to_string()),
        commit_sha: Some(format!("sha-{day}")),
        commit_message: Some("update".to_string()),
        started_at: Timestamp::from_unix_millis(T0 + day * DAY_MILLIS),
        completed_at: Some(Timestamp::from_unix_millis(T0 + day * DAY_MILLIS + 60_000)),
        triggered_by: Some("ci".to_string()),
        suite_descriptions: std::collections::BTreeMap::new(),
    }
}

/// Builds an outcome with a derived slug.
pub fn outcome(suite: &str, name: &str, status: TestStatus) -> TestOutcome {
    let mut outcome = TestOutcome::new(suite, name, status);
    outcome.duration_ms = 100;
    outcome
}

/// Builds an outcome with an explicit slug.
pub fn outcome_with_slug(suite: &str, name: &str, slug: &str, status: TestStatus) -> TestOutcome {
    let mut outcome = outcome(suite, name, status);
    outcome.slug = Some(slug.to_string());
    outcome
}

/// Builds `count` passing outcomes named `t0`, `t1`, ... in `suite`.
pub fn numbered_outcomes(suite: &str, count: usize) -> Vec<TestOutcome> {
    (0 .. count).map(|index| outcome(suite, &format!("t{index}"), TestStatus::Passed)).collect()
}
