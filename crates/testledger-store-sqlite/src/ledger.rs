// crates/testledger-store-sqlite/src/ledger.rs
// ============================================================================
// Module: SQLite Test Ledger
// Description: Facade wiring pool, schema, executor, and components together.
// Purpose: Offer one cloneable handle for persisting and reading runs.
// Dependencies: testledger-core
// ============================================================================

//! ## Overview
//! [`SqliteTestLedger::open`] validates configuration, builds the pool,
//! applies the schema, and shares one [`TransactionalExecutor`] between the
//! batch coordinator and the readers. Clones share the pool and metrics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use testledger_core::AnalyticsKind;
use testledger_core::AnalyticsQuery;
use testledger_core::AnalyticsReport;
use testledger_core::AtomicTransactionMetrics;
use testledger_core::Clock;
use testledger_core::DailyStat;
use testledger_core::FlakyTest;
use testledger_core::LedgerError;
use testledger_core::PersistSummary;
use testledger_core::Regression;
use testledger_core::RunDetail;
use testledger_core::RunId;
use testledger_core::RunMeta;
use testledger_core::RunPage;
use testledger_core::Slug;
use testledger_core::SystemClock;
use testledger_core::TestHealth;
use testledger_core::TestHistoryEntry;
use testledger_core::TestId;
use testledger_core::TestOutcome;
use testledger_core::TestRecord;
use testledger_core::TestResultRecord;
use testledger_core::TransactionMetrics;
use testledger_core::TransactionMetricsSnapshot;
use tracing::info;

use crate::analytics::AnalyticsReader;
use crate::batch::BatchCoordinator;
use crate::config::SqliteLedgerConfig;
use crate::dashboard::DashboardView;
use crate::executor::TransactionalExecutor;
use crate::pool::LedgerPool;
use crate::pool::PoolMetricsSnapshot;
use crate::reader::RunReader;
use crate::schema::initialize_schema;

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// `SQLite`-backed test ledger.
#[derive(Clone)]
pub struct SqliteTestLedger {
    /// Shared transaction runner.
    executor: TransactionalExecutor,
    /// Run persistence.
    coordinator: BatchCoordinator,
    /// Run and identity reads.
    runs: RunReader,
    /// Analytics reads.
    analytics: AnalyticsReader,
}

impl SqliteTestLedger {
    /// Opens the ledger with the system clock and atomic metrics.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid configuration or a
    /// database error when the store cannot be opened.
    pub fn open(config: &SqliteLedgerConfig) -> Result<Self, LedgerError> {
        Self::open_with(config, Arc::new(SystemClock), Arc::new(AtomicTransactionMetrics::new()))
    }

    /// Opens the ledger with an injected clock and metrics sink.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid configuration or a
    /// database error when the store cannot be opened.
    pub fn open_with(
        config: &SqliteLedgerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn TransactionMetrics>,
    ) -> Result<Self, LedgerError> {
        config.validate()?;
        let pool = LedgerPool::open(config)?;
        {
            let mut connection = pool.get()?;
            initialize_schema(&mut connection)?;
        }
        info!(path = %config.path.display(), pool_size = config.pool_size, "test ledger opened");
        let executor = TransactionalExecutor::new(pool, config.transaction, clock, metrics);
        Ok(Self {
            coordinator: BatchCoordinator::new(executor.clone(), config.batching),
            runs: RunReader::new(executor.clone()),
            analytics: AnalyticsReader::new(executor.clone()),
            executor,
        })
    }

    /// Persists one run.
    ///
    /// # Errors
    ///
    /// See [`BatchCoordinator::persist_run`].
    pub fn persist_run(
        &self,
        meta: &RunMeta,
        outcomes: &[TestOutcome],
    ) -> Result<PersistSummary, LedgerError> {
        self.coordinator.persist_run(meta, outcomes)
    }

    /// Lists runs newest first.
    ///
    /// # Errors
    ///
    /// See [`RunReader::list_runs`].
    pub fn list_runs(&self, limit: usize, cursor: Option<&str>) -> Result<RunPage, LedgerError> {
        self.runs.list_runs(limit, cursor)
    }

    /// Loads one run.
    ///
    /// # Errors
    ///
    /// See [`RunReader::get_run_detail`].
    pub fn get_run_detail(&self, run_id: RunId) -> Result<Option<RunDetail>, LedgerError> {
        self.runs.get_run_detail(run_id)
    }

    /// Loads the results of one run in outcome order.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn run_results(&self, run_id: RunId) -> Result<Vec<TestResultRecord>, LedgerError> {
        self.runs.run_results(run_id)
    }

    /// Loads an identity by slug.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn test_by_slug(&self, slug: &Slug) -> Result<Option<TestRecord>, LedgerError> {
        self.runs.test_by_slug(slug)
    }

    /// Loads an identity's version history.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn test_history(&self, test_id: TestId) -> Result<Vec<TestHistoryEntry>, LedgerError> {
        self.runs.test_history(test_id)
    }

    /// Runs an analytics query.
    ///
    /// # Errors
    ///
    /// See [`AnalyticsReader::get_analytics`].
    pub fn get_analytics(
        &self,
        kind: AnalyticsKind,
        query: AnalyticsQuery,
    ) -> Result<AnalyticsReport, LedgerError> {
        self.analytics.get_analytics(kind, query)
    }

    /// Returns flaky tests.
    ///
    /// # Errors
    ///
    /// See [`AnalyticsReader::flaky_tests`].
    pub fn flaky_tests(
        &self,
        min_runs: u32,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<FlakyTest>, LedgerError> {
        self.analytics.flaky_tests(min_runs, window_days, limit)
    }

    /// Returns recent regressions.
    ///
    /// # Errors
    ///
    /// See [`AnalyticsReader::regressions`].
    pub fn regressions(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<Regression>, LedgerError> {
        self.analytics.regressions(window_days, limit)
    }

    /// Returns one test's health score.
    ///
    /// # Errors
    ///
    /// See [`AnalyticsReader::health_score`].
    pub fn health_score(
        &self,
        test_id: TestId,
        window_days: u32,
    ) -> Result<Option<TestHealth>, LedgerError> {
        self.analytics.health_score(test_id, window_days)
    }

    /// Returns per-day aggregates.
    ///
    /// # Errors
    ///
    /// See [`AnalyticsReader::daily_stats`].
    pub fn daily_stats(&self, window_days: u32) -> Result<Vec<DailyStat>, LedgerError> {
        self.analytics.daily_stats(window_days)
    }

    /// Returns the degrading dashboard facade.
    #[must_use]
    pub fn dashboard(&self) -> DashboardView {
        DashboardView::new(self.runs.clone(), self.analytics.clone())
    }

    /// Returns the shared executor for custom units of work.
    #[must_use]
    pub const fn executor(&self) -> &TransactionalExecutor {
        &self.executor
    }

    /// Returns transaction counters.
    #[must_use]
    pub fn transaction_metrics(&self) -> TransactionMetricsSnapshot {
        self.executor.metrics().snapshot()
    }

    /// Resets transaction counters.
    pub fn reset_transaction_metrics(&self) {
        self.executor.metrics().reset();
    }

    /// Returns pool gauges and counters.
    #[must_use]
    pub fn pool_metrics(&self) -> PoolMetricsSnapshot {
        self.executor.pool().metrics()
    }

    /// Resets pool counters.
    pub fn reset_pool_metrics(&self) {
        self.executor.pool().reset_metrics();
    }
}
