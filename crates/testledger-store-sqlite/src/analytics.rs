// crates/testledger-store-sqlite/src/analytics.rs
// ============================================================================
// Module: Analytics Reader
// Description: Flakiness, regression, health, and daily views over results.
// Purpose: Serve derived read models from the immutable result log.
// Dependencies: rusqlite, testledger-core
// ============================================================================

//! ## Overview
//! Every query runs in a deferred read transaction and windows results by
//! the start time of the run that produced them. Aggregation happens in SQL;
//! classification and scoring use the pure functions in
//! [`testledger_core::analytics`] so the thresholds live in one place.
//! Skipped results never count as pass/fail observations.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use rusqlite::OptionalExtension;
use rusqlite::params;
use testledger_core::AnalyticsKind;
use testledger_core::AnalyticsQuery;
use testledger_core::AnalyticsReport;
use testledger_core::DAY_MILLIS;
use testledger_core::DailyStat;
use testledger_core::FlakyTest;
use testledger_core::LedgerError;
use testledger_core::Regression;
use testledger_core::RunId;
use testledger_core::Slug;
use testledger_core::TestHealth;
use testledger_core::TestId;
use testledger_core::TestStatus;
use testledger_core::Timestamp;
use testledger_core::analytics::failure_ratio;
use testledger_core::analytics::health_from_counts;
use testledger_core::analytics::is_flaky;
use testledger_core::analytics::is_regression;

use crate::error::db_error;
use crate::error::stored_count;
use crate::executor::TransactionalExecutor;
use crate::executor::TxHandle;
use crate::executor::TxOptions;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Longest accepted analytics window.
pub const MAX_WINDOW_DAYS: u32 = 3650;
/// Largest accepted row limit.
pub const MAX_ANALYTICS_LIMIT: usize = 1000;

/// Per-test pass/fail counts in a window.
const WINDOW_COUNTS_SQL: &str = "
SELECT t.test_id, t.slug, t.current_name, t.suite_name,
       SUM(CASE WHEN r.status = 'passed' THEN 1 ELSE 0 END),
       SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END)
FROM test_results r
JOIN test_runs u ON u.run_id = r.run_id
JOIN tests t ON t.test_id = r.test_id
WHERE u.started_at >= ?1 AND r.status IN ('passed', 'failed')
GROUP BY t.test_id
ORDER BY t.test_id ASC";

// ============================================================================
// SECTION: Row Types
// ============================================================================

/// Test identity columns shared by every report row.
struct TestLabel {
    /// Identity row.
    test_id: TestId,
    /// Stable identity.
    slug: Slug,
    /// Current name.
    name: String,
    /// Owning suite.
    suite_name: String,
}

/// Pass/fail counts for one test.
struct WindowCounts {
    /// Test labels.
    label: TestLabel,
    /// Passes.
    passes: u64,
    /// Failures.
    failures: u64,
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Read-only analytics over the result log.
#[derive(Clone)]
pub struct AnalyticsReader {
    /// Executor running read transactions.
    executor: TransactionalExecutor,
}

impl AnalyticsReader {
    /// Creates a reader.
    #[must_use]
    pub const fn new(executor: TransactionalExecutor) -> Self {
        Self {
            executor,
        }
    }

    /// Dispatches to the query named by `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters or a
    /// terminal database error.
    pub fn get_analytics(
        &self,
        kind: AnalyticsKind,
        query: AnalyticsQuery,
    ) -> Result<AnalyticsReport, LedgerError> {
        match kind {
            AnalyticsKind::Flaky => self
                .flaky_tests(query.min_runs, query.window_days, query.limit)
                .map(AnalyticsReport::Flaky),
            AnalyticsKind::Regressions => self
                .regressions(query.window_days, query.limit)
                .map(AnalyticsReport::Regressions),
            AnalyticsKind::Health => {
                self.health_report(query.window_days, query.limit).map(AnalyticsReport::Health)
            }
            AnalyticsKind::DailyStats => {
                self.daily_stats(query.window_days).map(AnalyticsReport::DailyStats)
            }
        }
    }

    /// Returns flaky tests ranked by failure ratio, highest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters or a
    /// terminal database error.
    pub fn flaky_tests(
        &self,
        min_runs: u32,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<FlakyTest>, LedgerError> {
        validate_window(window_days)?;
        validate_limit(limit)?;
        let since = self.window_start(window_days);
        let counts = self
            .executor
            .run_in_transaction(TxOptions::read("analytics_flaky"), |tx| window_counts(tx, since))?;
        let mut rows: Vec<FlakyTest> = counts
            .into_iter()
            .filter(|entry| is_flaky(entry.passes, entry.failures, min_runs))
            .filter_map(|entry| {
                let ratio = failure_ratio(entry.passes, entry.failures)?;
                Some(FlakyTest {
                    test_id: entry.label.test_id,
                    slug: entry.label.slug,
                    name: entry.label.name,
                    suite_name: entry.label.suite_name,
                    runs: entry.passes.saturating_add(entry.failures),
                    passes: entry.passes,
                    failures: entry.failures,
                    failure_ratio: ratio,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.failure_ratio.total_cmp(&a.failure_ratio).then_with(|| a.test_id.cmp(&b.test_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Returns tests whose latest result failed after a clean prior window.
    ///
    /// The prior window has the same length and ends where the current one
    /// begins. Rows are ordered by failure time, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters or a
    /// terminal database error.
    pub fn regressions(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<Regression>, LedgerError> {
        validate_window(window_days)?;
        validate_limit(limit)?;
        let since = self.window_start(window_days);
        let prior_since = since.saturating_sub_days(window_days);
        let options = TxOptions::read("analytics_regressions");
        let mut rows = self.executor.run_in_transaction(options, |tx| {
            let prior = prior_counts(tx, prior_since, since)?;
            let mut rows = Vec::new();
            for latest in latest_results(tx, since)? {
                let (passes, failures) =
                    prior.get(&latest.label.test_id).copied().unwrap_or((0, 0));
                if is_regression(latest.status, passes, failures) {
                    rows.push(Regression {
                        test_id: latest.label.test_id,
                        slug: latest.label.slug,
                        name: latest.label.name,
                        suite_name: latest.label.suite_name,
                        run_id: latest.run_id,
                        failed_at: latest.started_at,
                        prior_passes: passes,
                    });
                }
            }
            Ok(rows)
        })?;
        rows.sort_by(|a, b| b.failed_at.cmp(&a.failed_at).then_with(|| a.test_id.cmp(&b.test_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    /// Returns the health score of one test, or `None` without observations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters or a
    /// terminal database error.
    pub fn health_score(
        &self,
        test_id: TestId,
        window_days: u32,
    ) -> Result<Option<TestHealth>, LedgerError> {
        validate_window(window_days)?;
        let since = self.window_start(window_days);
        let counts = self.executor.run_in_transaction(TxOptions::read("analytics_health"), |tx| {
            let mut stmt = tx
                .conn()
                .prepare(
                    "SELECT t.test_id, t.slug, t.current_name, t.suite_name,
                            SUM(CASE WHEN r.status = 'passed' THEN 1 ELSE 0 END),
                            SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END)
                     FROM test_results r
                     JOIN test_runs u ON u.run_id = r.run_id
                     JOIN tests t ON t.test_id = r.test_id
                     WHERE u.started_at >= ?1 AND r.test_id = ?2
                       AND r.status IN ('passed', 'failed')
                     GROUP BY t.test_id",
                )
                .map_err(db_error)?;
            let raw = stmt
                .query_row(params![since.as_unix_millis(), test_id.get()], read_counts_row)
                .optional()
                .map_err(db_error)?;
            raw.map(RawCounts::into_counts).transpose()
        })?;
        Ok(counts.and_then(into_health))
    }

    /// Returns health scores for every observed test, least healthy first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters or a
    /// terminal database error.
    pub fn health_report(
        &self,
        window_days: u32,
        limit: usize,
    ) -> Result<Vec<TestHealth>, LedgerError> {
        validate_window(window_days)?;
        validate_limit(limit)?;
        let since = self.window_start(window_days);
        let counts = self
            .executor
            .run_in_transaction(TxOptions::read("analytics_health_report"), |tx| {
                window_counts(tx, since)
            })?;
        let mut rows: Vec<TestHealth> = counts.into_iter().filter_map(into_health).collect();
        rows.sort_by(|a, b| {
            a.breakdown.score.total_cmp(&b.breakdown.score).then_with(|| a.test_id.cmp(&b.test_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Returns per-UTC-day aggregates, oldest day first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters or a
    /// terminal database error.
    pub fn daily_stats(&self, window_days: u32) -> Result<Vec<DailyStat>, LedgerError> {
        validate_window(window_days)?;
        let since = self.window_start(window_days);
        self.executor.run_in_transaction(TxOptions::read("analytics_daily"), |tx| {
            let mut stmt = tx
                .conn()
                .prepare(
                    "SELECT u.started_at / ?2 AS day_index, COUNT(*),
                            SUM(CASE WHEN r.status = 'passed' THEN 1 ELSE 0 END),
                            SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END),
                            SUM(CASE WHEN r.status = 'skipped' THEN 1 ELSE 0 END),
                            AVG(r.duration_ms)
                     FROM test_results r
                     JOIN test_runs u ON u.run_id = r.run_id
                     WHERE u.started_at >= ?1
                     GROUP BY day_index
                     ORDER BY day_index ASC",
                )
                .map_err(db_error)?;
            let rows = stmt
                .query_map(params![since.as_unix_millis(), DAY_MILLIS], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                    ))
                })
                .map_err(db_error)?;
            let mut stats = Vec::new();
            for row in rows {
                let (day_index, total, passed, failed, skipped, avg) = row.map_err(db_error)?;
                let day_start = Timestamp::from_unix_millis(day_index.saturating_mul(DAY_MILLIS));
                stats.push(DailyStat {
                    day: day_start.utc_day(),
                    total: stored_count(total, "daily total")?,
                    passed: stored_count(passed, "daily passed")?,
                    failed: stored_count(failed, "daily failed")?,
                    skipped: stored_count(skipped, "daily skipped")?,
                    avg_duration_ms: avg.unwrap_or(0.0),
                });
            }
            Ok(stats)
        })
    }

    /// Returns the inclusive start of a window ending now.
    fn window_start(&self, window_days: u32) -> Timestamp {
        self.executor.now().saturating_sub_days(window_days)
    }
}

// ============================================================================
// SECTION: Query Helpers
// ============================================================================

/// Raw grouped count row.
struct RawCounts {
    /// Identity row.
    test_id: i64,
    /// Slug.
    slug: String,
    /// Current name.
    name: String,
    /// Owning suite.
    suite_name: String,
    /// Passes.
    passes: i64,
    /// Failures.
    failures: i64,
}

impl RawCounts {
    /// Converts stored counts.
    fn into_counts(self) -> Result<WindowCounts, LedgerError> {
        Ok(WindowCounts {
            label: TestLabel {
                test_id: TestId::new(self.test_id),
                slug: Slug::new(self.slug),
                name: self.name,
                suite_name: self.suite_name,
            },
            passes: stored_count(self.passes, "passes")?,
            failures: stored_count(self.failures, "failures")?,
        })
    }
}

/// Reads a row shaped like [`WINDOW_COUNTS_SQL`].
fn read_counts_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawCounts> {
    Ok(RawCounts {
        test_id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        suite_name: row.get(3)?,
        passes: row.get(4)?,
        failures: row.get(5)?,
    })
}

/// Loads pass/fail counts per test since `since`.
fn window_counts(tx: &TxHandle<'_>, since: Timestamp) -> Result<Vec<WindowCounts>, LedgerError> {
    let mut stmt = tx.conn().prepare(WINDOW_COUNTS_SQL).map_err(db_error)?;
    let rows = stmt.query_map(params![since.as_unix_millis()], read_counts_row).map_err(db_error)?;
    let mut counts = Vec::new();
    for row in rows {
        counts.push(row.map_err(db_error)?.into_counts()?);
    }
    Ok(counts)
}

/// Loads pass/fail counts per test in `[from, until)`.
fn prior_counts(
    tx: &TxHandle<'_>,
    from: Timestamp,
    until: Timestamp,
) -> Result<BTreeMap<TestId, (u64, u64)>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT r.test_id,
                    SUM(CASE WHEN r.status = 'passed' THEN 1 ELSE 0 END),
                    SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END)
             FROM test_results r
             JOIN test_runs u ON u.run_id = r.run_id
             WHERE u.started_at >= ?1 AND u.started_at < ?2
             GROUP BY r.test_id",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![from.as_unix_millis(), until.as_unix_millis()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })
        .map_err(db_error)?;
    let mut counts = BTreeMap::new();
    for row in rows {
        let (test_id, passes, failures) = row.map_err(db_error)?;
        counts.insert(
            TestId::new(test_id),
            (stored_count(passes, "prior passes")?, stored_count(failures, "prior failures")?),
        );
    }
    Ok(counts)
}

/// Latest pass/fail result of one test.
struct LatestResult {
    /// Test labels.
    label: TestLabel,
    /// Latest status.
    status: TestStatus,
    /// Run that produced it.
    run_id: RunId,
    /// Start of that run.
    started_at: Timestamp,
}

/// Loads each test's most recent pass/fail result since `since`.
fn latest_results(tx: &TxHandle<'_>, since: Timestamp) -> Result<Vec<LatestResult>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT t.test_id, t.slug, t.current_name, t.suite_name, r.status, r.run_id,
                    u.started_at
             FROM test_results r
             JOIN test_runs u ON u.run_id = r.run_id
             JOIN tests t ON t.test_id = r.test_id
             WHERE u.started_at >= ?1 AND r.status IN ('passed', 'failed')
             ORDER BY r.test_id ASC, u.started_at DESC, r.result_id DESC",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![since.as_unix_millis()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })
        .map_err(db_error)?;
    let mut latest: Vec<LatestResult> = Vec::new();
    for row in rows {
        let (test_id, slug, name, suite_name, status, run_id, started_at) = row.map_err(db_error)?;
        let test_id = TestId::new(test_id);
        if latest.last().is_some_and(|entry| entry.label.test_id == test_id) {
            continue;
        }
        let status = TestStatus::parse(&status).ok_or_else(|| {
            LedgerError::FatalDatabase(format!("unknown stored status: {status}"))
        })?;
        latest.push(LatestResult {
            label: TestLabel {
                test_id,
                slug: Slug::new(slug),
                name,
                suite_name,
            },
            status,
            run_id: RunId::new(run_id),
            started_at: Timestamp::from_unix_millis(started_at),
        });
    }
    Ok(latest)
}

/// Scores one test's counts.
fn into_health(counts: WindowCounts) -> Option<TestHealth> {
    let breakdown = health_from_counts(counts.passes, counts.failures)?;
    Some(TestHealth {
        test_id: counts.label.test_id,
        slug: counts.label.slug,
        name: counts.label.name,
        suite_name: counts.label.suite_name,
        breakdown,
    })
}

/// Rejects empty or excessive windows.
fn validate_window(window_days: u32) -> Result<(), LedgerError> {
    if window_days == 0 || window_days > MAX_WINDOW_DAYS {
        return Err(LedgerError::Validation(format!(
            "window_days must be between 1 and {MAX_WINDOW_DAYS}"
        )));
    }
    Ok(())
}

/// Rejects empty or excessive limits.
fn validate_limit(limit: usize) -> Result<(), LedgerError> {
    if limit == 0 || limit > MAX_ANALYTICS_LIMIT {
        return Err(LedgerError::Validation(format!(
            "limit must be between 1 and {MAX_ANALYTICS_LIMIT}"
        )));
    }
    Ok(())
}
