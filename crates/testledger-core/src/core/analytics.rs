// crates/testledger-core/src/core/analytics.rs
// ============================================================================
// Module: Test Ledger Analytics Model
// Description: Analytics report shapes and pure scoring math.
// Purpose: Keep flakiness, regression, and health rules testable without a store.
// Dependencies: serde, crate::core::{identifiers, run, time}
// ============================================================================

//! ## Overview
//! Stores aggregate pass/fail observations out of the immutable result log
//! and defer every classification decision to this module:
//! - flaky: at least `min_runs` pass/fail observations, both present, and a
//!   failure ratio strictly between 0.1 and 0.9.
//! - regression: the latest observation in the window failed, and the
//!   preceding window of equal length had at least one pass and no failures.
//! - health: `0.7 * pass_rate + 0.3 * (1 - 4 * variance)` where variance is
//!   the Bernoulli variance of the pass/fail sequence.
//!
//! Skipped results never count as observations.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RunId;
use crate::core::identifiers::Slug;
use crate::core::identifiers::TestId;
use crate::core::run::TestStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Failure ratio at or below which a test is considered stable.
pub const FLAKY_RATIO_FLOOR: f64 = 0.1;
/// Failure ratio at or above which a test is considered broken.
pub const FLAKY_RATIO_CEILING: f64 = 0.9;
/// Weight of the pass rate in the health score.
pub const HEALTH_PASS_RATE_WEIGHT: f64 = 0.7;
/// Weight of the stability term in the health score.
pub const HEALTH_STABILITY_WEIGHT: f64 = 0.3;
/// Default analytics row limit.
pub const DEFAULT_ANALYTICS_LIMIT: usize = 20;
/// Default analytics window in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;
/// Default minimum observations for flakiness.
pub const DEFAULT_MIN_RUNS: u32 = 5;

// ============================================================================
// SECTION: Query
// ============================================================================

/// Analytics view selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsKind {
    /// Flaky tests.
    Flaky,
    /// Recent regressions.
    Regressions,
    /// Per-test health scores, least healthy first.
    Health,
    /// Per-day aggregates.
    DailyStats,
}

impl AnalyticsKind {
    /// Returns the stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flaky => "flaky",
            Self::Regressions => "regressions",
            Self::Health => "health",
            Self::DailyStats => "daily_stats",
        }
    }
}

/// Parameters shared by analytics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    /// Maximum rows returned.
    pub limit: usize,
    /// Window length in days.
    pub window_days: u32,
    /// Minimum pass/fail observations for flakiness.
    pub min_runs: u32,
}

impl Default for AnalyticsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_ANALYTICS_LIMIT,
            window_days: DEFAULT_WINDOW_DAYS,
            min_runs: DEFAULT_MIN_RUNS,
        }
    }
}

// ============================================================================
// SECTION: Report Rows
// ============================================================================

/// Test with an intermittent pass/fail pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakyTest {
    /// Identity row.
    pub test_id: TestId,
    /// Stable identity.
    pub slug: Slug,
    /// Current display name.
    pub name: String,
    /// Owning suite.
    pub suite_name: String,
    /// Pass/fail observations in the window.
    pub runs: u64,
    /// Passes in the window.
    pub passes: u64,
    /// Failures in the window.
    pub failures: u64,
    /// `failures / runs`.
    pub failure_ratio: f64,
}

/// Test that started failing after a clean prior window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regression {
    /// Identity row.
    pub test_id: TestId,
    /// Stable identity.
    pub slug: Slug,
    /// Current display name.
    pub name: String,
    /// Owning suite.
    pub suite_name: String,
    /// Run holding the latest failure.
    pub run_id: RunId,
    /// Start of that run.
    pub failed_at: Timestamp,
    /// Passes in the preceding window.
    pub prior_passes: u64,
}

/// Health breakdown for one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestHealth {
    /// Identity row.
    pub test_id: TestId,
    /// Stable identity.
    pub slug: Slug,
    /// Current display name.
    pub name: String,
    /// Owning suite.
    pub suite_name: String,
    /// Score components.
    #[serde(flatten)]
    pub breakdown: HealthBreakdown,
}

/// Aggregates for one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    /// UTC day as `YYYY-MM-DD`.
    pub day: String,
    /// Results recorded.
    pub total: u64,
    /// Passed results.
    pub passed: u64,
    /// Failed results.
    pub failed: u64,
    /// Skipped results.
    pub skipped: u64,
    /// Mean duration in milliseconds.
    pub avg_duration_ms: f64,
}

/// Analytics output for one [`AnalyticsKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "snake_case")]
pub enum AnalyticsReport {
    /// Flaky tests.
    Flaky(Vec<FlakyTest>),
    /// Regressions.
    Regressions(Vec<Regression>),
    /// Health scores.
    Health(Vec<TestHealth>),
    /// Daily aggregates.
    DailyStats(Vec<DailyStat>),
}

impl AnalyticsReport {
    /// Returns the number of rows in the report.
    #[must_use]
    pub const fn len(&self) -> usize {
        match self {
            Self::Flaky(rows) => rows.len(),
            Self::Regressions(rows) => rows.len(),
            Self::Health(rows) => rows.len(),
            Self::DailyStats(rows) => rows.len(),
        }
    }

    /// Returns true when the report has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// SECTION: Scoring
// ============================================================================

/// Components of a health score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthBreakdown {
    /// Pass/fail observations.
    pub runs: u64,
    /// Fraction of observations that passed.
    pub pass_rate: f64,
    /// `1 - 4 * variance`, in `[0, 1]`.
    pub stability: f64,
    /// Weighted composite in `[0, 1]`.
    pub score: f64,
}

/// Converts a count to `f64` for ratio math.
#[allow(clippy::cast_precision_loss, reason = "Observation counts stay far below 2^52.")]
const fn as_ratio_operand(count: u64) -> f64 {
    count as f64
}

/// Returns `failures / (passes + failures)`, or `None` without observations.
#[must_use]
pub fn failure_ratio(passes: u64, failures: u64) -> Option<f64> {
    let runs = passes.saturating_add(failures);
    if runs == 0 {
        return None;
    }
    Some(as_ratio_operand(failures) / as_ratio_operand(runs))
}

/// Returns true when the observations describe a flaky test.
#[must_use]
pub fn is_flaky(passes: u64, failures: u64, min_runs: u32) -> bool {
    if passes == 0 || failures == 0 {
        return false;
    }
    if passes.saturating_add(failures) < u64::from(min_runs) {
        return false;
    }
    failure_ratio(passes, failures)
        .is_some_and(|ratio| ratio > FLAKY_RATIO_FLOOR && ratio < FLAKY_RATIO_CEILING)
}

/// Returns true when a latest failure follows a clean preceding window.
#[must_use]
pub const fn is_regression(latest: TestStatus, prior_passes: u64, prior_failures: u64) -> bool {
    matches!(latest, TestStatus::Failed) && prior_passes > 0 && prior_failures == 0
}

/// Computes the health breakdown from pass and failure counts.
#[must_use]
pub fn health_from_counts(passes: u64, failures: u64) -> Option<HealthBreakdown> {
    let runs = passes.saturating_add(failures);
    if runs == 0 {
        return None;
    }
    let pass_rate = as_ratio_operand(passes) / as_ratio_operand(runs);
    let variance = pass_rate * (1.0 - pass_rate);
    let stability = 4.0f64.mul_add(-variance, 1.0).clamp(0.0, 1.0);
    let score = HEALTH_PASS_RATE_WEIGHT.mul_add(pass_rate, HEALTH_STABILITY_WEIGHT * stability);
    Some(HealthBreakdown {
        runs,
        pass_rate,
        stability,
        score,
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================
