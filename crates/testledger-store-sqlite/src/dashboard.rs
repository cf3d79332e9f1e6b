// crates/testledger-store-sqlite/src/dashboard.rs
// ============================================================================
// Module: Dashboard View
// Description: Degrading facade over the run and analytics readers.
// Purpose: Let dashboards render an "unavailable" state instead of failing.
// Dependencies: tracing, testledger-core
// ============================================================================

//! ## Overview
//! Datastore failures (raw, transient, or fatal) become
//! [`ReadOutcome::Unavailable`]. Caller mistakes such as a malformed cursor
//! are still returned as errors, so they are not mistaken for an outage.
//! [`DashboardView::open`] applies the same rule to opening the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use testledger_core::AnalyticsKind;
use testledger_core::AnalyticsQuery;
use testledger_core::AnalyticsReport;
use testledger_core::LedgerError;
use testledger_core::ReadOutcome;
use testledger_core::RunDetail;
use testledger_core::RunId;
use testledger_core::RunPage;
use tracing::warn;

use crate::analytics::AnalyticsReader;
use crate::config::SqliteLedgerConfig;
use crate::ledger::SqliteTestLedger;
use crate::reader::RunReader;

// ============================================================================
// SECTION: View
// ============================================================================

/// Read facade for dashboards.
#[derive(Clone)]
pub struct DashboardView {
    /// Run listings and details.
    runs: RunReader,
    /// Analytics queries.
    analytics: AnalyticsReader,
}

impl DashboardView {
    /// Creates a view over the given readers.
    #[must_use]
    pub const fn new(runs: RunReader, analytics: AnalyticsReader) -> Self {
        Self {
            runs,
            analytics,
        }
    }

    /// Opens a view over the store, degrading when it cannot be opened.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid configuration.
    pub fn open(config: &SqliteLedgerConfig) -> Result<ReadOutcome<Self>, LedgerError> {
        degrade("open", SqliteTestLedger::open(config).map(|ledger| ledger.dashboard()))
    }

    /// Lists runs, degrading on datastore failure.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for bad paging input.
    pub fn list_runs(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ReadOutcome<RunPage>, LedgerError> {
        degrade("list_runs", self.runs.list_runs(limit, cursor))
    }

    /// Loads a run detail, degrading on datastore failure.
    ///
    /// # Errors
    ///
    /// Returns non-datastore errors unchanged.
    pub fn get_run_detail(
        &self,
        run_id: RunId,
    ) -> Result<ReadOutcome<Option<RunDetail>>, LedgerError> {
        degrade("get_run_detail", self.runs.get_run_detail(run_id))
    }

    /// Runs an analytics query, degrading on datastore failure.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for out-of-range parameters.
    pub fn get_analytics(
        &self,
        kind: AnalyticsKind,
        query: AnalyticsQuery,
    ) -> Result<ReadOutcome<AnalyticsReport>, LedgerError> {
        degrade(kind.as_str(), self.analytics.get_analytics(kind, query))
    }
}

/// Maps datastore failures to [`ReadOutcome::Unavailable`].
fn degrade<T>(
    operation: &str,
    result: Result<T, LedgerError>,
) -> Result<ReadOutcome<T>, LedgerError> {
    match result {
        Ok(data) => Ok(ReadOutcome::Available {
            data,
        }),
        Err(error) if error.is_datastore_failure() => {
            warn!(operation, error = %error, "dashboard read degraded");
            Ok(ReadOutcome::Unavailable {
                reason: error.to_string(),
            })
        }
        Err(error) => Err(error),
    }
}
