// crates/testledger-store-sqlite/src/deletion.rs
// ============================================================================
// Module: Deletion Detector
// Description: Marks tests deleted when their suite ran without them.
// Purpose: Keep identity liveness consistent with what each run observed.
// Dependencies: rusqlite, tracing, testledger-core
// ============================================================================

//! ## Overview
//! Reconciliation is scoped to the suites a run executed. A test in one of
//! those suites is marked deleted when the run did not observe its slug and
//! it was last seen strictly before the run started. Suites the run did not
//! touch are never reconciled, so partial runs cannot delete anything
//! outside their scope.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use rusqlite::params;
use testledger_core::DeletedTest;
use testledger_core::LedgerError;
use testledger_core::RunId;
use testledger_core::Slug;
use testledger_core::TestId;
use testledger_core::Timestamp;
use tracing::info;

use crate::error::db_error;
use crate::executor::TxHandle;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Run being reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    /// Run performing the reconciliation.
    pub run_id: RunId,
    /// Run start time.
    pub started_at: Timestamp,
}

/// Active test that is a deletion candidate.
struct Candidate {
    /// Identity row.
    test_id: TestId,
    /// Stable identity.
    slug: String,
    /// Current name.
    name: String,
}

// ============================================================================
// SECTION: Detector
// ============================================================================

/// Detects tests that disappeared from executed suites.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeletionDetector;

impl DeletionDetector {
    /// Marks unobserved tests of `executed_suites` as deleted.
    ///
    /// Returns the tests newly marked, in suite order then slug order.
    ///
    /// # Errors
    ///
    /// Returns a classified database error when a query fails.
    pub fn reconcile(
        &self,
        tx: &TxHandle<'_>,
        run: RunContext,
        executed_suites: &[String],
        observed: &BTreeSet<Slug>,
    ) -> Result<Vec<DeletedTest>, LedgerError> {
        let deleted_at = tx.now().max(run.started_at);
        let mut deleted = Vec::new();
        for suite in executed_suites {
            for candidate in load_candidates(tx, suite, run.started_at)? {
                let slug = Slug::new(candidate.slug);
                if observed.contains(&slug) {
                    continue;
                }
                mark_deleted(tx, candidate.test_id, run.run_id, deleted_at)?;
                info!(
                    run_id = %run.run_id,
                    suite = suite.as_str(),
                    slug = %slug,
                    "test marked deleted"
                );
                deleted.push(DeletedTest {
                    test_id: candidate.test_id,
                    slug,
                    name: candidate.name,
                    suite_name: suite.clone(),
                    deleted_at,
                });
            }
        }
        Ok(deleted)
    }
}

/// Loads active tests of `suite` last seen before the run started.
fn load_candidates(
    tx: &TxHandle<'_>,
    suite: &str,
    started_at: Timestamp,
) -> Result<Vec<Candidate>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT test_id, slug, current_name FROM tests
             WHERE suite_name = ?1 AND deleted_at IS NULL AND last_seen_at < ?2
             ORDER BY slug ASC",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![suite, started_at.as_unix_millis()], |row| {
            Ok(Candidate {
                test_id: TestId::new(row.get(0)?),
                slug: row.get(1)?,
                name: row.get(2)?,
            })
        })
        .map_err(db_error)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
}

/// Sets the deletion marker and opens a deletion interval.
fn mark_deleted(
    tx: &TxHandle<'_>,
    test_id: TestId,
    run_id: RunId,
    deleted_at: Timestamp,
) -> Result<(), LedgerError> {
    tx.conn()
        .execute(
            "UPDATE tests SET deleted_at = ?1 WHERE test_id = ?2 AND deleted_at IS NULL",
            params![deleted_at.as_unix_millis(), test_id.get()],
        )
        .map_err(db_error)?;
    tx.conn()
        .execute(
            "INSERT INTO test_deletions (test_id, deleted_by_run_id, deleted_at, restored_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![test_id.get(), run_id.get(), deleted_at.as_unix_millis()],
        )
        .map_err(db_error)?;
    Ok(())
}
