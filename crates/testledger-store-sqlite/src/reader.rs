// crates/testledger-store-sqlite/src/reader.rs
// ============================================================================
// Module: Run Reader
// Description: Paginated run listings, run details, and identity lookups.
// Purpose: Serve the dashboard read models from committed ledger state.
// Dependencies: rusqlite, serde, serde_json, testledger-core
// ============================================================================

//! ## Overview
//! Runs are listed newest first by `(started_at, run_id)` with keyset
//! pagination. The cursor is the JSON encoding of the last row's key, so it
//! stays valid while new runs are appended.
//!
//! A run detail groups the run's results by suite in outcome order. Tests of
//! the run's suites whose deletion interval covers the run start (or that the
//! run itself deleted) are appended to their suite with status `deleted`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use serde::Serialize;
use testledger_core::LedgerError;
use testledger_core::RunCounts;
use testledger_core::RunDetail;
use testledger_core::RunId;
use testledger_core::RunMetadata;
use testledger_core::RunPage;
use testledger_core::RunSummary;
use testledger_core::RunTestEntry;
use testledger_core::RunTestStatus;
use testledger_core::Slug;
use testledger_core::SuiteDetail;
use testledger_core::TestHistoryEntry;
use testledger_core::TestId;
use testledger_core::TestRecord;
use testledger_core::TestResultRecord;
use testledger_core::TestStatus;
use testledger_core::Timestamp;

use crate::error::db_error;
use crate::error::sql_index;
use crate::error::stored_count;
use crate::executor::TransactionalExecutor;
use crate::executor::TxHandle;
use crate::executor::TxOptions;
use crate::identity::load_history;
use crate::identity::load_test_by_slug;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest page size served by [`RunReader::list_runs`].
pub const MAX_PAGE_SIZE: usize = 500;
/// Longest accepted cursor.
const MAX_CURSOR_LENGTH: usize = 256;

/// Columns selected for [`RunSummary`] rows.
const RUN_COLUMNS: &str = "r.run_id, s.name, r.environment, r.branch, r.commit_sha, r.started_at, \
                           r.completed_at, r.total, r.passed, r.failed, r.skipped, \
                           r.persisted_count, r.failed_batches";

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// Keyset position of the last row on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunCursor {
    /// Start time of the last run returned.
    started_at: i64,
    /// Identifier of the last run returned.
    run_id: i64,
}

impl RunCursor {
    /// Decodes an opaque cursor.
    fn decode(raw: &str) -> Result<Self, LedgerError> {
        if raw.len() > MAX_CURSOR_LENGTH {
            return Err(LedgerError::Validation("cursor exceeds length limit".to_string()));
        }
        serde_json::from_str(raw)
            .map_err(|err| LedgerError::Validation(format!("invalid cursor: {err}")))
    }

    /// Encodes the cursor.
    fn encode(self) -> Result<String, LedgerError> {
        serde_json::to_string(&self)
            .map_err(|err| LedgerError::FatalDatabase(format!("encode cursor: {err}")))
    }
}

// ============================================================================
// SECTION: Reader
// ============================================================================

/// Read APIs over runs, results, and identities.
#[derive(Clone)]
pub struct RunReader {
    /// Executor running read transactions.
    executor: TransactionalExecutor,
}

impl RunReader {
    /// Creates a reader.
    #[must_use]
    pub const fn new(executor: TransactionalExecutor) -> Self {
        Self {
            executor,
        }
    }

    /// Lists runs newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for a zero limit or a malformed
    /// cursor, or a terminal database error.
    pub fn list_runs(&self, limit: usize, cursor: Option<&str>) -> Result<RunPage, LedgerError> {
        if limit == 0 {
            return Err(LedgerError::Validation("limit must be greater than zero".to_string()));
        }
        let limit = limit.min(MAX_PAGE_SIZE);
        let cursor = cursor.map(RunCursor::decode).transpose()?;
        let fetch = sql_index(limit.saturating_add(1), "limit")?;
        let mut runs = self.executor.run_in_transaction(TxOptions::read("list_runs"), |tx| {
            let base = format!(
                "SELECT {RUN_COLUMNS} FROM test_runs r
                 LEFT JOIN test_suites s ON s.suite_id = r.suite_id"
            );
            let raw = match cursor {
                Some(position) => {
                    let mut stmt = tx
                        .conn()
                        .prepare(&format!(
                            "{base} WHERE r.started_at < ?1 OR (r.started_at = ?1 AND r.run_id < ?2)
                             ORDER BY r.started_at DESC, r.run_id DESC LIMIT ?3"
                        ))
                        .map_err(db_error)?;
                    stmt.query_map(
                        params![position.started_at, position.run_id, fetch],
                        RawRunRow::from_row,
                    )
                    .map_err(db_error)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(db_error)?
                }
                None => {
                    let mut stmt = tx
                        .conn()
                        .prepare(&format!(
                            "{base} ORDER BY r.started_at DESC, r.run_id DESC LIMIT ?1"
                        ))
                        .map_err(db_error)?;
                    stmt.query_map(params![fetch], RawRunRow::from_row)
                        .map_err(db_error)?
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(db_error)?
                }
            };
            raw.into_iter().map(RawRunRow::into_summary).collect::<Result<Vec<_>, _>>()
        })?;
        let has_more = runs.len() > limit;
        runs.truncate(limit);
        let next_cursor = match (has_more, runs.last()) {
            (true, Some(last)) => Some(
                RunCursor {
                    started_at: last.started_at.as_unix_millis(),
                    run_id: last.run_id.get(),
                }
                .encode()?,
            ),
            _ => None,
        };
        Ok(RunPage {
            runs,
            next_cursor,
            has_more,
        })
    }

    /// Returns the full view of one run, or `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn get_run_detail(&self, run_id: RunId) -> Result<Option<RunDetail>, LedgerError> {
        self.executor.run_in_transaction(TxOptions::read("get_run_detail"), |tx| {
            let Some((summary, commit_message, triggered_by)) = load_run(tx, run_id)? else {
                return Ok(None);
            };
            let suite_names = load_run_suites(tx, run_id)?;
            let mut suites: Vec<SuiteDetail> = suite_names
                .iter()
                .map(|name| SuiteDetail {
                    name: name.clone(),
                    tests: Vec::new(),
                })
                .collect();
            let mut present = BTreeSet::new();
            for (record, slug) in load_results(tx, run_id)? {
                present.insert(record.test_id);
                let entry = RunTestEntry {
                    test_id: record.test_id,
                    slug,
                    name: record.name,
                    description: record.description,
                    status: RunTestStatus::from(record.status),
                    duration_ms: Some(record.duration_ms),
                    endpoint: record.endpoint,
                    method: record.method,
                    status_code: record.status_code,
                    error_message: record.error_message,
                    deleted_at: None,
                };
                suite_slot(&mut suites, &record.suite_name).tests.push(entry);
            }
            for (suite_name, entry) in load_deleted_entries(tx, run_id, summary.started_at)? {
                if present.insert(entry.test_id) {
                    suite_slot(&mut suites, &suite_name).tests.push(entry);
                }
            }
            Ok(Some(RunDetail {
                summary,
                suites,
                metadata: RunMetadata {
                    commit_message,
                    triggered_by,
                    suites: suite_names,
                },
            }))
        })
    }

    /// Returns the immutable results of one run in outcome order.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn run_results(&self, run_id: RunId) -> Result<Vec<TestResultRecord>, LedgerError> {
        self.executor.run_in_transaction(TxOptions::read("run_results"), |tx| {
            Ok(load_results(tx, run_id)?.into_iter().map(|(record, _)| record).collect())
        })
    }

    /// Returns the identity row for `slug`.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn test_by_slug(&self, slug: &Slug) -> Result<Option<TestRecord>, LedgerError> {
        self.executor
            .run_in_transaction(TxOptions::read("test_by_slug"), |tx| load_test_by_slug(tx, slug))
    }

    /// Returns the version history of one test, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a terminal database error.
    pub fn test_history(&self, test_id: TestId) -> Result<Vec<TestHistoryEntry>, LedgerError> {
        self.executor
            .run_in_transaction(TxOptions::read("test_history"), |tx| load_history(tx, test_id))
    }
}

/// Returns the suite group named `name`, appending it when missing.
fn suite_slot<'a>(suites: &'a mut Vec<SuiteDetail>, name: &str) -> &'a mut SuiteDetail {
    let index = match suites.iter().position(|suite| suite.name == name) {
        Some(index) => index,
        None => {
            suites.push(SuiteDetail {
                name: name.to_string(),
                tests: Vec::new(),
            });
            suites.len() - 1
        }
    };
    &mut suites[index]
}

// ============================================================================
// SECTION: Row Loading
// ============================================================================

/// Raw `test_runs` row joined with the primary suite name.
struct RawRunRow {
    /// Run identifier.
    run_id: i64,
    /// Primary suite.
    suite_name: Option<String>,
    /// Environment.
    environment: String,
    /// Branch.
    branch: Option<String>,
    /// Commit hash.
    commit_sha: Option<String>,
    /// Start time.
    started_at: i64,
    /// Completion time.
    completed_at: Option<i64>,
    /// Total.
    total: i64,
    /// Passed.
    passed: i64,
    /// Failed.
    failed: i64,
    /// Skipped.
    skipped: i64,
    /// Committed results.
    persisted_count: i64,
    /// Failed chunks.
    failed_batches: i64,
}

impl RawRunRow {
    /// Reads a row selected with [`RUN_COLUMNS`].
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            suite_name: row.get(1)?,
            environment: row.get(2)?,
            branch: row.get(3)?,
            commit_sha: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            total: row.get(7)?,
            passed: row.get(8)?,
            failed: row.get(9)?,
            skipped: row.get(10)?,
            persisted_count: row.get(11)?,
            failed_batches: row.get(12)?,
        })
    }

    /// Converts into a typed summary.
    fn into_summary(self) -> Result<RunSummary, LedgerError> {
        Ok(RunSummary {
            run_id: RunId::new(self.run_id),
            suite_name: self.suite_name,
            environment: self.environment,
            branch: self.branch,
            commit_sha: self.commit_sha,
            started_at: Timestamp::from_unix_millis(self.started_at),
            completed_at: self.completed_at.map(Timestamp::from_unix_millis),
            counts: RunCounts {
                total: stored_count(self.total, "test_runs.total")?,
                passed: stored_count(self.passed, "test_runs.passed")?,
                failed: stored_count(self.failed, "test_runs.failed")?,
                skipped: stored_count(self.skipped, "test_runs.skipped")?,
            },
            persisted_count: stored_count(self.persisted_count, "test_runs.persisted_count")?,
            failed_batches: stored_count(self.failed_batches, "test_runs.failed_batches")?,
        })
    }
}

/// Loads a run summary plus its commit message and trigger.
fn load_run(
    tx: &TxHandle<'_>,
    run_id: RunId,
) -> Result<Option<(RunSummary, Option<String>, Option<String>)>, LedgerError> {
    let row = tx
        .conn()
        .query_row(
            &format!(
                "SELECT {RUN_COLUMNS}, r.commit_message, r.triggered_by FROM test_runs r
                 LEFT JOIN test_suites s ON s.suite_id = r.suite_id WHERE r.run_id = ?1"
            ),
            params![run_id.get()],
            |row| {
                Ok((
                    RawRunRow::from_row(row)?,
                    row.get::<_, Option<String>>(13)?,
                    row.get::<_, Option<String>>(14)?,
                ))
            },
        )
        .optional()
        .map_err(db_error)?;
    row.map(|(raw, commit_message, triggered_by)| {
        Ok((raw.into_summary()?, commit_message, triggered_by))
    })
    .transpose()
}

/// Loads the names of every suite the run executed, in order.
fn load_run_suites(tx: &TxHandle<'_>, run_id: RunId) -> Result<Vec<String>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT s.name FROM run_suites rs JOIN test_suites s ON s.suite_id = rs.suite_id
             WHERE rs.run_id = ?1 ORDER BY rs.position ASC",
        )
        .map_err(db_error)?;
    let rows = stmt.query_map(params![run_id.get()], |row| row.get(0)).map_err(db_error)?;
    rows.collect::<Result<Vec<String>, _>>().map_err(db_error)
}

/// Loads a run's results in outcome order with each test's slug.
fn load_results(
    tx: &TxHandle<'_>,
    run_id: RunId,
) -> Result<Vec<(TestResultRecord, Slug)>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT r.result_id, r.run_id, r.test_id, r.position, r.suite_name, r.name,
                    r.description, r.hash, r.endpoint, r.method, r.status_code, r.status,
                    r.duration_ms, r.error_message, r.stack_trace, t.slug
             FROM test_results r JOIN tests t ON t.test_id = r.test_id
             WHERE r.run_id = ?1 ORDER BY r.position ASC",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![run_id.get()], |row| {
            Ok((
                (
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ),
                (
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<u16>>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, i64>(12)?,
                    row.get::<_, Option<String>>(13)?,
                    row.get::<_, Option<String>>(14)?,
                    row.get::<_, String>(15)?,
                ),
            ))
        })
        .map_err(db_error)?;
    let mut results = Vec::new();
    for row in rows {
        let (
            (result_id, run_id, test_id, position, suite_name, name, description, hash),
            (endpoint, method, status_code, status, duration_ms, error_message, stack_trace, slug),
        ) = row.map_err(db_error)?;
        let status = TestStatus::parse(&status)
            .ok_or_else(|| LedgerError::FatalDatabase(format!("unknown stored status: {status}")))?;
        results.push((
            TestResultRecord {
                result_id,
                run_id: RunId::new(run_id),
                test_id: TestId::new(test_id),
                position: stored_count(position, "test_results.position")?,
                suite_name,
                name,
                description,
                hash,
                endpoint,
                method,
                status_code,
                status,
                duration_ms: stored_count(duration_ms, "test_results.duration_ms")?,
                error_message,
                stack_trace,
            },
            Slug::new(slug),
        ));
    }
    Ok(results)
}

/// Loads tests of the run's suites that were deleted as of the run.
///
/// A test qualifies when this run deleted it, or when a deletion interval
/// starting at or before the run start had not been closed by then.
fn load_deleted_entries(
    tx: &TxHandle<'_>,
    run_id: RunId,
    started_at: Timestamp,
) -> Result<Vec<(String, RunTestEntry)>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT t.test_id, t.slug, t.current_name, t.current_description, t.suite_name,
                    MIN(d.deleted_at)
             FROM test_deletions d
             JOIN tests t ON t.test_id = d.test_id
             JOIN test_suites s ON s.name = t.suite_name
             JOIN run_suites rs ON rs.suite_id = s.suite_id AND rs.run_id = ?1
             WHERE d.deleted_by_run_id = ?1
                OR (d.deleted_at <= ?2 AND (d.restored_at IS NULL OR d.restored_at > ?2))
             GROUP BY t.test_id
             ORDER BY t.suite_name ASC, t.slug ASC",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![run_id.get(), started_at.as_unix_millis()], |row| {
            Ok((
                row.get::<_, String>(4)?,
                RunTestEntry {
                    test_id: TestId::new(row.get(0)?),
                    slug: Slug::new(row.get::<_, String>(1)?),
                    name: row.get(2)?,
                    description: row.get(3)?,
                    status: RunTestStatus::Deleted,
                    duration_ms: None,
                    endpoint: None,
                    method: None,
                    status_code: None,
                    error_message: None,
                    deleted_at: Some(Timestamp::from_unix_millis(row.get(5)?)),
                },
            ))
        })
        .map_err(db_error)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
}
