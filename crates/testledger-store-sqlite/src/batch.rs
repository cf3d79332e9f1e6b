// crates/testledger-store-sqlite/src/batch.rs
// ============================================================================
// Module: Batch Coordinator
// Description: Persists one run's outcomes in one or many transactions.
// Purpose: Keep small runs atomic and large runs progressing chunk by chunk.
// Dependencies: rusqlite, tracing, testledger-core
// ============================================================================

//! ## Overview
//! Small runs (or any run with batching disabled) commit the run header,
//! every result, and reconciliation in a single transaction. Larger runs
//! commit the header first, then ordered chunks of `batch_size` outcomes in
//! independent retried transactions, and finally reconcile once every chunk
//! has been attempted.
//!
//! Reconciliation always observes the slugs of every submitted outcome, so a
//! chunk that failed to persist can never cause its tests to be deleted. A
//! batched run whose reconciliation fails still records its progress and
//! reports the failure in the summary, since its chunks are already durable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use rusqlite::params;
use testledger_core::BatchFailure;
use testledger_core::LedgerError;
use testledger_core::PersistMode;
use testledger_core::PersistSummary;
use testledger_core::ResolvedTest;
use testledger_core::RunCounts;
use testledger_core::RunId;
use testledger_core::RunMeta;
use testledger_core::Slug;
use testledger_core::TestDescriptor;
use testledger_core::TestOutcome;
use testledger_core::Timestamp;
use testledger_core::executed_suites;
use testledger_core::normalize_description;
use testledger_core::validate_run;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::BatchConfig;
use crate::deletion::DeletionDetector;
use crate::deletion::RunContext;
use crate::error::db_error;
use crate::error::sql_count;
use crate::error::sql_index;
use crate::executor::TransactionalExecutor;
use crate::executor::TxHandle;
use crate::executor::TxOptions;
use crate::identity::IdentityResolver;

// ============================================================================
// SECTION: Prepared Input
// ============================================================================

/// Outcome paired with its resolved descriptor.
struct PreparedOutcome<'a> {
    /// Borrowed runner outcome.
    outcome: &'a TestOutcome,
    /// Identity view with the slug already resolved.
    descriptor: TestDescriptor,
}

/// Validated run ready for persistence.
struct PreparedRun<'a> {
    /// Run metadata.
    meta: &'a RunMeta,
    /// Outcomes in submission order.
    outcomes: Vec<PreparedOutcome<'a>>,
    /// Every submitted slug.
    observed: BTreeSet<Slug>,
    /// Executed suites in first-appearance order.
    suites: Vec<String>,
    /// Submitted per-status counts.
    counts: RunCounts,
}

impl<'a> PreparedRun<'a> {
    /// Validates input and resolves slugs before any transaction starts.
    fn new(meta: &'a RunMeta, outcomes: &'a [TestOutcome]) -> Result<Self, LedgerError> {
        validate_run(meta, outcomes)?;
        let prepared: Vec<PreparedOutcome<'a>> = outcomes
            .iter()
            .map(|outcome| PreparedOutcome {
                outcome,
                descriptor: outcome.descriptor(),
            })
            .collect();
        let observed = prepared.iter().map(|entry| entry.descriptor.slug.clone()).collect();
        Ok(Self {
            meta,
            outcomes: prepared,
            observed,
            suites: executed_suites(outcomes),
            counts: RunCounts::from_outcomes(outcomes),
        })
    }

    /// Returns the reconciliation context for `run_id`.
    const fn context(&self, run_id: RunId) -> RunContext {
        RunContext {
            run_id,
            started_at: self.meta.started_at,
        }
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Persists runs through the transactional executor.
#[derive(Clone)]
pub struct BatchCoordinator {
    /// Executor running every transaction.
    executor: TransactionalExecutor,
    /// Chunking settings.
    config: BatchConfig,
}

impl BatchCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub const fn new(executor: TransactionalExecutor, config: BatchConfig) -> Self {
        Self {
            executor,
            config,
        }
    }

    /// Returns the chunking settings.
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Persists one run and reconciles deletions for its suites.
    ///
    /// Outcomes are borrowed; the caller keeps them regardless of outcome.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for invalid input,
    /// [`LedgerError::FatalDatabase`] when the run header cannot be written,
    /// [`LedgerError::PartialBatchFailure`] on the first chunk failure when
    /// `throw_on_error` is set, and terminal database errors otherwise. A
    /// batched run whose reconciliation fails is reported through
    /// [`PersistSummary::reconcile_error`] instead.
    pub fn persist_run(
        &self,
        meta: &RunMeta,
        outcomes: &[TestOutcome],
    ) -> Result<PersistSummary, LedgerError> {
        let run = PreparedRun::new(meta, outcomes)?;
        let summary = if !self.config.enable_batching || outcomes.len() < self.config.batch_size {
            self.persist_single(&run)?
        } else {
            self.persist_batched(&run)?
        };
        info!(
            run_id = %summary.run_id,
            batched = matches!(summary.mode, PersistMode::Batched),
            processed = summary.processed_count,
            total = summary.total_count,
            failed_batches = summary.failed_batches,
            deleted = summary.deleted_tests.len(),
            "run persisted"
        );
        Ok(summary)
    }

    /// Writes everything in one transaction.
    fn persist_single(&self, run: &PreparedRun<'_>) -> Result<PersistSummary, LedgerError> {
        let total = run.outcomes.len();
        let (run_id, deleted_tests) =
            self.executor.run_in_transaction(TxOptions::write("persist_run"), |tx| {
                let run_id = insert_run_header(tx, run)?;
                write_results(tx, run_id, run.meta.started_at, &run.outcomes, 0)?;
                let context = run.context(run_id);
                let deleted = DeletionDetector.reconcile(tx, context, &run.suites, &run.observed)?;
                finalize_run(tx, run_id, total, 0)?;
                Ok((run_id, deleted))
            })?;
        Ok(PersistSummary {
            run_id,
            processed_count: total,
            total_count: total,
            failed_batches: 0,
            succeeded_batches: 1,
            deleted_tests,
            batch_failures: Vec::new(),
            mode: PersistMode::SingleTransaction,
            reconcile_error: None,
        })
    }

    /// Writes the header, ordered chunks, then reconciliation.
    fn persist_batched(&self, run: &PreparedRun<'_>) -> Result<PersistSummary, LedgerError> {
        let total = run.outcomes.len();
        let batch_size = self.config.batch_size.max(1);
        let run_id = self
            .executor
            .run_in_transaction(TxOptions::write("persist_run_header"), |tx| {
                insert_run_header(tx, run)
            })
            .map_err(|error| match error {
                LedgerError::Validation(_) => error,
                other => LedgerError::FatalDatabase(format!("run header: {other}")),
            })?;

        let mut processed = 0_usize;
        let mut succeeded = 0_usize;
        let mut failures: Vec<BatchFailure> = Vec::new();
        for (batch_index, chunk) in run.outcomes.chunks(batch_size).enumerate() {
            let first_position = batch_index.saturating_mul(batch_size);
            debug!(
                run_id = %run_id,
                batch_index,
                first_position,
                size = chunk.len(),
                "persisting batch"
            );
            let result = self.executor.run_in_transaction(TxOptions::write("persist_batch"), |tx| {
                write_results(tx, run_id, run.meta.started_at, chunk, first_position)
            });
            match result {
                Ok(()) => {
                    processed = processed.saturating_add(chunk.len());
                    succeeded = succeeded.saturating_add(1);
                }
                Err(error) => {
                    warn!(run_id = %run_id, batch_index, error = %error, "batch failed");
                    failures.push(BatchFailure {
                        batch_index,
                        first_position,
                        outcome_count: chunk.len(),
                        error: error.to_string(),
                    });
                    if self.config.throw_on_error {
                        self.record_progress(run_id, processed, failures.len());
                        return Err(LedgerError::PartialBatchFailure {
                            batch_index,
                            failed_batches: failures.len(),
                            message: error.to_string(),
                        });
                    }
                }
            }
        }

        let failed_batches = failures.len();
        let reconciled = self.executor.run_in_transaction(TxOptions::write("reconcile_run"), |tx| {
            let context = run.context(run_id);
            let deleted = DeletionDetector.reconcile(tx, context, &run.suites, &run.observed)?;
            finalize_run(tx, run_id, processed, failed_batches)?;
            Ok(deleted)
        });
        let (deleted_tests, reconcile_error) = match reconciled {
            Ok(deleted) => (deleted, None),
            Err(error) => {
                warn!(run_id = %run_id, error = %error, "deletion reconciliation failed");
                self.record_progress(run_id, processed, failed_batches);
                (Vec::new(), Some(error.to_string()))
            }
        };
        Ok(PersistSummary {
            run_id,
            processed_count: processed,
            total_count: total,
            failed_batches,
            succeeded_batches: succeeded,
            deleted_tests,
            batch_failures: failures,
            mode: PersistMode::Batched,
            reconcile_error,
        })
    }

    /// Records progress on a run that will not be reconciled.
    fn record_progress(&self, run_id: RunId, processed: usize, failed_batches: usize) {
        let result = self.executor.run_in_transaction(TxOptions::write("record_progress"), |tx| {
            finalize_run(tx, run_id, processed, failed_batches)
        });
        if let Err(error) = result {
            warn!(run_id = %run_id, error = %error, "failed to record aborted run progress");
        }
    }
}

// ============================================================================
// SECTION: Row Writers
// ============================================================================

/// Upserts the run's suites and inserts the run row.
fn insert_run_header(tx: &TxHandle<'_>, run: &PreparedRun<'_>) -> Result<RunId, LedgerError> {
    let now = tx.now().as_unix_millis();
    let mut suite_ids = Vec::with_capacity(run.suites.len());
    for suite in &run.suites {
        let description = normalize_description(
            run.meta.suite_descriptions.get(suite).map(String::as_str),
        );
        tx.conn()
            .execute(
                "INSERT INTO test_suites (name, description, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE
                 SET description = COALESCE(excluded.description, test_suites.description)",
                params![suite, description, now],
            )
            .map_err(db_error)?;
        let suite_id: i64 = tx
            .conn()
            .query_row("SELECT suite_id FROM test_suites WHERE name = ?1", params![suite], |row| {
                row.get(0)
            })
            .map_err(db_error)?;
        suite_ids.push(suite_id);
    }

    let meta = run.meta;
    tx.conn()
        .execute(
            "INSERT INTO test_runs (suite_id, environment, branch, commit_sha, commit_message, \
             triggered_by, started_at, completed_at, total, passed, failed, skipped, \
             persisted_count, failed_batches, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0, ?13)",
            params![
                suite_ids.first(),
                meta.environment.trim(),
                meta.branch,
                meta.commit_sha,
                meta.commit_message,
                meta.triggered_by,
                meta.started_at.as_unix_millis(),
                meta.completed_at.map(Timestamp::as_unix_millis),
                sql_count(run.counts.total, "total")?,
                sql_count(run.counts.passed, "passed")?,
                sql_count(run.counts.failed, "failed")?,
                sql_count(run.counts.skipped, "skipped")?,
                now,
            ],
        )
        .map_err(db_error)?;
    let run_id = RunId::new(tx.conn().last_insert_rowid());

    for (position, suite_id) in suite_ids.iter().enumerate() {
        tx.conn()
            .execute(
                "INSERT INTO run_suites (run_id, suite_id, position) VALUES (?1, ?2, ?3)",
                params![run_id.get(), suite_id, sql_index(position, "suite position")?],
            )
            .map_err(db_error)?;
    }
    Ok(run_id)
}

/// Resolves identities and appends results for a contiguous slice of outcomes.
fn write_results(
    tx: &TxHandle<'_>,
    run_id: RunId,
    run_started_at: Timestamp,
    outcomes: &[PreparedOutcome<'_>],
    first_position: usize,
) -> Result<(), LedgerError> {
    let resolver = IdentityResolver;
    for (offset, entry) in outcomes.iter().enumerate() {
        let resolved = resolver.resolve_or_create(tx, &entry.descriptor, run_started_at)?;
        insert_result(tx, run_id, &resolved, entry, first_position.saturating_add(offset))?;
    }
    Ok(())
}

/// Appends one immutable result row.
fn insert_result(
    tx: &TxHandle<'_>,
    run_id: RunId,
    resolved: &ResolvedTest,
    entry: &PreparedOutcome<'_>,
    position: usize,
) -> Result<(), LedgerError> {
    let outcome = entry.outcome;
    tx.conn()
        .execute(
            "INSERT INTO test_results (run_id, test_id, position, suite_name, name, description, \
             hash, endpoint, method, status_code, status, duration_ms, error_message, \
             stack_trace, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                run_id.get(),
                resolved.test_id.get(),
                sql_index(position, "result position")?,
                entry.descriptor.suite_name,
                entry.descriptor.name,
                normalize_description(entry.descriptor.description.as_deref()),
                resolved.hash,
                outcome.endpoint,
                outcome.method,
                outcome.status_code,
                outcome.status.as_str(),
                sql_count(outcome.duration_ms, "duration_ms")?,
                outcome.error_message,
                outcome.stack_trace,
                tx.now().as_unix_millis(),
            ],
        )
        .map_err(db_error)?;
    Ok(())
}

/// Stores run bookkeeping once persistence has settled.
fn finalize_run(
    tx: &TxHandle<'_>,
    run_id: RunId,
    processed: usize,
    failed_batches: usize,
) -> Result<(), LedgerError> {
    let updated = tx
        .conn()
        .execute(
            "UPDATE test_runs SET persisted_count = ?1, failed_batches = ?2 WHERE run_id = ?3",
            params![
                sql_index(processed, "persisted_count")?,
                sql_index(failed_batches, "failed_batches")?,
                run_id.get()
            ],
        )
        .map_err(db_error)?;
    if updated == 0 {
        return Err(LedgerError::FatalDatabase(format!("run {run_id} vanished before finalize")));
    }
    Ok(())
}
