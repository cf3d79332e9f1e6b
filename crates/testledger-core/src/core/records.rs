// crates/testledger-core/src/core/records.rs
// ============================================================================
// Module: Test Ledger Records
// Description: Persisted identity, history, result, and read-model records.
// Purpose: Provide stable, serializable shapes for store rows and read APIs.
// Dependencies: serde, crate::core::{identifiers, run, time}
// ============================================================================

//! ## Overview
//! Records mirror what the store persists (tests, history intervals,
//! immutable results, deletion intervals) and what the read APIs return
//! (run pages, run details, persistence summaries). All timestamps serialize
//! as RFC 3339.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RunId;
use crate::core::identifiers::Slug;
use crate::core::identifiers::TestId;
use crate::core::run::RunCounts;
use crate::core::run::TestStatus;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Identity Records
// ============================================================================

/// Stable test identity row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Row identifier.
    pub test_id: TestId,
    /// Stable identity.
    pub slug: Slug,
    /// Content fingerprint of the current name and description.
    pub hash: String,
    /// Current display name.
    pub current_name: String,
    /// Current description.
    pub current_description: Option<String>,
    /// Owning suite.
    pub suite_name: String,
    /// Declaring source file.
    pub test_file: Option<String>,
    /// First observation.
    pub first_seen_at: Timestamp,
    /// Most recent observation.
    pub last_seen_at: Timestamp,
    /// Number of runs that observed the test.
    pub total_runs: u64,
    /// Deletion marker.
    pub deleted_at: Option<Timestamp>,
}

impl TestRecord {
    /// Returns true when the test is currently marked deleted.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// One version of a test's name and description.
///
/// # Invariants
/// - Intervals are half-open `[valid_from, valid_to)`.
/// - Exactly one entry per test has `valid_to == None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestHistoryEntry {
    /// Row identifier.
    pub history_id: i64,
    /// Owning test.
    pub test_id: TestId,
    /// Name during the interval.
    pub name: String,
    /// Description during the interval.
    pub description: Option<String>,
    /// Content fingerprint during the interval.
    pub hash: String,
    /// Interval start.
    pub valid_from: Timestamp,
    /// Interval end, `None` while current.
    pub valid_to: Option<Timestamp>,
}

/// Outcome of resolving a descriptor against the identity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityChange {
    /// A new identity was created.
    Created,
    /// The identity existed with the same metadata.
    Unchanged,
    /// The identity existed and its metadata changed.
    MetadataChanged,
    /// A deleted identity reappeared.
    Resurrected {
        /// Whether the metadata also changed.
        metadata_changed: bool,
    },
}

/// Result of identity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTest {
    /// Stable identity row.
    pub test_id: TestId,
    /// Slug that was resolved.
    pub slug: Slug,
    /// Content fingerprint of the resolved metadata.
    pub hash: String,
    /// What resolution did to the identity.
    pub change: IdentityChange,
}

/// Test newly marked deleted by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedTest {
    /// Identity row.
    pub test_id: TestId,
    /// Stable identity.
    pub slug: Slug,
    /// Display name at deletion.
    pub name: String,
    /// Owning suite.
    pub suite_name: String,
    /// Deletion time.
    pub deleted_at: Timestamp,
}

/// Immutable record of one test execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultRecord {
    /// Row identifier.
    pub result_id: i64,
    /// Owning run.
    pub run_id: RunId,
    /// Identity row.
    pub test_id: TestId,
    /// Outcome index within the run.
    pub position: u64,
    /// Suite snapshot.
    pub suite_name: String,
    /// Name snapshot.
    pub name: String,
    /// Description snapshot.
    pub description: Option<String>,
    /// Hash snapshot.
    pub hash: String,
    /// Endpoint snapshot.
    pub endpoint: Option<String>,
    /// Method snapshot.
    pub method: Option<String>,
    /// Observed HTTP status code.
    pub status_code: Option<u16>,
    /// Execution status.
    pub status: TestStatus,
    /// Duration in milliseconds.
    pub duration_ms: u64,
    /// Failure message.
    pub error_message: Option<String>,
    /// Failure stack trace.
    pub stack_trace: Option<String>,
}

// ============================================================================
// SECTION: Persistence Summary
// ============================================================================

/// Strategy used to persist a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// Everything in one transaction.
    SingleTransaction,
    /// Header, ordered chunks, and reconciliation in separate transactions.
    Batched,
}

/// Failure of one persistence chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Zero-based chunk index.
    pub batch_index: usize,
    /// Outcome index of the chunk's first entry.
    pub first_position: usize,
    /// Outcomes in the chunk.
    pub outcome_count: usize,
    /// Rendered error.
    pub error: String,
}

/// Result of persisting one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistSummary {
    /// Persisted run.
    pub run_id: RunId,
    /// Outcomes whose results were committed.
    pub processed_count: usize,
    /// Outcomes submitted.
    pub total_count: usize,
    /// Chunks that failed.
    pub failed_batches: usize,
    /// Chunks that committed.
    pub succeeded_batches: usize,
    /// Tests newly marked deleted.
    pub deleted_tests: Vec<DeletedTest>,
    /// Per-chunk failure details.
    pub batch_failures: Vec<BatchFailure>,
    /// Strategy used.
    pub mode: PersistMode,
    /// Deletion reconciliation failure after the results committed.
    #[serde(default)]
    pub reconcile_error: Option<String>,
}

impl PersistSummary {
    /// Returns true when every outcome was committed and deletions reconciled.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed_batches == 0
            && self.processed_count == self.total_count
            && self.reconcile_error.is_none()
    }
}

// ============================================================================
// SECTION: Run Read Models
// ============================================================================

/// Run row as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Primary suite.
    pub suite_name: Option<String>,
    /// Target environment.
    pub environment: String,
    /// Source branch.
    pub branch: Option<String>,
    /// Commit hash.
    pub commit_sha: Option<String>,
    /// Start time.
    pub started_at: Timestamp,
    /// Completion time.
    pub completed_at: Option<Timestamp>,
    /// Submitted per-status counts.
    pub counts: RunCounts,
    /// Results actually committed.
    pub persisted_count: u64,
    /// Chunks that failed to persist.
    pub failed_batches: u64,
}

/// Additional run metadata shown in run details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Commit message.
    pub commit_message: Option<String>,
    /// Trigger source.
    pub triggered_by: Option<String>,
    /// Every suite the run executed, in first-reference order.
    pub suites: Vec<String>,
}

/// Per-test status within a run detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTestStatus {
    /// Test passed.
    Passed,
    /// Test failed.
    Failed,
    /// Test was skipped.
    Skipped,
    /// Test was marked deleted as of this run.
    Deleted,
}

impl From<TestStatus> for RunTestStatus {
    fn from(status: TestStatus) -> Self {
        match status {
            TestStatus::Passed => Self::Passed,
            TestStatus::Failed => Self::Failed,
            TestStatus::Skipped => Self::Skipped,
        }
    }
}

/// One test line in a run detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTestEntry {
    /// Identity row.
    pub test_id: TestId,
    /// Stable identity.
    pub slug: Slug,
    /// Name at execution (or current name for deleted entries).
    pub name: String,
    /// Description at execution.
    pub description: Option<String>,
    /// Status in this run.
    pub status: RunTestStatus,
    /// Duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Endpoint.
    pub endpoint: Option<String>,
    /// Method.
    pub method: Option<String>,
    /// Observed HTTP status code.
    pub status_code: Option<u16>,
    /// Failure message.
    pub error_message: Option<String>,
    /// Deletion time for deleted entries.
    pub deleted_at: Option<Timestamp>,
}

/// Tests of one suite within a run detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteDetail {
    /// Suite name.
    pub name: String,
    /// Tests in outcome order, deleted entries last.
    pub tests: Vec<RunTestEntry>,
}

/// Full view of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetail {
    /// Listing summary.
    pub summary: RunSummary,
    /// Tests grouped by suite.
    pub suites: Vec<SuiteDetail>,
    /// Extra metadata.
    pub metadata: RunMetadata,
}

/// One page of runs in reverse chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPage {
    /// Runs on this page.
    pub runs: Vec<RunSummary>,
    /// Opaque cursor for the next page.
    pub next_cursor: Option<String>,
    /// Whether more runs exist.
    pub has_more: bool,
}

// ============================================================================
// SECTION: Degraded Reads
// ============================================================================

/// Read result that degrades instead of failing when the datastore is down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadOutcome<T> {
    /// Data was read.
    Available {
        /// Read payload.
        data: T,
    },
    /// The datastore could not serve the read.
    Unavailable {
        /// Rendered failure.
        reason: String,
    },
}

impl<T> ReadOutcome<T> {
    /// Returns the payload when available.
    #[must_use]
    pub fn available(self) -> Option<T> {
        match self {
            Self::Available {
                data,
            } => Some(data),
            Self::Unavailable {
                ..
            } => None,
        }
    }

    /// Returns true when the datastore was unavailable.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
