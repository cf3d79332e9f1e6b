// crates/testledger-core/src/core/run.rs
// ============================================================================
// Module: Test Ledger Runner Input
// Description: Run metadata and ordered per-test outcomes produced by a runner.
// Purpose: Define the input contract consumed by run persistence.
// Dependencies: serde, crate::core::{identifiers, slug, time}
// ============================================================================

//! ## Overview
//! A runner submits one [`RunMeta`] plus the ordered list of
//! [`TestOutcome`] values it executed. Both use camelCase JSON. Validation
//! happens in full before any write so malformed input never leaves a
//! partially persisted run behind.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::Slug;
use crate::core::slug::resolve_slug;
use crate::core::time::Timestamp;
use crate::interfaces::LedgerError;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Outcome status of one executed test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Test passed.
    Passed,
    /// Test failed.
    Failed,
    /// Test was skipped.
    Skipped,
}

impl TestStatus {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses a storage label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Run Metadata
// ============================================================================

/// Metadata describing one test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    /// Target environment label.
    pub environment: String,
    /// Source branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// Commit hash under test.
    #[serde(default)]
    pub commit_sha: Option<String>,
    /// Commit message under test.
    #[serde(default)]
    pub commit_message: Option<String>,
    /// Run start time.
    pub started_at: Timestamp,
    /// Run completion time.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    /// Actor or system that triggered the run.
    #[serde(default)]
    pub triggered_by: Option<String>,
    /// Optional suite descriptions keyed by suite name.
    #[serde(default)]
    pub suite_descriptions: BTreeMap<String, String>,
}

// ============================================================================
// SECTION: Test Outcome
// ============================================================================

/// Result of executing one test in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOutcome {
    /// Suite that owns the test.
    pub suite_name: String,
    /// Display name of the test.
    pub test_name: String,
    /// Explicit stable slug.
    #[serde(default)]
    pub slug: Option<String>,
    /// Test description.
    #[serde(default)]
    pub description: Option<String>,
    /// Source file that declares the test.
    #[serde(default)]
    pub file: Option<String>,
    /// Execution status.
    pub status: TestStatus,
    /// Execution duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    /// Endpoint exercised by the test.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP method exercised by the test.
    #[serde(default)]
    pub method: Option<String>,
    /// HTTP status code observed.
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Failure message.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Failure stack trace.
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl TestOutcome {
    /// Creates an outcome with only the required fields set.
    #[must_use]
    pub fn new(
        suite_name: impl Into<String>,
        test_name: impl Into<String>,
        status: TestStatus,
    ) -> Self {
        Self {
            suite_name: suite_name.into(),
            test_name: test_name.into(),
            slug: None,
            description: None,
            file: None,
            status,
            duration_ms: 0,
            endpoint: None,
            method: None,
            status_code: None,
            error_message: None,
            stack_trace: None,
        }
    }

    /// Returns the explicit slug or the slug derived from suite and name.
    #[must_use]
    pub fn resolved_slug(&self) -> Slug {
        resolve_slug(self.slug.as_deref(), &self.suite_name, &self.test_name)
    }

    /// Builds the identity descriptor for this outcome.
    #[must_use]
    pub fn descriptor(&self) -> TestDescriptor {
        TestDescriptor {
            slug: self.resolved_slug(),
            name: self.test_name.clone(),
            description: self.description.clone(),
            suite_name: self.suite_name.clone(),
            file: self.file.clone(),
        }
    }
}

/// Identity-relevant view of a test outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDescriptor {
    /// Stable identity.
    pub slug: Slug,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Owning suite.
    pub suite_name: String,
    /// Declaring source file.
    pub file: Option<String>,
}

// ============================================================================
// SECTION: Ingest Document
// ============================================================================

/// Runner output document accepted by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIngest {
    /// Run metadata.
    pub run: RunMeta,
    /// Ordered test outcomes.
    #[serde(default)]
    pub outcomes: Vec<TestOutcome>,
}

// ============================================================================
// SECTION: Counts
// ============================================================================

/// Per-status counts for a run.
///
/// # Invariants
/// - `total == passed + failed + skipped`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Total outcomes.
    pub total: u64,
    /// Passed outcomes.
    pub passed: u64,
    /// Failed outcomes.
    pub failed: u64,
    /// Skipped outcomes.
    pub skipped: u64,
}

impl RunCounts {
    /// Counts statuses across outcomes.
    #[must_use]
    pub fn from_outcomes(outcomes: &[TestOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            counts.record(outcome.status);
        }
        counts
    }

    /// Records one status.
    pub const fn record(&mut self, status: TestStatus) {
        self.total = self.total.saturating_add(1);
        match status {
            TestStatus::Passed => self.passed = self.passed.saturating_add(1),
            TestStatus::Failed => self.failed = self.failed.saturating_add(1),
            TestStatus::Skipped => self.skipped = self.skipped.saturating_add(1),
        }
    }

    /// Returns true when the per-status counts add up to the total.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.passed.saturating_add(self.failed).saturating_add(self.skipped) == self.total
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates a run and its outcomes before any write happens.
///
/// # Errors
///
/// Returns [`LedgerError::Validation`] describing the first invalid field.
pub fn validate_run(meta: &RunMeta, outcomes: &[TestOutcome]) -> Result<(), LedgerError> {
    if meta.environment.trim().is_empty() {
        return Err(LedgerError::Validation("run environment must not be empty".to_string()));
    }
    if let Some(completed_at) = meta.completed_at
        && completed_at < meta.started_at
    {
        return Err(LedgerError::Validation(format!(
            "run completed_at {completed_at} precedes started_at {}",
            meta.started_at
        )));
    }
    for (index, outcome) in outcomes.iter().enumerate() {
        if outcome.suite_name.trim().is_empty() {
            return Err(LedgerError::Validation(format!(
                "outcome {index} has an empty suite name"
            )));
        }
        if outcome.test_name.trim().is_empty() {
            return Err(LedgerError::Validation(format!(
                "outcome {index} has an empty test name"
            )));
        }
        if outcome.resolved_slug().is_blank() {
            return Err(LedgerError::Validation(format!("outcome {index} has an empty slug")));
        }
    }
    Ok(())
}

/// Returns the distinct suite names in first-appearance order.
#[must_use]
pub fn executed_suites(outcomes: &[TestOutcome]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    for outcome in outcomes {
        if seen.insert(outcome.suite_name.as_str()) {
            ordered.push(outcome.suite_name.clone());
        }
    }
    ordered
}
