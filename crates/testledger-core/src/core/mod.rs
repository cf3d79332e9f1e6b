// crates/testledger-core/src/core/mod.rs
// ============================================================================
// Module: Test Ledger Core Types
// Description: Canonical identity, run, record, and analytics structures.
// Purpose: Provide stable, serializable types shared by stores and hosts.
// Dependencies: serde, serde_jcs, sha2, time
// ============================================================================

//! ## Overview
//! Core types define the runner input contract, the persisted identity
//! model, and the read models served to dashboards. They are the canonical
//! source for every derived surface (store rows, CLI JSON).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod analytics;
pub mod hashing;
pub mod identifiers;
pub mod records;
pub mod run;
pub mod slug;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use analytics::AnalyticsKind;
pub use analytics::AnalyticsQuery;
pub use analytics::AnalyticsReport;
pub use analytics::DailyStat;
pub use analytics::FlakyTest;
pub use analytics::HealthBreakdown;
pub use analytics::Regression;
pub use analytics::TestHealth;
pub use hashing::HashError;
pub use hashing::identity_hash;
pub use hashing::normalize_description;
pub use identifiers::RunId;
pub use identifiers::Slug;
pub use identifiers::SuiteId;
pub use identifiers::TestId;
pub use records::BatchFailure;
pub use records::DeletedTest;
pub use records::IdentityChange;
pub use records::PersistMode;
pub use records::PersistSummary;
pub use records::ReadOutcome;
pub use records::ResolvedTest;
pub use records::RunDetail;
pub use records::RunMetadata;
pub use records::RunPage;
pub use records::RunSummary;
pub use records::RunTestEntry;
pub use records::RunTestStatus;
pub use records::SuiteDetail;
pub use records::TestHistoryEntry;
pub use records::TestRecord;
pub use records::TestResultRecord;
pub use run::RunCounts;
pub use run::RunIngest;
pub use run::RunMeta;
pub use run::TestDescriptor;
pub use run::TestOutcome;
pub use run::TestStatus;
pub use run::executed_suites;
pub use run::validate_run;
pub use slug::derive_slug;
pub use slug::normalize_slug_component;
pub use time::DAY_MILLIS;
pub use time::Timestamp;
pub use time::TimestampError;
