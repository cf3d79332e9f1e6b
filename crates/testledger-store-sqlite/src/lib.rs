// crates/testledger-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Test Ledger
// Description: Transactional test identity and result store backed by SQLite.
// Purpose: Persist runs atomically and serve identity, run, and analytics reads.
// Dependencies: testledger-core, r2d2, rusqlite, tracing
// ============================================================================

//! ## Overview
//! This crate implements the test ledger on `SQLite`:
//! - [`TransactionalExecutor`] runs units of work with retry, savepoints,
//!   per-attempt deadlines, and metrics.
//! - [`IdentityResolver`] and [`DeletionDetector`] maintain stable,
//!   renameable, deletable, and resurrectable test identities.
//! - [`BatchCoordinator`] persists a run in one transaction or in chunks.
//! - [`RunReader`], [`AnalyticsReader`], and [`DashboardView`] serve reads.
//!
//! [`SqliteTestLedger`] wires everything over one bounded connection pool.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod analytics;
pub mod batch;
pub mod config;
pub mod dashboard;
pub mod deletion;
pub mod error;
pub mod executor;
pub mod identity;
pub mod ledger;
pub mod pool;
pub mod reader;
pub mod schema;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use analytics::AnalyticsReader;
pub use batch::BatchCoordinator;
pub use config::BatchConfig;
pub use config::SqliteLedgerConfig;
pub use config::SqliteStoreMode;
pub use config::SqliteSyncMode;
pub use config::TransactionConfig;
pub use dashboard::DashboardView;
pub use deletion::DeletionDetector;
pub use deletion::RunContext;
pub use error::classify_sqlite_error;
pub use executor::SavepointOutcome;
pub use executor::TransactionalExecutor;
pub use executor::TxHandle;
pub use executor::TxMode;
pub use executor::TxOptions;
pub use executor::backoff_delay;
pub use identity::IdentityResolver;
pub use ledger::SqliteTestLedger;
pub use pool::LedgerPool;
pub use pool::PoolMetricsSnapshot;
pub use reader::RunReader;
pub use schema::SCHEMA_VERSION;
