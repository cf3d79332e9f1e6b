// crates/testledger-core/src/lib.rs
// ============================================================================
// Module: Test Ledger Core Library
// Description: Public API surface for the Test Ledger core.
// Purpose: Expose core types, interfaces, and runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Test Ledger core models stable test identities reconciled from ephemeral
//! per-run executions: slugs, renameable history intervals, deletion and
//! resurrection, and the immutable result log. It is backend-agnostic; the
//! SQLite store implements persistence on top of these types.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::Clock;
pub use interfaces::FailureClass;
pub use interfaces::LedgerError;
pub use interfaces::TransactionMetrics;
pub use interfaces::TransactionMetricsSnapshot;
pub use runtime::AtomicTransactionMetrics;
pub use runtime::ManualClock;
pub use runtime::NoopTransactionMetrics;
pub use runtime::SystemClock;
