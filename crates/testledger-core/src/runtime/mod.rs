// crates/testledger-core/src/runtime/mod.rs
// ============================================================================
// Module: Test Ledger Runtime Helpers
// Description: Default clock and metrics implementations.
// Purpose: Provide ready-to-inject implementations of the core interfaces.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! Runtime helpers implement [`crate::Clock`] and
//! [`crate::TransactionMetrics`] for production hosts and tests.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod clock;
pub mod metrics;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use clock::ManualClock;
pub use clock::SystemClock;
pub use metrics::AtomicTransactionMetrics;
pub use metrics::NoopTransactionMetrics;
