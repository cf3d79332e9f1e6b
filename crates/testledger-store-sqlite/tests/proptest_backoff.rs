// crates/testledger-store-sqlite/tests/proptest_backoff.rs
// ============================================================================
// Module: Backoff Property-Based Tests
// Description: Property tests for retry delay computation.
// Purpose: Keep retry delays bounded and growing across the input space.
// ============================================================================

//! Property-based tests for exponential backoff with jitter.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::time::Duration;

use proptest::prelude::*;
use testledger_store_sqlite::backoff_delay;

proptest! {
    #[test]
    fn delay_never_exceeds_max(
        attempt in 0_u32 .. 64,
        base in 1_u64 .. 10_000,
        max in 1_u64 .. 60_000,
        sample in -1.0_f64 .. 2.0,
    ) {
        prop_assert!(backoff_delay(attempt, base, max, sample) <= Duration::from_millis(max));
    }

    #[test]
    fn delay_is_at_least_base(
        attempt in 0_u32 .. 64,
        base in 1_u64 .. 10_000,
        max in 1_u64 .. 60_000,
        sample in 0.0_f64 .. 1.0,
    ) {
        let floor = Duration::from_millis(base.min(max));
        prop_assert!(backoff_delay(attempt, base, max, sample) >= floor);
    }

    #[test]
    fn delay_grows_with_attempt(
        attempt in 0_u32 .. 40,
        base in 1_u64 .. 1_000,
        max in 1_u64 .. 60_000,
    ) {
        let current = backoff_delay(attempt, base, max, 0.0);
        let next = backoff_delay(attempt + 1, base, max, 0.0);
        prop_assert!(next >= current);
    }
}

/// Verifies non-finite jitter samples fall back to no jitter.
#[test]
fn non_finite_jitter_is_ignored() {
    assert_eq!(backoff_delay(2, 100, 10_000, f64::NAN), Duration::from_millis(400));
    assert_eq!(backoff_delay(0, 100, 10_000, 1.0), Duration::from_millis(130));
}
