// crates/testledger-core/tests/proptest_slug.rs
// ============================================================================
// Module: Slug Property-Based Tests
// Description: Property tests for slug normalization and derivation.
// Purpose: Detect shape violations across wide ASCII input ranges.
// ============================================================================

//! Property-based tests for slug derivation invariants.

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

use proptest::prelude::*;
use testledger_core::derive_slug;
use testledger_core::normalize_slug_component;

proptest! {
    #[test]
    fn normalized_component_has_canonical_shape(input in "[ -~]{0,48}") {
        let normalized = normalize_slug_component(&input);
        prop_assert!(
            normalized.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        );
        prop_assert!(!normalized.starts_with('-'));
        prop_assert!(!normalized.ends_with('-'));
        prop_assert!(!normalized.contains("--"));
    }

    #[test]
    fn normalization_is_idempotent(input in "[ -~]{0,48}") {
        let once = normalize_slug_component(&input);
        prop_assert_eq!(normalize_slug_component(&once), once);
    }

    #[test]
    fn derivation_is_deterministic_and_case_insensitive(
        suite in "[A-Za-z0-9 _./-]{1,24}",
        name in "[A-Za-z0-9 _./-]{1,24}",
    ) {
        let first = derive_slug(&suite, &name);
        prop_assert_eq!(&first, &derive_slug(&suite, &name));
        prop_assert_eq!(&first, &derive_slug(&suite.to_uppercase(), &name.to_lowercase()));
        prop_assert_eq!(first.as_str().matches(':').count(), 1);
    }
}
