// crates/testledger-core/src/core/slug.rs
// ============================================================================
// Module: Test Ledger Slug Derivation
// Description: Deterministic slug derivation from suite and test names.
// Purpose: Give tests without an explicit slug a reproducible identity.
// Dependencies: crate::core::identifiers
// ============================================================================

//! ## Overview
//! A derived slug is `normalize(suite) + ":" + normalize(test)`, where
//! `normalize` lowercases, collapses every run of non-alphanumeric
//! characters into one `-`, and trims leading and trailing dashes.
//! Derivation depends on the display name, so renaming a test without an
//! explicit slug yields a new identity.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::identifiers::Slug;

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Separator between the suite and test components of a derived slug.
pub const SLUG_SEPARATOR: char = ':';

/// Normalizes one slug component.
#[must_use]
pub fn normalize_slug_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Derives the slug for a test from its suite and display name.
#[must_use]
pub fn derive_slug(suite_name: &str, test_name: &str) -> Slug {
    let suite = normalize_slug_component(suite_name);
    let test = normalize_slug_component(test_name);
    Slug::new(format!("{suite}{SLUG_SEPARATOR}{test}"))
}

/// Returns the explicit slug when present and non-blank, else derives one.
///
/// An explicit slug consisting only of whitespace is kept as the empty slug
/// so the resolver can reject it instead of silently deriving a new identity.
#[must_use]
pub fn resolve_slug(explicit: Option<&str>, suite_name: &str, test_name: &str) -> Slug {
    explicit.map_or_else(
        || derive_slug(suite_name, test_name),
        |value| Slug::new(value.trim()),
    )
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::derive_slug;
    use super::normalize_slug_component;
    use super::resolve_slug;

    /// Verifies separators collapse and edges are trimmed.
    #[test]
    fn normalize_collapses_separators() {
        assert_eq!(normalize_slug_component("  Users API -- v2!! "), "users-api-v2");
        assert_eq!(normalize_slug_component("GET /users/{id}"), "get-users-id");
        assert_eq!(normalize_slug_component("***"), "");
    }

    /// Verifies derived slugs join suite and test components.
    #[test]
    fn derive_slug_joins_components() {
        assert_eq!(derive_slug("Users API", "lists users").as_str(), "users-api:lists-users");
    }

    /// Verifies explicit slugs win and are trimmed.
    #[test]
    fn resolve_slug_prefers_explicit_value() {
        assert_eq!(resolve_slug(Some(" users.list "), "Users", "list").as_str(), "users.list");
        assert_eq!(resolve_slug(None, "Users", "List").as_str(), "users:list");
        assert!(resolve_slug(Some("   "), "Users", "List").is_blank());
    }
}
