// crates/testledger-core/src/core/hashing.rs
// ============================================================================
// Module: Test Ledger Identity Hashing
// Description: Canonical content fingerprints for test name and description.
// Purpose: Detect metadata changes without using content as identity.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! The identity hash is a SHA-256 digest over the RFC 8785 canonical JSON of
//! `{name, description}`. It only signals that a test's metadata changed
//! between runs; the slug stays the identity. Blank descriptions are folded
//! into "no description" before hashing so both spellings fingerprint alike.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Clone, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Identity Fingerprint
// ============================================================================

/// Canonical hash input for a test's mutable metadata.
#[derive(Debug, Serialize)]
struct IdentityFingerprint<'a> {
    /// Display name.
    name: &'a str,
    /// Normalized description.
    description: Option<&'a str>,
}

/// Folds blank descriptions into `None`.
#[must_use]
pub fn normalize_description(description: Option<&str>) -> Option<&str> {
    description.filter(|value| !value.trim().is_empty())
}

/// Computes the lowercase hex identity hash for a name and description.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn identity_hash(name: &str, description: Option<&str>) -> Result<String, HashError> {
    let fingerprint = IdentityFingerprint {
        name,
        description: normalize_description(description),
    };
    let bytes = serde_jcs::to_vec(&fingerprint)
        .map_err(|err| HashError::Canonicalization(err.to_string()))?;
    Ok(hash_bytes(&bytes))
}

/// Hashes raw bytes with SHA-256 and returns lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::identity_hash;

    /// Verifies hashing is stable and sensitive to both fields.
    #[test]
    fn identity_hash_tracks_name_and_description() {
        let base = identity_hash("lists users", Some("GET /users")).unwrap();
        assert_eq!(base, identity_hash("lists users", Some("GET /users")).unwrap());
        assert_ne!(base, identity_hash("lists all users", Some("GET /users")).unwrap());
        assert_ne!(base, identity_hash("lists users", Some("GET /users?page=1")).unwrap());
        assert_eq!(base.len(), 64);
    }

    /// Verifies a blank description hashes like a missing one.
    #[test]
    fn identity_hash_folds_blank_description() {
        let missing = identity_hash("health", None).unwrap();
        assert_eq!(missing, identity_hash("health", Some("")).unwrap());
        assert_eq!(missing, identity_hash("health", Some("   ")).unwrap());
    }
}
