// crates/testledger-config/src/lib.rs
// ============================================================================
// Module: Test Ledger Config Library
// Description: Canonical config model and validation for testledger.toml.
// Purpose: Single source of truth for ledger configuration semantics.
// Dependencies: serde, testledger-store-sqlite, toml
// ============================================================================

//! ## Overview
//! `testledger-config` defines the `testledger.toml` model used by the CLI.
//! Loading is strict and fails closed: unknown fields, oversized files, and
//! out-of-range values are rejected before a ledger is opened.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
