// crates/testledger-store-sqlite/tests/identity_lifecycle.rs
// ============================================================================
// Module: Identity Lifecycle Tests
// Description: Creation, rename, deletion, and resurrection of test identities.
// Purpose: Validate identity stability and history interval bookkeeping.
// Dependencies: testledger-core, testledger-store-sqlite, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Drives the ledger through multi-run scenarios and checks the identity,
//! history, and deletion tables:
//! - renames keep the identity and add exactly one history interval
//! - reconciliation touches only executed suites
//! - deleted tests come back under the same identity
//! - concurrent first sightings of one slug create one identity

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

mod common;

use std::thread;

use testledger_core::DAY_MILLIS;
use testledger_core::RunTestStatus;
use testledger_core::Slug;
use testledger_core::TestStatus;
use testledger_core::Timestamp;

use crate::common::T0;
use crate::common::harness;
use crate::common::meta_on_day;
use crate::common::outcome;
use crate::common::outcome_with_slug;

// ============================================================================
// SECTION: Rename
// ============================================================================

/// Verifies a rename keeps the identity and opens exactly one new interval.
#[test]
fn rename_preserves_identity_and_closes_history_once() {
    let h = harness();
    h.persist_on_day(0, &[outcome_with_slug(
        "users",
        "creates user",
        "users:create",
        TestStatus::Passed,
    )]);
    h.persist_on_day(1, &[outcome_with_slug(
        "users",
        "creates a user",
        "users:create",
        TestStatus::Passed,
    )]);
    h.persist_on_day(2, &[outcome_with_slug(
        "users",
        "creates a user",
        "users:create",
        TestStatus::Passed,
    )]);

    let record = h.ledger.test_by_slug(&Slug::new("users:create")).unwrap().expect("identity");
    assert_eq!(record.current_name, "creates a user");
    assert_eq!(record.total_runs, 3);
    assert_eq!(record.first_seen_at, Timestamp::from_unix_millis(T0 + 1_000));
    assert_eq!(record.last_seen_at, Timestamp::from_unix_millis(T0 + 2 * DAY_MILLIS + 1_000));

    let history = h.ledger.test_history(record.test_id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].name, "creates user");
    assert_eq!(history[0].valid_to, Some(Timestamp::from_unix_millis(T0 + DAY_MILLIS + 1_000)));
    assert_eq!(history[1].name, "creates a user");
    assert_eq!(history[1].valid_from, history[0].valid_to.unwrap());
    assert_eq!(history[1].valid_to, None);
    assert_eq!(h.count("SELECT COUNT(*) FROM tests"), 1);
}

/// Verifies a description change alone is a metadata change.
#[test]
fn description_change_opens_new_interval() {
    let h = harness();
    let mut first = outcome("users", "lists users", TestStatus::Passed);
    first.description = Some("returns all users".to_string());
    h.persist_on_day(0, &[first.clone()]);
    let mut second = first;
    second.description = Some("returns active users".to_string());
    h.persist_on_day(1, &[second]);

    let record = h.ledger.test_by_slug(&Slug::new("users:lists-users")).unwrap().unwrap();
    assert_eq!(record.current_description.as_deref(), Some("returns active users"));
    assert_eq!(h.ledger.test_history(record.test_id).unwrap().len(), 2);
}

/// Verifies a blank description hashes the same as no description.
#[test]
fn blank_description_matches_missing_description() {
    let h = harness();
    h.persist_on_day(0, &[outcome("users", "lists users", TestStatus::Passed)]);
    let mut blank = outcome("users", "lists users", TestStatus::Passed);
    blank.description = Some("   ".to_string());
    h.persist_on_day(1, &[blank]);

    let record = h.ledger.test_by_slug(&Slug::new("users:lists-users")).unwrap().unwrap();
    assert_eq!(record.current_description, None);
    assert_eq!(h.ledger.test_history(record.test_id).unwrap().len(), 1);
}

/// Verifies a missing file keeps the stored file.
#[test]
fn missing_file_keeps_stored_file() {
    let h = harness();
    let mut first = outcome("users", "lists users", TestStatus::Passed);
    first.file = Some("tests/users.spec".to_string());
    h.persist_on_day(0, &[first]);
    h.persist_on_day(1, &[outcome("users", "lists users", TestStatus::Passed)]);

    let record = h.ledger.test_by_slug(&Slug::new("users:lists-users")).unwrap().unwrap();
    assert_eq!(record.test_file.as_deref(), Some("tests/users.spec"));
}

/// Verifies a name change without an explicit slug produces a new identity.
#[test]
fn derived_slug_rename_creates_new_identity() {
    let h = harness();
    h.persist_on_day(0, &[outcome("users", "creates user", TestStatus::Passed)]);
    let summary = h.persist_on_day(1, &[outcome("users", "creates a user", TestStatus::Passed)]);

    assert_eq!(summary.deleted_tests.len(), 1);
    assert_eq!(summary.deleted_tests[0].slug, Slug::new("users:creates-user"));
    assert!(h.ledger.test_by_slug(&Slug::new("users:creates-a-user")).unwrap().is_some());
    assert_eq!(h.count("SELECT COUNT(*) FROM tests"), 2);
}

// ============================================================================
// SECTION: Deletion and Resurrection
// ============================================================================

/// Verifies the create, delete, resurrect sequence across three runs.
#[test]
fn three_run_create_delete_resurrect() {
    let h = harness();
    let first = h.persist_on_day(0, &[
        outcome("users", "a", TestStatus::Passed),
        outcome("users", "b", TestStatus::Passed),
    ]);
    assert!(first.deleted_tests.is_empty());

    let second = h.persist_on_day(1, &[outcome("users", "a", TestStatus::Passed)]);
    assert_eq!(second.deleted_tests.len(), 1);
    let deleted = &second.deleted_tests[0];
    assert_eq!(deleted.slug, Slug::new("users:b"));
    assert_eq!(deleted.deleted_at, Timestamp::from_unix_millis(T0 + DAY_MILLIS + 1_000));
    let b = h.ledger.test_by_slug(&Slug::new("users:b")).unwrap().unwrap();
    assert!(b.is_deleted());

    let third = h.persist_on_day(2, &[
        outcome("users", "a", TestStatus::Passed),
        outcome("users", "b", TestStatus::Failed),
    ]);
    assert!(third.deleted_tests.is_empty());
    let resurrected = h.ledger.test_by_slug(&Slug::new("users:b")).unwrap().unwrap();
    assert_eq!(resurrected.test_id, b.test_id);
    assert!(!resurrected.is_deleted());
    assert_eq!(resurrected.total_runs, 2);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_deletions WHERE restored_at IS NULL"), 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_deletions"), 1);

    let detail = h.ledger.get_run_detail(second.run_id).unwrap().expect("run detail");
    assert_eq!(detail.suites.len(), 1);
    let tests = &detail.suites[0].tests;
    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0].slug, Slug::new("users:a"));
    assert_eq!(tests[0].status, RunTestStatus::Passed);
    assert_eq!(tests[1].slug, Slug::new("users:b"));
    assert_eq!(tests[1].status, RunTestStatus::Deleted);
    assert_eq!(tests[1].deleted_at, Some(deleted.deleted_at));

    let latest = h.ledger.get_run_detail(third.run_id).unwrap().unwrap();
    let statuses: Vec<RunTestStatus> =
        latest.suites[0].tests.iter().map(|entry| entry.status).collect();
    assert_eq!(statuses, vec![RunTestStatus::Passed, RunTestStatus::Failed]);
}

/// Verifies repeated resurrection keeps one identity and one history interval.
#[test]
fn resurrection_is_idempotent_on_identity() {
    let h = harness();
    let keep = outcome("users", "keep", TestStatus::Passed);
    let flicker = outcome("users", "flicker", TestStatus::Passed);
    h.persist_on_day(0, &[keep.clone(), flicker.clone()]);
    let original = h.ledger.test_by_slug(&Slug::new("users:flicker")).unwrap().unwrap();
    for day in 1 .. 5 {
        if day % 2 == 1 {
            h.persist_on_day(day, &[keep.clone()]);
        } else {
            h.persist_on_day(day, &[keep.clone(), flicker.clone()]);
        }
    }

    let record = h.ledger.test_by_slug(&Slug::new("users:flicker")).unwrap().unwrap();
    assert_eq!(record.test_id, original.test_id);
    assert!(!record.is_deleted());
    assert_eq!(record.total_runs, 3);
    assert_eq!(h.ledger.test_history(record.test_id).unwrap().len(), 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM tests WHERE slug = 'users:flicker'"), 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_deletions"), 2);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_deletions WHERE restored_at IS NULL"), 0);
}

/// Verifies reconciliation never touches suites the run did not execute.
#[test]
fn reconciliation_is_scoped_to_executed_suites() {
    let h = harness();
    h.persist_on_day(0, &[
        outcome("users", "a", TestStatus::Passed),
        outcome("orders", "o", TestStatus::Passed),
    ]);
    let summary = h.persist_on_day(1, &[outcome("users", "a", TestStatus::Passed)]);

    assert!(summary.deleted_tests.is_empty());
    let orders = h.ledger.test_by_slug(&Slug::new("orders:o")).unwrap().unwrap();
    assert!(!orders.is_deleted());
}

/// Verifies tests seen at or after the run start are never deleted.
#[test]
fn tests_seen_after_run_start_survive_reconciliation() {
    let h = harness();
    h.persist_on_day(0, &[outcome("users", "a", TestStatus::Passed)]);
    let late = meta_on_day(0);
    h.clock.set(late.started_at.saturating_add_millis(2_000));
    let summary =
        h.ledger.persist_run(&late, &[outcome("users", "b", TestStatus::Passed)]).unwrap();

    assert!(summary.deleted_tests.is_empty());
    assert!(!h.ledger.test_by_slug(&Slug::new("users:a")).unwrap().unwrap().is_deleted());
}

// ============================================================================
// SECTION: Concurrency
// ============================================================================

/// Verifies concurrent first sightings of one slug produce one identity.
#[test]
fn concurrent_runs_share_one_identity() {
    let h = harness();
    h.clock.set(Timestamp::from_unix_millis(T0 + 1_000));
    let handles: Vec<_> = (0 .. 8)
        .map(|index| {
            let ledger = h.ledger.clone();
            thread::spawn(move || {
                let mut meta = meta_on_day(0);
                meta.commit_sha = Some(format!("worker-{index}"));
                ledger
                    .persist_run(&meta, &[outcome("shared", "test", TestStatus::Passed)])
                    .expect("persist run")
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }

    assert_eq!(h.count("SELECT COUNT(*) FROM tests WHERE slug = 'shared:test'"), 1);
    assert_eq!(h.count("SELECT total_runs FROM tests WHERE slug = 'shared:test'"), 8);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_history"), 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM test_runs"), 8);
}
