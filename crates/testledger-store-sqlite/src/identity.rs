// crates/testledger-store-sqlite/src/identity.rs
// ============================================================================
// Module: Identity Resolver
// Description: Find-or-create of stable test identities with version history.
// Purpose: Reconcile per-run test descriptors into renameable identities.
// Dependencies: rusqlite, tracing, testledger-core
// ============================================================================

//! ## Overview
//! The slug is the identity; the hash of `{name, description}` only detects
//! metadata changes. Resolution runs inside the caller's transaction:
//! - unknown slug: insert the test and its first open history interval.
//! - known slug: bump `last_seen_at` and `total_runs`; on a hash change close
//!   the open interval and open a new one; clear any deletion marker.
//!
//! Creation is a plain insert inside a savepoint. Losing a creation race to
//! another writer shows up as a unique violation, which rolls back to the
//! savepoint and continues down the update path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use testledger_core::FailureClass;
use testledger_core::IdentityChange;
use testledger_core::LedgerError;
use testledger_core::ResolvedTest;
use testledger_core::Slug;
use testledger_core::TestDescriptor;
use testledger_core::TestHistoryEntry;
use testledger_core::TestId;
use testledger_core::TestRecord;
use testledger_core::Timestamp;
use testledger_core::identity_hash;
use testledger_core::normalize_description;
use tracing::debug;

use crate::error::db_error;
use crate::error::stored_count;
use crate::executor::TxHandle;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Savepoint guarding identity creation.
const CREATE_SAVEPOINT: &str = "resolve_identity_create";

/// Columns selected for [`TestRecord`] rows.
pub(crate) const TEST_COLUMNS: &str = "test_id, slug, hash, current_name, current_description, \
                                       suite_name, test_file, first_seen_at, last_seen_at, \
                                       total_runs, deleted_at";

// ============================================================================
// SECTION: Resolver
// ============================================================================

/// Finds or creates stable test identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    /// Resolves `descriptor` to a stable identity, creating it on first sight.
    ///
    /// `last_seen_at` is stamped with `max(now, run_started_at)` so a test
    /// observed by a run never looks older than that run.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for a blank slug, or a classified
    /// database error.
    pub fn resolve_or_create(
        &self,
        tx: &TxHandle<'_>,
        descriptor: &TestDescriptor,
        run_started_at: Timestamp,
    ) -> Result<ResolvedTest, LedgerError> {
        if descriptor.slug.is_blank() {
            return Err(LedgerError::Validation(format!(
                "test '{}' in suite '{}' has an empty slug",
                descriptor.name, descriptor.suite_name
            )));
        }
        let seen_at = tx.now().max(run_started_at);
        let hash = identity_hash(&descriptor.name, descriptor.description.as_deref())
            .map_err(|err| LedgerError::Validation(err.to_string()))?;
        match load_test_by_slug(tx, &descriptor.slug)? {
            Some(existing) => update_existing(tx, &existing, descriptor, hash, seen_at),
            None => create_or_adopt(tx, descriptor, hash, seen_at),
        }
    }
}

/// Inserts a new identity, falling back to the update path on a lost race.
fn create_or_adopt(
    tx: &TxHandle<'_>,
    descriptor: &TestDescriptor,
    hash: String,
    seen_at: Timestamp,
) -> Result<ResolvedTest, LedgerError> {
    let outcome =
        tx.with_savepoint(CREATE_SAVEPOINT, |tx| insert_identity(tx, descriptor, &hash, seen_at));
    if let Some(test_id) = outcome.result {
        return Ok(ResolvedTest {
            test_id,
            slug: descriptor.slug.clone(),
            hash,
            change: IdentityChange::Created,
        });
    }
    match outcome.error {
        Some(LedgerError::Database {
            class: FailureClass::UniqueViolation,
            message,
        }) => {
            debug!(slug = %descriptor.slug, message, "identity created concurrently; adopting");
            let existing = load_test_by_slug(tx, &descriptor.slug)?.ok_or_else(|| {
                LedgerError::database(
                    FailureClass::UniqueViolation,
                    format!("slug {} conflicted but is not visible", descriptor.slug),
                )
            })?;
            update_existing(tx, &existing, descriptor, hash, seen_at)
        }
        Some(error) => Err(error),
        None => Err(LedgerError::FatalDatabase(
            "identity savepoint finished without a result".to_string(),
        )),
    }
}

/// Inserts the identity row and its first open history interval.
fn insert_identity(
    tx: &TxHandle<'_>,
    descriptor: &TestDescriptor,
    hash: &str,
    seen_at: Timestamp,
) -> Result<TestId, LedgerError> {
    let description = normalize_description(descriptor.description.as_deref());
    tx.conn()
        .execute(
            "INSERT INTO tests (slug, hash, current_name, current_description, suite_name, \
             test_file, first_seen_at, last_seen_at, total_runs, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 1, NULL)",
            params![
                descriptor.slug.as_str(),
                hash,
                descriptor.name,
                description,
                descriptor.suite_name,
                descriptor.file,
                seen_at.as_unix_millis(),
            ],
        )
        .map_err(db_error)?;
    let test_id = TestId::new(tx.conn().last_insert_rowid());
    insert_history(tx, test_id, &descriptor.name, description, hash, seen_at)?;
    Ok(test_id)
}

/// Applies an observation to an existing identity.
fn update_existing(
    tx: &TxHandle<'_>,
    existing: &TestRecord,
    descriptor: &TestDescriptor,
    hash: String,
    seen_at: Timestamp,
) -> Result<ResolvedTest, LedgerError> {
    let description = normalize_description(descriptor.description.as_deref());
    let metadata_changed = existing.hash != hash;
    let resurrected = existing.is_deleted();
    if metadata_changed {
        let open_from: Option<i64> = tx
            .conn()
            .query_row(
                "SELECT valid_from FROM test_history WHERE test_id = ?1 AND valid_to IS NULL",
                params![existing.test_id.get()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_error)?;
        let boundary =
            open_from.map_or(seen_at, |from| seen_at.max(Timestamp::from_unix_millis(from)));
        tx.conn()
            .execute(
                "UPDATE test_history SET valid_to = ?1 WHERE test_id = ?2 AND valid_to IS NULL",
                params![boundary.as_unix_millis(), existing.test_id.get()],
            )
            .map_err(db_error)?;
        insert_history(tx, existing.test_id, &descriptor.name, description, &hash, boundary)?;
    }
    tx.conn()
        .execute(
            "UPDATE tests SET hash = ?1, current_name = ?2, current_description = ?3, \
             suite_name = ?4, test_file = COALESCE(?5, test_file), \
             last_seen_at = MAX(last_seen_at, ?6), total_runs = total_runs + 1, deleted_at = NULL
             WHERE test_id = ?7",
            params![
                hash,
                descriptor.name,
                description,
                descriptor.suite_name,
                descriptor.file,
                seen_at.as_unix_millis(),
                existing.test_id.get(),
            ],
        )
        .map_err(db_error)?;
    if resurrected {
        tx.conn()
            .execute(
                "UPDATE test_deletions SET restored_at = MAX(deleted_at, ?1)
                 WHERE test_id = ?2 AND restored_at IS NULL",
                params![seen_at.as_unix_millis(), existing.test_id.get()],
            )
            .map_err(db_error)?;
        debug!(slug = %existing.slug, "deleted test reappeared");
    }
    let change = match (resurrected, metadata_changed) {
        (true, metadata_changed) => IdentityChange::Resurrected {
            metadata_changed,
        },
        (false, true) => IdentityChange::MetadataChanged,
        (false, false) => IdentityChange::Unchanged,
    };
    Ok(ResolvedTest {
        test_id: existing.test_id,
        slug: existing.slug.clone(),
        hash,
        change,
    })
}

/// Inserts an open history interval starting at `valid_from`.
fn insert_history(
    tx: &TxHandle<'_>,
    test_id: TestId,
    name: &str,
    description: Option<&str>,
    hash: &str,
    valid_from: Timestamp,
) -> Result<(), LedgerError> {
    tx.conn()
        .execute(
            "INSERT INTO test_history (test_id, name, description, hash, valid_from, valid_to)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
            params![test_id.get(), name, description, hash, valid_from.as_unix_millis()],
        )
        .map_err(db_error)?;
    Ok(())
}

// ============================================================================
// SECTION: Row Loading
// ============================================================================

/// Loads the identity row for `slug`.
///
/// # Errors
///
/// Returns a classified database error when the query fails.
pub fn load_test_by_slug(
    tx: &TxHandle<'_>,
    slug: &Slug,
) -> Result<Option<TestRecord>, LedgerError> {
    let row = tx
        .conn()
        .query_row(
            &format!("SELECT {TEST_COLUMNS} FROM tests WHERE slug = ?1"),
            params![slug.as_str()],
            RawTestRow::from_row,
        )
        .optional()
        .map_err(db_error)?;
    row.map(RawTestRow::into_record).transpose()
}

/// Loads every history interval for `test_id`, oldest first.
///
/// # Errors
///
/// Returns a classified database error when the query fails.
pub fn load_history(
    tx: &TxHandle<'_>,
    test_id: TestId,
) -> Result<Vec<TestHistoryEntry>, LedgerError> {
    let mut stmt = tx
        .conn()
        .prepare(
            "SELECT history_id, test_id, name, description, hash, valid_from, valid_to
             FROM test_history WHERE test_id = ?1 ORDER BY valid_from ASC, history_id ASC",
        )
        .map_err(db_error)?;
    let rows = stmt
        .query_map(params![test_id.get()], |row| {
            Ok(TestHistoryEntry {
                history_id: row.get(0)?,
                test_id: TestId::new(row.get(1)?),
                name: row.get(2)?,
                description: row.get(3)?,
                hash: row.get(4)?,
                valid_from: Timestamp::from_unix_millis(row.get(5)?),
                valid_to: row.get::<_, Option<i64>>(6)?.map(Timestamp::from_unix_millis),
            })
        })
        .map_err(db_error)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_error)
}

/// Raw `tests` row prior to count conversion.
pub(crate) struct RawTestRow {
    /// Row identifier.
    test_id: i64,
    /// Slug.
    slug: String,
    /// Content hash.
    hash: String,
    /// Current name.
    current_name: String,
    /// Current description.
    current_description: Option<String>,
    /// Owning suite.
    suite_name: String,
    /// Declaring file.
    test_file: Option<String>,
    /// First observation.
    first_seen_at: i64,
    /// Latest observation.
    last_seen_at: i64,
    /// Observation count.
    total_runs: i64,
    /// Deletion marker.
    deleted_at: Option<i64>,
}

impl RawTestRow {
    /// Reads a row selected with [`TEST_COLUMNS`].
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            test_id: row.get(0)?,
            slug: row.get(1)?,
            hash: row.get(2)?,
            current_name: row.get(3)?,
            current_description: row.get(4)?,
            suite_name: row.get(5)?,
            test_file: row.get(6)?,
            first_seen_at: row.get(7)?,
            last_seen_at: row.get(8)?,
            total_runs: row.get(9)?,
            deleted_at: row.get(10)?,
        })
    }

    /// Converts into a typed record.
    pub(crate) fn into_record(self) -> Result<TestRecord, LedgerError> {
        Ok(TestRecord {
            test_id: TestId::new(self.test_id),
            slug: Slug::new(self.slug),
            hash: self.hash,
            current_name: self.current_name,
            current_description: self.current_description,
            suite_name: self.suite_name,
            test_file: self.test_file,
            first_seen_at: Timestamp::from_unix_millis(self.first_seen_at),
            last_seen_at: Timestamp::from_unix_millis(self.last_seen_at),
            total_runs: stored_count(self.total_runs, "tests.total_runs")?,
            deleted_at: self.deleted_at.map(Timestamp::from_unix_millis),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use std::sync::Arc;

    use rusqlite::params;
    use tempfile::TempDir;
    use testledger_core::AtomicTransactionMetrics;
    use testledger_core::IdentityChange;
    use testledger_core::ManualClock;
    use testledger_core::Slug;
    use testledger_core::TestDescriptor;
    use testledger_core::Timestamp;

    use super::create_or_adopt;
    use super::load_test_by_slug;
    use crate::config::SqliteLedgerConfig;
    use crate::executor::TransactionalExecutor;
    use crate::executor::TxOptions;
    use crate::pool::LedgerPool;
    use crate::schema::initialize_schema;

    /// Opens an executor over a fresh schema in `dir`.
    fn executor(dir: &TempDir) -> TransactionalExecutor {
        let config = SqliteLedgerConfig::new(dir.path().join("ledger.db"));
        let pool = LedgerPool::open(&config).unwrap();
        initialize_schema(&mut pool.get().unwrap()).unwrap();
        TransactionalExecutor::new(
            pool,
            config.transaction,
            Arc::new(ManualClock::new(Timestamp::from_unix_millis(1_000))),
            Arc::new(AtomicTransactionMetrics::new()),
        )
    }

    /// Builds a descriptor in the `users` suite.
    fn descriptor(slug: &str, name: &str) -> TestDescriptor {
        TestDescriptor {
            slug: Slug::new(slug),
            name: name.to_string(),
            description: None,
            suite_name: "users".to_string(),
            file: None,
        }
    }

    /// Verifies a lost creation race adopts the existing row instead of failing.
    #[test]
    fn creation_race_falls_back_to_update() {
        let dir = TempDir::new().unwrap();
        let executor = executor(&dir);
        let resolved = executor
            .run_in_transaction(TxOptions::write("race"), |tx| {
                tx.conn()
                    .execute(
                        "INSERT INTO tests (slug, hash, current_name, suite_name, first_seen_at, \
                         last_seen_at, total_runs) VALUES ('users:list', 'stale', 'list', \
                         'users', 500, 500, 1)",
                        params![],
                    )
                    .unwrap();
                let test_id = tx.conn().last_insert_rowid();
                tx.conn()
                    .execute(
                        "INSERT INTO test_history (test_id, name, hash, valid_from) VALUES (?1, \
                         'list', 'stale', 500)",
                        params![test_id],
                    )
                    .unwrap();
                let descriptor = descriptor("users:list", "list users");
                let hash = testledger_core::identity_hash(&descriptor.name, None).unwrap();
                create_or_adopt(tx, &descriptor, hash, Timestamp::from_unix_millis(1_000))
            })
            .unwrap();
        assert_eq!(resolved.change, IdentityChange::MetadataChanged);
        let record = executor
            .run_in_transaction(TxOptions::read("load"), |tx| {
                load_test_by_slug(tx, &Slug::new("users:list"))
            })
            .unwrap()
            .expect("record");
        assert_eq!(record.test_id, resolved.test_id);
        assert_eq!(record.total_runs, 2);
        assert_eq!(record.current_name, "list users");
        assert_eq!(executor.metrics().snapshot().savepoint_rollbacks, 1);
    }
}
