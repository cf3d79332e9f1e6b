// crates/testledger-store-sqlite/src/pool.rs
// ============================================================================
// Module: SQLite Connection Pool
// Description: Bounded r2d2 pool of configured SQLite connections.
// Purpose: Share connections across concurrent run processing with metrics.
// Dependencies: r2d2, rusqlite, testledger-core
// ============================================================================

//! ## Overview
//! Every pooled connection is opened read-write with foreign keys on and the
//! configured journal, sync, and busy-timeout pragmas. Exhaustion queues
//! callers for up to `pool_timeout_ms`; only then does checkout fail, and the
//! failure classifies as a timeout so the executor may retry it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use r2d2::ManageConnection;
use r2d2::Pool;
use r2d2::PooledConnection;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use serde::Deserialize;
use serde::Serialize;
use testledger_core::LedgerError;

use crate::config::SqliteLedgerConfig;
use crate::config::SqliteStoreMode;
use crate::config::SqliteSyncMode;
use crate::error::db_error;
use crate::error::pool_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Connection Manager
// ============================================================================

/// r2d2 manager that opens configured `SQLite` connections.
#[derive(Debug, Clone)]
pub struct SqliteConnectionManager {
    /// Database file.
    path: PathBuf,
    /// Busy timeout in milliseconds.
    busy_timeout_ms: u64,
    /// Journal mode pragma.
    journal_mode: SqliteStoreMode,
    /// Synchronous pragma.
    sync_mode: SqliteSyncMode,
}

impl SqliteConnectionManager {
    /// Creates a manager from ledger configuration.
    #[must_use]
    pub fn new(config: &SqliteLedgerConfig) -> Self {
        Self {
            path: config.path.clone(),
            busy_timeout_ms: config.busy_timeout_ms,
            journal_mode: config.journal_mode,
            sync_mode: config.sync_mode,
        }
    }

    /// Applies the pragmas every ledger connection relies on.
    fn apply_pragmas(&self, connection: &Connection) -> Result<(), rusqlite::Error> {
        connection.busy_timeout(Duration::from_millis(self.busy_timeout_ms))?;
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        let journal_mode = self.journal_mode.pragma_value();
        connection.execute_batch(&format!("PRAGMA journal_mode = {journal_mode};"))?;
        connection
            .execute_batch(&format!("PRAGMA synchronous = {};", self.sync_mode.pragma_value()))?;
        Ok(())
    }
}

impl ManageConnection for SqliteConnectionManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(&self.path, flags)?;
        self.apply_pragmas(&connection)?;
        Ok(connection)
    }

    fn is_valid(&self, connection: &mut Connection) -> Result<(), rusqlite::Error> {
        connection.execute_batch("SELECT 1;")
    }

    fn has_broken(&self, _connection: &mut Connection) -> bool {
        false
    }
}

// ============================================================================
// SECTION: Pool Metrics
// ============================================================================

/// Point-in-time pool gauges and counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetricsSnapshot {
    /// Configured maximum connections.
    pub max_size: u32,
    /// Connections currently open.
    pub open: u32,
    /// Connections checked out.
    pub active: u32,
    /// Connections open and idle.
    pub idle: u32,
    /// Callers currently waiting for a connection.
    pub waiting: u64,
    /// Successful checkouts.
    pub checkouts: u64,
    /// Checkouts that timed out.
    pub checkout_timeouts: u64,
}

/// Counters maintained alongside the r2d2 pool.
#[derive(Debug, Default)]
struct PoolCounters {
    /// Callers inside `get`.
    waiting: AtomicU64,
    /// Successful checkouts.
    checkouts: AtomicU64,
    /// Failed checkouts.
    checkout_timeouts: AtomicU64,
}

// ============================================================================
// SECTION: Ledger Pool
// ============================================================================

/// Pooled `SQLite` connection handed to units of work.
pub type LedgerConnection = PooledConnection<SqliteConnectionManager>;

/// Bounded, cloneable pool of ledger connections.
#[derive(Clone)]
pub struct LedgerPool {
    /// Underlying r2d2 pool.
    pool: Pool<SqliteConnectionManager>,
    /// Checkout counters.
    counters: Arc<PoolCounters>,
}

impl LedgerPool {
    /// Validates the store path and builds the pool.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Validation`] for unusable paths and
    /// [`LedgerError::FatalDatabase`] when no connection can be opened.
    /// A store that rejects its first connection fails immediately rather
    /// than after `pool_timeout_ms`.
    pub fn open(config: &SqliteLedgerConfig) -> Result<Self, LedgerError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let manager = SqliteConnectionManager::new(config);
        manager.connect().map_err(|err| db_error(err).into_terminal(1))?;
        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_millis(config.pool_timeout_ms))
            .build(manager)
            .map_err(|err| LedgerError::FatalDatabase(format!("connection pool: {err}")))?;
        Ok(Self {
            pool,
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Checks out a connection, queuing until one is free or the timeout ends.
    ///
    /// # Errors
    ///
    /// Returns a [`testledger_core::FailureClass::Timeout`] database error when
    /// no connection became available in time.
    pub fn get(&self) -> Result<LedgerConnection, LedgerError> {
        self.counters.waiting.fetch_add(1, Ordering::Relaxed);
        let result = self.pool.get();
        self.counters.waiting.fetch_sub(1, Ordering::Relaxed);
        match result {
            Ok(connection) => {
                self.counters.checkouts.fetch_add(1, Ordering::Relaxed);
                Ok(connection)
            }
            Err(err) => {
                self.counters.checkout_timeouts.fetch_add(1, Ordering::Relaxed);
                Err(pool_error(&err))
            }
        }
    }

    /// Returns current pool gauges and counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let state = self.pool.state();
        PoolMetricsSnapshot {
            max_size: self.pool.max_size(),
            open: state.connections,
            active: state.connections.saturating_sub(state.idle_connections),
            idle: state.idle_connections,
            waiting: self.counters.waiting.load(Ordering::Relaxed),
            checkouts: self.counters.checkouts.load(Ordering::Relaxed),
            checkout_timeouts: self.counters.checkout_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Resets checkout counters; gauges reflect live state and are untouched.
    pub fn reset_metrics(&self) {
        self.counters.checkouts.store(0, Ordering::Relaxed);
        self.counters.checkout_timeouts.store(0, Ordering::Relaxed);
    }
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), LedgerError> {
    let Some(parent) = path.parent() else {
        return Err(LedgerError::Validation("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent)
        .map_err(|err| LedgerError::FatalDatabase(format!("create store directory: {err}")))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), LedgerError> {
    if path.as_os_str().is_empty() {
        return Err(LedgerError::Validation("store path must not be empty".to_string()));
    }
    if path.display().to_string().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(LedgerError::Validation("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(LedgerError::Validation(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(LedgerError::Validation(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}
