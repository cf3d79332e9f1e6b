// crates/testledger-core/src/runtime/metrics.rs
// ============================================================================
// Module: Test Ledger Transaction Metrics
// Description: Atomic and no-op transaction metrics sinks.
// Purpose: Count transaction outcomes without a process-wide singleton.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! [`AtomicTransactionMetrics`] keeps relaxed atomic counters that can be
//! shared across threads and reset between measurements.
//! [`NoopTransactionMetrics`] discards every event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::interfaces::FailureClass;
use crate::interfaces::TransactionMetrics;
use crate::interfaces::TransactionMetricsSnapshot;

// ============================================================================
// SECTION: Atomic Metrics
// ============================================================================

/// Thread-safe counter-backed metrics sink.
#[derive(Debug, Default)]
pub struct AtomicTransactionMetrics {
    /// Attempts started.
    started: AtomicU64,
    /// Attempts committed.
    committed: AtomicU64,
    /// Attempts rolled back.
    rolled_back: AtomicU64,
    /// Retries scheduled.
    retries: AtomicU64,
    /// Unique violations.
    constraint_violations: AtomicU64,
    /// Lock conflicts.
    deadlocks: AtomicU64,
    /// Timeouts.
    timeouts: AtomicU64,
    /// Savepoint rollbacks.
    savepoint_rollbacks: AtomicU64,
}

impl AtomicTransactionMetrics {
    /// Creates a sink with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every counter for bulk operations.
    const fn counters(&self) -> [&AtomicU64; 8] {
        [
            &self.started,
            &self.committed,
            &self.rolled_back,
            &self.retries,
            &self.constraint_violations,
            &self.deadlocks,
            &self.timeouts,
            &self.savepoint_rollbacks,
        ]
    }
}

/// Increments a counter.
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl TransactionMetrics for AtomicTransactionMetrics {
    fn record_started(&self) {
        bump(&self.started);
    }

    fn record_committed(&self) {
        bump(&self.committed);
    }

    fn record_rolled_back(&self) {
        bump(&self.rolled_back);
    }

    fn record_retry(&self) {
        bump(&self.retries);
    }

    fn record_failure(&self, class: FailureClass) {
        match class {
            FailureClass::UniqueViolation => bump(&self.constraint_violations),
            FailureClass::Deadlock => bump(&self.deadlocks),
            FailureClass::Timeout => bump(&self.timeouts),
            FailureClass::Fatal => {}
        }
    }

    fn record_savepoint_rollback(&self) {
        bump(&self.savepoint_rollbacks);
    }

    fn snapshot(&self) -> TransactionMetricsSnapshot {
        TransactionMetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            constraint_violations: self.constraint_violations.load(Ordering::Relaxed),
            deadlocks: self.deadlocks.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            savepoint_rollbacks: self.savepoint_rollbacks.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// SECTION: No-op Metrics
// ============================================================================

/// Metrics sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransactionMetrics;

impl TransactionMetrics for NoopTransactionMetrics {
    fn record_started(&self) {}

    fn record_committed(&self) {}

    fn record_rolled_back(&self) {}

    fn record_retry(&self) {}

    fn record_failure(&self, _class: FailureClass) {}

    fn record_savepoint_rollback(&self) {}

    fn snapshot(&self) -> TransactionMetricsSnapshot {
        TransactionMetricsSnapshot::default()
    }

    fn reset(&self) {}
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::AtomicTransactionMetrics;
    use super::NoopTransactionMetrics;
    use crate::interfaces::FailureClass;
    use crate::interfaces::TransactionMetrics;
    use crate::interfaces::TransactionMetricsSnapshot;

    /// Verifies failure classes land in their own counters and reset clears all.
    #[test]
    fn atomic_metrics_count_and_reset() {
        let metrics = AtomicTransactionMetrics::new();
        metrics.record_started();
        metrics.record_failure(FailureClass::Deadlock);
        metrics.record_retry();
        metrics.record_rolled_back();
        metrics.record_started();
        metrics.record_committed();
        metrics.record_failure(FailureClass::UniqueViolation);
        metrics.record_failure(FailureClass::Fatal);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.started, 2);
        assert_eq!(snapshot.committed, 1);
        assert_eq!(snapshot.rolled_back, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.deadlocks, 1);
        assert_eq!(snapshot.constraint_violations, 1);
        assert_eq!(snapshot.timeouts, 0);
        metrics.reset();
        assert_eq!(metrics.snapshot(), TransactionMetricsSnapshot::default());
    }

    /// Verifies the no-op sink always reports zeros.
    #[test]
    fn noop_metrics_report_nothing() {
        let metrics = NoopTransactionMetrics;
        metrics.record_started();
        metrics.record_retry();
        assert_eq!(metrics.snapshot(), TransactionMetricsSnapshot::default());
    }
}
