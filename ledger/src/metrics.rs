//! Metrics collection for ledger monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bakripay_common::LedgerError;

use crate::transaction::TransactionType;

/// Ledger metrics.
pub struct Metrics {
    /// Completed deposits.
    pub deposits_total: AtomicU64,
    /// Completed withdrawals.
    pub withdrawals_total: AtomicU64,
    /// Completed transfers.
    pub transfers_total: AtomicU64,
    /// Completed reversals.
    pub reversals_total: AtomicU64,
    /// Operations rejected for a business reason.
    pub rejections_total: AtomicU64,
    /// Requests answered from an earlier result under the same idempotency key.
    pub idempotent_replays: AtomicU64,
    /// Lock timeouts.
    pub locks_timeout: AtomicU64,
    /// Storage failures.
    pub storage_failures: AtomicU64,
    /// Operations in progress.
    pub operations_active: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            deposits_total: AtomicU64::new(0),
            withdrawals_total: AtomicU64::new(0),
            transfers_total: AtomicU64::new(0),
            reversals_total: AtomicU64::new(0),
            rejections_total: AtomicU64::new(0),
            idempotent_replays: AtomicU64::new(0),
            locks_timeout: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            operations_active: AtomicU64::new(0),
        }
    }

    /// Record an operation starting. It counts as active until the
    /// returned guard is dropped, including when its future is cancelled.
    pub fn operation_started(&self) -> ActiveOperation<'_> {
        self.operations_active.fetch_add(1, Ordering::Relaxed);
        ActiveOperation { metrics: self }
    }

    /// Record a committed deposit, withdrawal or transfer.
    pub fn completed(&self, kind: TransactionType) {
        let counter = match kind {
            TransactionType::Deposit => &self.deposits_total,
            TransactionType::Withdrawal => &self.withdrawals_total,
            TransactionType::Transfer => &self.transfers_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed reversal.
    pub fn reversed(&self) {
        self.reversals_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an idempotent replay.
    pub fn replayed(&self) {
        self.idempotent_replays.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed operation under the counter its error belongs to.
    pub fn failed(&self, error: &LedgerError) {
        let counter = match error {
            LedgerError::Busy { .. } => &self.locks_timeout,
            LedgerError::StorageFailure(_) => &self.storage_failures,
            _ => &self.rejections_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits_total: self.deposits_total.load(Ordering::Relaxed),
            withdrawals_total: self.withdrawals_total.load(Ordering::Relaxed),
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            reversals_total: self.reversals_total.load(Ordering::Relaxed),
            rejections_total: self.rejections_total.load(Ordering::Relaxed),
            idempotent_replays: self.idempotent_replays.load(Ordering::Relaxed),
            locks_timeout: self.locks_timeout.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            operations_active: self.operations_active.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP bakripay_deposits_total Total completed deposits
# TYPE bakripay_deposits_total counter
bakripay_deposits_total {}

# HELP bakripay_withdrawals_total Total completed withdrawals
# TYPE bakripay_withdrawals_total counter
bakripay_withdrawals_total {}

# HELP bakripay_transfers_total Total completed transfers
# TYPE bakripay_transfers_total counter
bakripay_transfers_total {}

# HELP bakripay_reversals_total Total completed reversals
# TYPE bakripay_reversals_total counter
bakripay_reversals_total {}

# HELP bakripay_rejections_total Total operations rejected by ledger rules
# TYPE bakripay_rejections_total counter
bakripay_rejections_total {}

# HELP bakripay_idempotent_replays Total requests answered from an earlier result
# TYPE bakripay_idempotent_replays counter
bakripay_idempotent_replays {}

# HELP bakripay_locks_timeout Total lock timeouts
# TYPE bakripay_locks_timeout counter
bakripay_locks_timeout {}

# HELP bakripay_storage_failures Total storage failures
# TYPE bakripay_storage_failures counter
bakripay_storage_failures {}

# HELP bakripay_operations_active Current operations in progress
# TYPE bakripay_operations_active gauge
bakripay_operations_active {}
"#,
            snapshot.deposits_total,
            snapshot.withdrawals_total,
            snapshot.transfers_total,
            snapshot.reversals_total,
            snapshot.rejections_total,
            snapshot.idempotent_replays,
            snapshot.locks_timeout,
            snapshot.storage_failures,
            snapshot.operations_active,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard returned by [`Metrics::operation_started`].
#[must_use]
pub struct ActiveOperation<'a> {
    metrics: &'a Metrics,
}

impl Drop for ActiveOperation<'_> {
    fn drop(&mut self) {
        self.metrics
            .operations_active
            .fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub deposits_total: u64,
    pub withdrawals_total: u64,
    pub transfers_total: u64,
    pub reversals_total: u64,
    pub rejections_total: u64,
    pub idempotent_replays: u64,
    pub locks_timeout: u64,
    pub storage_failures: u64,
    pub operations_active: u64,
}

impl MetricsSnapshot {
    /// Completed money movements of any kind, reversals included.
    pub fn committed_total(&self) -> u64 {
        self.deposits_total + self.withdrawals_total + self.transfers_total + self.reversals_total
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
