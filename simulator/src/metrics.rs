//! Simulation metrics.

use std::collections::{BTreeMap, VecDeque};

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total_operations: u64,
    /// Operations that returned a transaction.
    pub successful_operations: u64,
    /// Operations that ended in an error.
    pub failed_operations: u64,
    /// Resubmissions after `Busy` or a storage failure.
    pub retries: u64,
    /// Failed operations by error code.
    pub failures_by_code: BTreeMap<&'static str, u64>,
    /// Latency samples (microseconds).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            retries: 0,
            failures_by_code: BTreeMap::new(),
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a successful operation.
    pub fn record_success(&mut self, latency_us: u64) {
        self.total_operations += 1;
        self.successful_operations += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    /// Record a failed operation.
    pub fn record_failure(&mut self, code: &'static str) {
        self.total_operations += 1;
        self.failed_operations += 1;
        *self.failures_by_code.entry(code).or_default() += 1;
    }

    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    /// Get average latency in microseconds.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }

    /// Get throughput (operations per second).
    pub fn throughput(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }

        self.total_operations as f64 / elapsed_secs
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
