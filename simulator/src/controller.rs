//! Simulation controller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, warn};

use bakripay_common::requests::{HistoryQuery, ReversalRequest};
use bakripay_common::{
    AccountId, IdempotencyKey, LedgerCommand, LedgerError, TransactionId, TransactionRequest,
    TransactionStatus, UserId,
};
use bakripay_ledger::{IntegrityReport, LedgerEngine, Transaction};

use crate::metrics::SimulationMetrics;
use crate::scenario::{Scenario, ScenarioStep};

/// Runs one step at a time against the shared engine. Cheap to clone.
#[derive(Clone)]
struct Worker {
    engine: Arc<LedgerEngine>,
    accounts: Arc<Vec<AccountId>>,
    /// Original (non-compensating) transactions available for reversal.
    completed: Arc<RwLock<Vec<TransactionId>>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
    next_request: Arc<AtomicU64>,
    max_retries: u32,
}

impl Worker {
    async fn execute_step(&self, step: ScenarioStep) {
        match step {
            ScenarioStep::Duplicate { step, copies } => {
                let request = self.request_for(&step, true).await;
                let submissions = (0..copies).map(|_| self.submit(request.clone()));
                join_all(submissions).await;
            }
            step => {
                let request = self.request_for(&step, false).await;
                self.submit(request).await;
            }
        }
    }

    /// Build and validate the request a step describes, as a client would.
    async fn request_for(&self, step: &ScenarioStep, keyed: bool) -> Option<LedgerCommand> {
        let n = self.next_request.fetch_add(1, Ordering::Relaxed);
        let account = |index: usize| Some(self.accounts[index].to_string());

        let request = match step {
            ScenarioStep::Deposit {
                account: index,
                amount_minor,
            } => TransactionRequest {
                kind: "deposit".to_string(),
                to_account: account(*index),
                amount_minor: Some(*amount_minor),
                ..TransactionRequest::default()
            },
            ScenarioStep::Withdraw {
                account: index,
                amount_minor,
            } => TransactionRequest {
                kind: "withdrawal".to_string(),
                from_account: account(*index),
                amount_minor: Some(*amount_minor),
                ..TransactionRequest::default()
            },
            ScenarioStep::Transfer {
                from,
                to,
                amount_minor,
            } => TransactionRequest {
                kind: "transfer".to_string(),
                from_account: account(*from),
                to_account: account(*to),
                amount_minor: Some(*amount_minor),
                ..TransactionRequest::default()
            },
            ScenarioStep::Reverse { completed } => {
                let target = {
                    let list = self.completed.read().await;
                    if list.is_empty() {
                        return None;
                    }
                    list[completed % list.len()]
                };
                let request = ReversalRequest {
                    transaction_id: target.to_string(),
                };
                return self.validated(request.validate()).await;
            }
            ScenarioStep::Duplicate { .. } => {
                warn!("Nested duplicate step skipped");
                return None;
            }
        };

        let request = TransactionRequest {
            reference: Some(format!("sim #{n}")),
            idempotency_key: keyed.then(|| format!("sim-{n}")),
            ..request
        };
        let max_reference_len = self.engine.config().max_reference_len;
        self.validated(request.validate(max_reference_len)).await
    }

    async fn validated(
        &self,
        result: Result<LedgerCommand, bakripay_common::ValidationError>,
    ) -> Option<LedgerCommand> {
        match result {
            Ok(command) => Some(command),
            Err(e) => {
                warn!(error = %e, "Request rejected by validation");
                self.metrics.write().await.record_failure("VALIDATION_ERROR");
                None
            }
        }
    }

    /// Submit a command, retrying `Busy` and storage failures with the same
    /// idempotency key.
    async fn submit(&self, command: Option<LedgerCommand>) {
        let Some(command) = command else {
            return;
        };

        let mut attempt = 0;
        loop {
            let started = Instant::now();
            match self.engine.execute(command.clone()).await {
                Ok(tx) => {
                    let latency_us = started.elapsed().as_micros() as u64;
                    self.metrics.write().await.record_success(latency_us);
                    self.remember(&tx).await;
                    return;
                }
                Err(err) if attempt < self.max_retries && should_retry(&err) => {
                    attempt += 1;
                    self.metrics.write().await.record_retry();
                    let delay = err.retry_after_ms().unwrap_or(50);
                    debug!(error = %err, attempt, delay, "Retrying operation");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(err) => {
                    debug!(error = %err, code = err.error_code(), "Operation failed");
                    self.metrics.write().await.record_failure(err.error_code());
                    return;
                }
            }
        }
    }

    async fn remember(&self, tx: &Transaction) {
        if tx.reverses.is_some() || tx.status != TransactionStatus::Completed {
            return;
        }
        let mut completed = self.completed.write().await;
        if !completed.contains(&tx.id) {
            completed.push(tx.id);
        }
    }
}

fn should_retry(err: &LedgerError) -> bool {
    err.is_retryable() || matches!(err, LedgerError::Busy { .. })
}

/// Controls the simulation.
pub struct SimulationController {
    /// Maximum steps in flight.
    concurrency: usize,
    /// Balance every account starts with.
    initial_balance: Decimal,
    worker: Worker,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        engine: Arc<LedgerEngine>,
        concurrency: usize,
        initial_balance: Decimal,
        max_retries: u32,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            initial_balance,
            worker: Worker {
                engine,
                accounts: Arc::new(Vec::new()),
                completed: Arc::new(RwLock::new(Vec::new())),
                metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
                next_request: Arc::new(AtomicU64::new(0)),
                max_retries,
            },
        }
    }

    /// Open and fund the simulated accounts.
    pub async fn initialize(&mut self, account_count: usize) -> anyhow::Result<()> {
        info!("Initializing simulation with {} accounts", account_count);

        let directory = self.worker.engine.directory();
        let mut accounts = Vec::with_capacity(account_count);
        for i in 0..account_count {
            let account = directory.open_account(UserId::new(format!("sim-user-{i}"))).await?;
            if self.initial_balance > Decimal::ZERO {
                self.worker
                    .engine
                    .deposit(
                        account.id.clone(),
                        self.initial_balance,
                        Some("initial funding".to_string()),
                        Some(IdempotencyKey::new(format!("fund-{}", account.id))),
                    )
                    .await?;
            }
            accounts.push(account.id);
        }

        info!(
            "Opened {} accounts with {} each",
            accounts.len(),
            self.initial_balance
        );
        self.worker.accounts = Arc::new(accounts);
        Ok(())
    }

    /// Run a scenario, phase by phase.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!(
            "Running scenario: {} - {} ({} steps)",
            scenario.name,
            scenario.description,
            scenario.step_count()
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        for (index, phase) in scenario.phases.into_iter().enumerate() {
            info!(phase = index + 1, steps = phase.len(), "Starting phase");

            let mut handles = Vec::with_capacity(phase.len());
            for step in phase {
                let permit = semaphore.clone().acquire_owned().await?;
                let worker = self.worker.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    worker.execute_step(step).await;
                }));
            }
            for result in join_all(handles).await {
                result?;
            }
        }

        Ok(())
    }

    /// Check ledger invariants, failing if any is violated.
    pub async fn verify(&self) -> anyhow::Result<IntegrityReport> {
        let report = self.worker.engine.verify_integrity().await?;
        if !report.is_consistent() {
            anyhow::bail!("ledger invariants violated: {:?}", report);
        }
        Ok(report)
    }

    /// Recent history of the first simulated account, read as a client would.
    pub async fn sample_history(&self, limit: usize) -> anyhow::Result<Vec<Transaction>> {
        let Some(account) = self.worker.accounts.first() else {
            return Ok(Vec::new());
        };
        let config = self.worker.engine.config();
        let query = HistoryQuery {
            account_id: account.to_string(),
            limit: Some(limit),
            offset: None,
        }
        .validate(config.history_default_limit, config.history_max_limit)?;

        Ok(self
            .worker
            .engine
            .history(&query.account_id, Some(query.limit), query.offset)
            .await?)
    }

    /// Get simulation metrics.
    pub async fn get_metrics(&self) -> SimulationMetrics {
        self.worker.metrics.read().await.clone()
    }
}
