//! Core ledger engine implementation.
//!
//! Every mutating operation follows the same path: lock the idempotency key
//! (if any), lock the involved accounts in ascending id order, re-read them,
//! validate, and hand one [`CommitBatch`] to the store. Locks are released
//! before post-commit hooks run.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use bakripay_common::monetary::is_valid_amount;
use bakripay_common::{
    AccountId, IdempotencyKey, LedgerCommand, LedgerError, Result, TransactionId,
    TransactionStatus,
};

use crate::account::Account;
use crate::balance::BalanceSnapshot;
use crate::config::LedgerConfig;
use crate::directory::AccountDirectory;
use crate::hooks::PostCommitHook;
use crate::integrity::{self, IntegrityReport};
use crate::journal::JournalEntry;
use crate::lock_manager::LockManager;
use crate::metrics::{Metrics, SharedMetrics};
use crate::store::{CommitBatch, LedgerStore, StatusUpdate};
use crate::transaction::{Transaction, TransactionType};

/// A requested balance movement, before any account has been read.
#[derive(Debug, Clone)]
struct Movement {
    kind: TransactionType,
    source: Option<AccountId>,
    destination: Option<AccountId>,
    amount: Decimal,
    reference: Option<String>,
    idempotency_key: Option<IdempotencyKey>,
    reverses: Option<TransactionId>,
}

impl Movement {
    fn accounts(&self) -> Vec<AccountId> {
        self.source
            .iter()
            .chain(self.destination.iter())
            .cloned()
            .collect()
    }

    fn pending(&self) -> Transaction {
        let tx = Transaction::new(
            self.kind,
            self.source.clone(),
            self.destination.clone(),
            self.amount,
        )
        .with_reference(self.reference.clone())
        .with_idempotency_key(self.idempotency_key.clone());
        match self.reverses {
            Some(original) => tx.reversing(original),
            None => tx,
        }
    }

    /// The movement that undoes a completed transaction.
    fn compensating(original: &Transaction) -> Self {
        let (kind, source, destination) = match original.kind {
            TransactionType::Deposit => (
                TransactionType::Withdrawal,
                original.destination.clone(),
                None,
            ),
            TransactionType::Withdrawal => {
                (TransactionType::Deposit, None, original.source.clone())
            }
            TransactionType::Transfer => (
                TransactionType::Transfer,
                original.destination.clone(),
                original.source.clone(),
            ),
        };
        Self {
            kind,
            source,
            destination,
            amount: original.amount,
            reference: Some(format!("reversal of {}", original.id)),
            idempotency_key: None,
            reverses: Some(original.id),
        }
    }
}

/// New account states and journal entries for a validated movement.
#[derive(Default)]
struct Plan {
    writes: Vec<(u64, Account)>,
    entries: Vec<JournalEntry>,
}

impl Plan {
    fn build(
        movement: &Movement,
        source: Option<&Account>,
        destination: Option<&Account>,
    ) -> Result<Self> {
        for account in source.iter().chain(destination.iter()) {
            account.ensure_active()?;
        }

        let mut plan = Plan::default();
        if let Some(account) = source {
            let balance = account.debit_balance(movement.amount)?;
            plan.entries
                .push(JournalEntry::debit(account.id.clone(), movement.amount, balance));
            plan.writes.push((account.version, account.with_balance(balance)));
        }
        if let Some(account) = destination {
            let balance = account.credit_balance(movement.amount)?;
            plan.entries
                .push(JournalEntry::credit(account.id.clone(), movement.amount, balance));
            plan.writes.push((account.version, account.with_balance(balance)));
        }
        Ok(plan)
    }

    fn into_batch(self, transaction: Transaction) -> CommitBatch {
        let mut batch = CommitBatch::new();
        for (expected_version, account) in self.writes {
            batch.write_account(expected_version, account);
        }
        batch.insert(transaction);
        batch
    }
}

enum Outcome {
    Committed(Transaction),
    Replayed(Transaction),
}

/// The ledger engine: atomic deposits, withdrawals, transfers and reversals.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    account_locks: Arc<LockManager<AccountId>>,
    /// Always taken before account locks.
    key_locks: LockManager<IdempotencyKey>,
    hooks: Vec<Arc<dyn PostCommitHook>>,
    config: LedgerConfig,
    metrics: SharedMetrics,
}

impl LedgerEngine {
    /// Create a new ledger engine over `store`.
    ///
    /// Fails with `ConfigurationError` when `config` does not validate.
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Result<Self> {
        config.validate().map_err(LedgerError::ConfigurationError)?;
        Ok(Self {
            store,
            account_locks: Arc::new(LockManager::new(config.lock_timeout)),
            key_locks: LockManager::new(config.lock_timeout),
            hooks: Vec::new(),
            config,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Register a hook to run after every commit.
    pub fn with_hook(mut self, hook: Arc<dyn PostCommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Report into an existing metrics instance.
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Account directory sharing this engine's store and account locks.
    pub fn directory(&self) -> AccountDirectory {
        AccountDirectory::new(self.store.clone(), self.account_locks.clone())
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Credit an account.
    #[instrument(skip_all, fields(account_id = %account_id, amount = %amount))]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        reference: Option<String>,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Transaction> {
        self.run(Movement {
            kind: TransactionType::Deposit,
            source: None,
            destination: Some(account_id),
            amount,
            reference,
            idempotency_key,
            reverses: None,
        })
        .await
    }

    /// Debit an account. Never drives the balance below zero.
    #[instrument(skip_all, fields(account_id = %account_id, amount = %amount))]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        reference: Option<String>,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Transaction> {
        self.run(Movement {
            kind: TransactionType::Withdrawal,
            source: Some(account_id),
            destination: None,
            amount,
            reference,
            idempotency_key,
            reverses: None,
        })
        .await
    }

    /// Move money between two accounts as one unit.
    #[instrument(skip_all, fields(source = %source, destination = %destination, amount = %amount))]
    pub async fn transfer(
        &self,
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
        reference: Option<String>,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Transaction> {
        if source == destination {
            let err = LedgerError::SameAccount(source);
            self.metrics.failed(&err);
            return Err(err);
        }
        self.run(Movement {
            kind: TransactionType::Transfer,
            source: Some(source),
            destination: Some(destination),
            amount,
            reference,
            idempotency_key,
            reverses: None,
        })
        .await
    }

    /// Undo a completed transaction with a compensating one.
    ///
    /// Returns the compensating transaction. The original is marked
    /// `Reversed` in the same commit.
    #[instrument(skip_all, fields(transaction_id = %transaction_id))]
    pub async fn reverse(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let active = self.metrics.operation_started();
        let result = self.apply_reversal(transaction_id).await;
        drop(active);
        self.finish(result)
    }

    /// Run a validated request-layer command.
    pub async fn execute(&self, command: LedgerCommand) -> Result<Transaction> {
        match command {
            LedgerCommand::Deposit {
                account_id,
                amount,
                reference,
                idempotency_key,
            } => {
                self.deposit(account_id, amount, reference, idempotency_key)
                    .await
            }
            LedgerCommand::Withdraw {
                account_id,
                amount,
                reference,
                idempotency_key,
            } => {
                self.withdraw(account_id, amount, reference, idempotency_key)
                    .await
            }
            LedgerCommand::Transfer {
                source,
                destination,
                amount,
                reference,
                idempotency_key,
            } => {
                self.transfer(source, destination, amount, reference, idempotency_key)
                    .await
            }
            LedgerCommand::Reverse { transaction_id } => self.reverse(transaction_id).await,
        }
    }

    /// Get a transaction by id.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .load_transaction(&id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// Transactions touching an account, newest first.
    ///
    /// `limit` defaults to and is clamped by the configured page sizes.
    pub async fn history(
        &self,
        account_id: &AccountId,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        self.load_account(account_id).await?;
        let limit = self.config.history_limit(limit);
        self.store
            .transactions_for_account(account_id, limit, offset)
            .await
    }

    /// Current balance for display. Not locked, so it may be stale.
    pub async fn balance(&self, account_id: &AccountId) -> Result<BalanceSnapshot> {
        let account = self.load_account(account_id).await?;
        Ok(BalanceSnapshot::from(&account))
    }

    /// Replay the journal against stored balances.
    ///
    /// Reads accounts and transactions separately without locking, so run
    /// it while no operations are in flight.
    pub async fn verify_integrity(&self) -> Result<IntegrityReport> {
        let accounts = self.store.all_accounts().await?;
        let transactions = self.store.all_transactions().await?;
        let report = integrity::verify(&accounts, &transactions);

        if report.is_consistent() {
            info!(
                accounts = report.accounts_checked,
                transactions = report.transactions_checked,
                total_balance = %report.total_balance,
                "Ledger integrity verified"
            );
        } else {
            error!(
                total_balance = %report.total_balance,
                net_issuance = %report.net_issuance,
                negative = report.negative_balances.len(),
                mismatched = report.mismatched_accounts.len(),
                unbalanced = report.unbalanced_transactions.len(),
                "Ledger integrity violated"
            );
        }
        Ok(report)
    }

    /// Drop lock entries no task holds or waits on.
    pub fn prune_locks(&self) -> usize {
        self.account_locks.prune_idle() + self.key_locks.prune_idle()
    }

    // --- Private methods ---

    async fn run(&self, movement: Movement) -> Result<Transaction> {
        let active = self.metrics.operation_started();
        let result = self.apply_movement(movement).await;
        drop(active);
        self.finish(result)
    }

    fn finish(&self, result: Result<Outcome>) -> Result<Transaction> {
        let result = match result {
            Ok(Outcome::Committed(tx)) => {
                if tx.reverses.is_some() {
                    self.metrics.reversed();
                } else {
                    self.metrics.completed(tx.kind);
                }
                self.notify(&tx);
                Ok(tx)
            }
            Ok(Outcome::Replayed(tx)) => {
                self.metrics.replayed();
                Ok(tx)
            }
            Err(err) => {
                self.metrics.failed(&err);
                Err(err)
            }
        };

        if self.account_locks.len() > self.config.lock_prune_threshold {
            self.prune_locks();
        }
        result
    }

    async fn apply_movement(&self, movement: Movement) -> Result<Outcome> {
        if !is_valid_amount(movement.amount) {
            return Err(LedgerError::InvalidAmount(format!(
                "{} must be positive with at most two decimal places",
                movement.amount
            )));
        }

        let _key_lock = match &movement.idempotency_key {
            Some(key) => {
                let lock = self.key_locks.acquire([key.clone()]).await?;
                if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                    return replay(existing, &movement, key).map(Outcome::Replayed);
                }
                Some(lock)
            }
            None => None,
        };

        let _locks = self.account_locks.acquire(movement.accounts()).await?;
        let source = self.load_optional(movement.source.as_ref()).await?;
        let destination = self.load_optional(movement.destination.as_ref()).await?;

        let plan = match Plan::build(&movement, source.as_ref(), destination.as_ref()) {
            Ok(plan) => plan,
            Err(err) => return Err(self.record_failure(&movement, err).await),
        };

        let tx = movement.pending().completed(plan.entries.clone());
        self.commit(plan.into_batch(tx.clone())).await?;

        info!(
            transaction_id = %tx.id,
            kind = %tx.kind,
            amount = %tx.amount,
            "Transaction committed"
        );
        Ok(Outcome::Committed(tx))
    }

    async fn apply_reversal(&self, transaction_id: TransactionId) -> Result<Outcome> {
        // Accounts of a transaction never change, so they can be read unlocked.
        let accounts = self.get_transaction(transaction_id).await?.accounts();
        let _locks = self.account_locks.acquire(accounts).await?;

        let original = self.get_transaction(transaction_id).await?;
        if original.status == TransactionStatus::Reversed || original.reversed_by.is_some() {
            return Err(LedgerError::AlreadyReversed(transaction_id));
        }
        if original.reverses.is_some() {
            return Err(LedgerError::NotReversible {
                transaction_id,
                reason: "compensating transactions cannot be reversed".to_string(),
            });
        }
        if original.status != TransactionStatus::Completed {
            return Err(LedgerError::NotReversible {
                transaction_id,
                reason: format!("transaction is {}", original.status),
            });
        }

        let movement = Movement::compensating(&original);
        let source = self.load_optional(movement.source.as_ref()).await?;
        let destination = self.load_optional(movement.destination.as_ref()).await?;

        let plan = match Plan::build(&movement, source.as_ref(), destination.as_ref()) {
            Ok(plan) => plan,
            Err(err) => return Err(self.record_failure(&movement, err).await),
        };

        let compensation = movement.pending().completed(plan.entries.clone());
        let mut batch = plan.into_batch(compensation.clone());
        batch.update_status(StatusUpdate {
            transaction_id,
            from: TransactionStatus::Completed,
            to: TransactionStatus::Reversed,
            reversed_by: Some(compensation.id),
        });
        self.commit(batch).await?;

        info!(
            original = %transaction_id,
            compensation = %compensation.id,
            kind = %compensation.kind,
            amount = %compensation.amount,
            "Transaction reversed"
        );
        Ok(Outcome::Committed(compensation))
    }

    /// Persist a failed record for rejections against existing accounts,
    /// then hand back the error to return.
    async fn record_failure(&self, movement: &Movement, err: LedgerError) -> LedgerError {
        let Some(reason) = err.failure_reason() else {
            warn!(error = %err, "Operation rejected");
            return err;
        };

        let failed = movement.pending().failed(reason);
        let mut batch = CommitBatch::new();
        batch.insert(failed.clone());
        if let Err(storage_err) = self.commit(batch).await {
            return storage_err;
        }

        warn!(
            transaction_id = %failed.id,
            code = err.error_code(),
            error = %err,
            "Operation rejected, failure recorded"
        );
        err
    }

    async fn commit(&self, batch: CommitBatch) -> Result<()> {
        self.store.commit(batch).await.map_err(|err| {
            error!(error = %err, "Commit failed, nothing applied");
            err
        })
    }

    async fn load_account(&self, id: &AccountId) -> Result<Account> {
        self.store
            .load_account(id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))
    }

    async fn load_optional(&self, id: Option<&AccountId>) -> Result<Option<Account>> {
        match id {
            Some(id) => self.load_account(id).await.map(Some),
            None => Ok(None),
        }
    }

    fn notify(&self, transaction: &Transaction) {
        for hook in &self.hooks {
            let hook = hook.clone();
            let transaction = transaction.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.on_commit(&transaction).await {
                    warn!(
                        hook = hook.name(),
                        transaction_id = %transaction.id,
                        error = %e,
                        "Post-commit hook failed"
                    );
                }
            });
        }
    }
}

/// Answer a retried request from the record stored under its key.
fn replay(existing: Transaction, movement: &Movement, key: &IdempotencyKey) -> Result<Transaction> {
    if !existing.matches_request(
        movement.kind,
        movement.source.as_ref(),
        movement.destination.as_ref(),
        movement.amount,
    ) {
        warn!(key = %key, existing = %existing.id, "Idempotency key reused for a different request");
        return Err(LedgerError::IdempotencyKeyReused(key.clone()));
    }

    info!(key = %key, transaction_id = %existing.id, status = %existing.status, "Idempotent replay");
    match existing.status {
        TransactionStatus::Completed | TransactionStatus::Reversed => Ok(existing),
        TransactionStatus::Failed => Err(existing.failure.map(LedgerError::from).unwrap_or_else(
            || LedgerError::StorageFailure(format!("failed transaction {} has no reason", existing.id)),
        )),
        TransactionStatus::Pending => Err(LedgerError::StorageFailure(format!(
            "transaction {} was stored as pending",
            existing.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ChannelHook;
    use crate::store::InMemoryStore;
    use bakripay_common::{AccountStatus, UserId};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn create_test_engine() -> LedgerEngine {
        let config = LedgerConfig {
            lock_timeout: Duration::from_millis(200),
            ..LedgerConfig::default()
        };
        LedgerEngine::new(Arc::new(InMemoryStore::new()), config).unwrap()
    }

    async fn open(engine: &LedgerEngine, balance: Decimal) -> AccountId {
        let account = engine
            .directory()
            .open_account(UserId::new("user-1"))
            .await
            .unwrap();
        if balance > Decimal::ZERO {
            engine
                .deposit(account.id.clone(), balance, None, None)
                .await
                .unwrap();
        }
        account.id
    }

    async fn balance_of(engine: &LedgerEngine, id: &AccountId) -> Decimal {
        engine.balance(id).await.unwrap().balance
    }

    #[tokio::test]
    async fn test_deposit_withdraw_transfer() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(100)).await;
        let b = open(&engine, dec!(0)).await;

        let tx = engine
            .transfer(a.clone(), b.clone(), dec!(40), Some("rent".into()), None)
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.entries.len(), 2);
        assert_eq!(tx.reference.as_deref(), Some("rent"));

        engine.withdraw(b.clone(), dec!(15.50), None, None).await.unwrap();

        assert_eq!(balance_of(&engine, &a).await, dec!(60));
        assert_eq!(balance_of(&engine, &b).await, dec!(24.50));

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.deposits_total, 1);
        assert_eq!(snapshot.transfers_total, 1);
        assert_eq!(snapshot.withdrawals_total, 1);
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(0)).await;

        for amount in [dec!(0), dec!(-5), dec!(1.005)] {
            let err = engine.deposit(a.clone(), amount, None, None).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)), "{amount}");
        }
        assert!(engine.history(&a, None, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_account_transfer_rejected() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(10)).await;
        let err = engine
            .transfer(a.clone(), a.clone(), dec!(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::SameAccount(a));
    }

    #[tokio::test]
    async fn test_insufficient_funds_records_failed_transaction() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(10)).await;

        let err = engine
            .withdraw(a.clone(), dec!(10.01), None, Some("w-1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(balance_of(&engine, &a).await, dec!(10));

        let history = engine.history(&a, None, 0).await.unwrap();
        assert_eq!(history[0].status, TransactionStatus::Failed);
        assert!(history[0].entries.is_empty());

        // A retry with the same key gets the recorded error back.
        let again = engine
            .withdraw(a.clone(), dec!(10.01), None, Some("w-1".into()))
            .await
            .unwrap_err();
        assert_eq!(again, err);
        assert_eq!(engine.history(&a, None, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_account_records_nothing() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(10)).await;

        let err = engine
            .transfer(a.clone(), AccountId::new("ghost"), dec!(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(AccountId::new("ghost")));
        assert_eq!(engine.history(&a, None, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_frozen_account_rejected() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(10)).await;
        let b = open(&engine, dec!(0)).await;
        engine.directory().freeze(&b).await.unwrap();

        let err = engine
            .transfer(a.clone(), b.clone(), dec!(1), None, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::AccountFrozen {
                account_id: b,
                status: AccountStatus::Frozen,
            }
        );
        assert_eq!(balance_of(&engine, &a).await, dec!(10));
    }

    #[tokio::test]
    async fn test_frozen_rejection_replays_under_same_key() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(10)).await;
        let b = open(&engine, dec!(0)).await;
        let directory = engine.directory();
        directory.freeze(&b).await.unwrap();

        let key = IdempotencyKey::new("t-1");
        let err = engine
            .transfer(a.clone(), b.clone(), dec!(3), None, Some(key.clone()))
            .await
            .unwrap_err();

        // Unfreezing does not turn the recorded rejection into a transfer.
        directory.unfreeze(&b).await.unwrap();
        let again = engine
            .transfer(a.clone(), b.clone(), dec!(3), None, Some(key))
            .await
            .unwrap_err();
        assert_eq!(again, err);
        assert!(matches!(again, LedgerError::AccountFrozen { .. }));

        assert_eq!(balance_of(&engine, &a).await, dec!(10));
        assert_eq!(balance_of(&engine, &b).await, dec!(0));
        let history = engine.history(&b, None, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransactionStatus::Failed);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LedgerConfig {
            history_max_limit: 0,
            ..LedgerConfig::default()
        };
        let result = LedgerEngine::new(Arc::new(InMemoryStore::new()), config);
        assert!(matches!(result, Err(LedgerError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_idempotency_key_reuse_with_other_parameters() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(0)).await;
        let key = IdempotencyKey::new("dep-1");

        let first = engine
            .deposit(a.clone(), dec!(5), None, Some(key.clone()))
            .await
            .unwrap();
        let replay = engine
            .deposit(a.clone(), dec!(5.00), None, Some(key.clone()))
            .await
            .unwrap();
        assert_eq!(first.id, replay.id);

        let err = engine
            .deposit(a.clone(), dec!(6), None, Some(key.clone()))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::IdempotencyKeyReused(key));
        assert_eq!(balance_of(&engine, &a).await, dec!(5));
        assert_eq!(engine.metrics().snapshot().idempotent_replays, 1);
    }

    #[tokio::test]
    async fn test_reverse_transfer() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(100)).await;
        let b = open(&engine, dec!(0)).await;
        let tx = engine
            .transfer(a.clone(), b.clone(), dec!(30), None, None)
            .await
            .unwrap();

        let compensation = engine.reverse(tx.id).await.unwrap();
        assert_eq!(compensation.kind, TransactionType::Transfer);
        assert_eq!(compensation.source.as_ref(), Some(&b));
        assert_eq!(compensation.destination.as_ref(), Some(&a));
        assert_eq!(compensation.reverses, Some(tx.id));

        let original = engine.get_transaction(tx.id).await.unwrap();
        assert_eq!(original.status, TransactionStatus::Reversed);
        assert_eq!(original.reversed_by, Some(compensation.id));

        assert_eq!(balance_of(&engine, &a).await, dec!(100));
        assert_eq!(balance_of(&engine, &b).await, dec!(0));

        let err = engine.reverse(compensation.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotReversible { .. }));
        assert!(engine.verify_integrity().await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_reverse_needs_funds_in_credited_account() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(0)).await;
        let deposit = engine.deposit(a.clone(), dec!(50), None, None).await.unwrap();
        engine.withdraw(a.clone(), dec!(20), None, None).await.unwrap();

        let err = engine.reverse(deposit.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let original = engine.get_transaction(deposit.id).await.unwrap();
        assert_eq!(original.status, TransactionStatus::Completed);
        assert_eq!(balance_of(&engine, &a).await, dec!(30));
    }

    #[tokio::test]
    async fn test_reverse_failed_or_unknown_transaction() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(1)).await;
        let _ = engine.withdraw(a.clone(), dec!(2), None, None).await;
        let failed = engine.history(&a, Some(1), 0).await.unwrap().remove(0);

        let err = engine.reverse(failed.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotReversible { .. }));

        let unknown = TransactionId::new();
        assert_eq!(
            engine.reverse(unknown).await.unwrap_err(),
            LedgerError::TransactionNotFound(unknown)
        );
    }

    #[tokio::test]
    async fn test_hooks_see_committed_transactions() {
        let (hook, mut receiver) = ChannelHook::new(8);
        let engine = create_test_engine().with_hook(Arc::new(hook));
        let a = open(&engine, dec!(25)).await;

        let seen = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.destination, Some(a));
        assert_eq!(seen.amount, dec!(25));
    }

    #[tokio::test]
    async fn test_execute_dispatches_commands() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(0)).await;

        let tx = engine
            .execute(LedgerCommand::Deposit {
                account_id: a.clone(),
                amount: dec!(12.34),
                reference: None,
                idempotency_key: None,
            })
            .await
            .unwrap();
        let compensation = engine
            .execute(LedgerCommand::Reverse {
                transaction_id: tx.id,
            })
            .await
            .unwrap();
        assert_eq!(compensation.kind, TransactionType::Withdrawal);
        assert_eq!(balance_of(&engine, &a).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_prune_locks() {
        let engine = create_test_engine();
        let a = open(&engine, dec!(10)).await;
        let b = open(&engine, dec!(0)).await;
        engine
            .transfer(a, b, dec!(1), None, Some("t-1".into()))
            .await
            .unwrap();

        assert_eq!(engine.prune_locks(), 3);
        assert_eq!(engine.prune_locks(), 0);
    }
}
