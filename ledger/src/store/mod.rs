//! Storage port for the ledger.
//!
//! The engine never talks to a database directly. It is handed an
//! `Arc<dyn LedgerStore>` at construction and expresses every change as a
//! single [`CommitBatch`], which a store must apply all-or-nothing.

use async_trait::async_trait;

use bakripay_common::{
    AccountId, IdempotencyKey, Result, TransactionId, TransactionStatus, UserId,
};

use crate::account::Account;
use crate::transaction::Transaction;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// New state for an account, guarded by the version it was derived from.
#[derive(Debug, Clone)]
pub struct AccountWrite {
    /// Version the writer read. The store rejects the batch if it moved.
    pub expected_version: u64,
    /// Account state to store.
    pub account: Account,
}

impl AccountWrite {
    /// Write `updated`, which was derived from a read at `expected_version`.
    pub fn new(expected_version: u64, updated: Account) -> Self {
        Self {
            expected_version,
            account: updated,
        }
    }
}

/// Status change of an already committed transaction.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub transaction_id: TransactionId,
    /// Status the writer saw.
    pub from: TransactionStatus,
    pub to: TransactionStatus,
    /// Compensating transaction, for `Completed -> Reversed`.
    pub reversed_by: Option<TransactionId>,
}

/// One atomic unit of work.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub account_writes: Vec<AccountWrite>,
    pub inserts: Vec<Transaction>,
    pub status_updates: Vec<StatusUpdate>,
}

impl CommitBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_account(&mut self, expected_version: u64, updated: Account) -> &mut Self {
        self.account_writes
            .push(AccountWrite::new(expected_version, updated));
        self
    }

    pub fn insert(&mut self, transaction: Transaction) -> &mut Self {
        self.inserts.push(transaction);
        self
    }

    pub fn update_status(&mut self, update: StatusUpdate) -> &mut Self {
        self.status_updates.push(update);
        self
    }
}

/// Persistence abstraction for accounts and transactions.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // === Accounts ===

    /// Insert a brand new account.
    async fn insert_account(&self, account: &Account) -> Result<()>;

    /// Get account by ID.
    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Get all accounts of a user, oldest first.
    async fn accounts_for_user(&self, user_id: &UserId) -> Result<Vec<Account>>;

    /// Get every account.
    async fn all_accounts(&self) -> Result<Vec<Account>>;

    // === Transactions ===

    /// Get transaction by ID.
    async fn load_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    /// Get the transaction recorded under an idempotency key.
    async fn find_by_idempotency_key(&self, key: &IdempotencyKey)
        -> Result<Option<Transaction>>;

    /// Transactions touching an account, newest first.
    async fn transactions_for_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    /// Get every transaction, in commit order.
    async fn all_transactions(&self) -> Result<Vec<Transaction>>;

    // === Unit of work ===

    /// Apply a batch atomically.
    ///
    /// Fails with `StorageFailure` without applying anything if any account
    /// version moved, any transaction id or idempotency key already exists,
    /// or any status update does not start from the stored status.
    async fn commit(&self, batch: CommitBatch) -> Result<()>;
}
