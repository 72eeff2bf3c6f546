//! In-process store backed by hash maps.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use bakripay_common::{
    AccountId, IdempotencyKey, LedgerError, Result, TransactionId, UserId,
};

use super::{CommitBatch, LedgerStore};
use crate::account::Account;
use crate::transaction::Transaction;

#[derive(Default)]
struct StoreState {
    accounts: HashMap<AccountId, Account>,
    accounts_by_user: HashMap<UserId, Vec<AccountId>>,
    transactions: HashMap<TransactionId, Transaction>,
    /// Commit order.
    transaction_log: Vec<TransactionId>,
    transactions_by_account: HashMap<AccountId, Vec<TransactionId>>,
    transactions_by_key: HashMap<IdempotencyKey, TransactionId>,
}

/// Store that keeps everything in memory.
///
/// A batch is checked in full under the write lock before any of it is
/// applied, so readers never see half a commit.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(state: &StoreState, batch: &CommitBatch) -> Result<()> {
        let mut written = HashSet::new();
        for write in &batch.account_writes {
            let id = &write.account.id;
            if !written.insert(id) {
                return Err(conflict(format!("account {id} written twice in one batch")));
            }
            let stored = state
                .accounts
                .get(id)
                .ok_or_else(|| conflict(format!("account {id} does not exist")))?;
            if stored.version != write.expected_version {
                return Err(conflict(format!(
                    "version conflict on account {id}: expected {}, found {}",
                    write.expected_version, stored.version
                )));
            }
        }

        let mut keys = HashSet::new();
        let mut ids = HashSet::new();
        for tx in &batch.inserts {
            if state.transactions.contains_key(&tx.id) || !ids.insert(tx.id) {
                return Err(conflict(format!("duplicate transaction id {}", tx.id)));
            }
            if let Some(key) = &tx.idempotency_key {
                if state.transactions_by_key.contains_key(key) || !keys.insert(key) {
                    return Err(conflict(format!("duplicate idempotency key {key}")));
                }
            }
        }

        for update in &batch.status_updates {
            let stored = state
                .transactions
                .get(&update.transaction_id)
                .ok_or_else(|| {
                    conflict(format!("transaction {} does not exist", update.transaction_id))
                })?;
            if stored.status != update.from || !update.from.can_transition_to(update.to) {
                return Err(conflict(format!(
                    "transaction {} is {}, cannot move {} -> {}",
                    update.transaction_id, stored.status, update.from, update.to
                )));
            }
        }

        Ok(())
    }

    fn apply(state: &mut StoreState, batch: CommitBatch) {
        for write in batch.account_writes {
            state.accounts.insert(write.account.id.clone(), write.account);
        }

        for tx in batch.inserts {
            for account_id in tx.accounts() {
                state
                    .transactions_by_account
                    .entry(account_id)
                    .or_default()
                    .push(tx.id);
            }
            if let Some(key) = &tx.idempotency_key {
                state.transactions_by_key.insert(key.clone(), tx.id);
            }
            state.transaction_log.push(tx.id);
            state.transactions.insert(tx.id, tx);
        }

        for update in batch.status_updates {
            if let Some(stored) = state.transactions.get_mut(&update.transaction_id) {
                stored.status = update.to;
                if update.reversed_by.is_some() {
                    stored.reversed_by = update.reversed_by;
                }
            }
        }
    }
}

fn conflict(message: String) -> LedgerError {
    LedgerError::StorageFailure(message)
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut state = self.state.write();
        if state.accounts.contains_key(&account.id) {
            return Err(conflict(format!("account {} already exists", account.id)));
        }
        state
            .accounts_by_user
            .entry(account.user_id.clone())
            .or_default()
            .push(account.id.clone());
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>> {
        Ok(self.state.read().accounts.get(id).cloned())
    }

    async fn accounts_for_user(&self, user_id: &UserId) -> Result<Vec<Account>> {
        let state = self.state.read();
        Ok(state
            .accounts_by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.accounts.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.state.read().accounts.values().cloned().collect())
    }

    async fn load_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        Ok(self.state.read().transactions.get(id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>> {
        let state = self.state.read();
        Ok(state
            .transactions_by_key
            .get(key)
            .and_then(|id| state.transactions.get(id).cloned()))
    }

    async fn transactions_for_account(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.read();
        Ok(state
            .transactions_by_account
            .get(account_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .skip(offset)
                    .take(limit)
                    .filter_map(|id| state.transactions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn all_transactions(&self) -> Result<Vec<Transaction>> {
        let state = self.state.read();
        Ok(state
            .transaction_log
            .iter()
            .filter_map(|id| state.transactions.get(id).cloned())
            .collect())
    }

    async fn commit(&self, batch: CommitBatch) -> Result<()> {
        let mut state = self.state.write();
        Self::check(&state, &batch)?;
        Self::apply(&mut state, batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StatusUpdate;
    use crate::transaction::TransactionType;
    use bakripay_common::TransactionStatus;
    use rust_decimal_macros::dec;

    async fn store_with_account() -> (InMemoryStore, Account) {
        let store = InMemoryStore::new();
        let account = Account::open(UserId::new("user-1"));
        store.insert_account(&account).await.unwrap();
        (store, account)
    }

    fn deposit(account: &Account, key: Option<&str>) -> Transaction {
        Transaction::new(
            TransactionType::Deposit,
            None,
            Some(account.id.clone()),
            dec!(10),
        )
        .with_idempotency_key(key.map(IdempotencyKey::from))
        .completed(Vec::new())
    }

    #[tokio::test]
    async fn test_commit_applies_writes_and_inserts() {
        let (store, account) = store_with_account().await;
        let tx = deposit(&account, Some("k1"));

        let mut batch = CommitBatch::new();
        batch
            .write_account(account.version, account.with_balance(dec!(10)))
            .insert(tx.clone());
        store.commit(batch).await.unwrap();

        let stored = store.load_account(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(10));
        assert_eq!(stored.version, 1);
        assert_eq!(
            store
                .find_by_idempotency_key(&IdempotencyKey::from("k1"))
                .await
                .unwrap()
                .map(|t| t.id),
            Some(tx.id)
        );
    }

    #[tokio::test]
    async fn test_version_conflict_rejects_whole_batch() {
        let (store, account) = store_with_account().await;

        let mut batch = CommitBatch::new();
        batch
            .write_account(account.version + 7, account.with_balance(dec!(10)))
            .insert(deposit(&account, None));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageFailure(_)));

        let stored = store.load_account(&account.id).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(0));
        assert!(store.all_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_idempotency_key_rejected() {
        let (store, account) = store_with_account().await;

        let mut first = CommitBatch::new();
        first.insert(deposit(&account, Some("dup")));
        store.commit(first).await.unwrap();

        let mut second = CommitBatch::new();
        second.insert(deposit(&account, Some("dup")));
        assert!(store.commit(second).await.is_err());
    }

    #[tokio::test]
    async fn test_status_update_must_start_from_stored_status() {
        let (store, account) = store_with_account().await;
        let tx = deposit(&account, None);
        let mut batch = CommitBatch::new();
        batch.insert(tx.clone());
        store.commit(batch).await.unwrap();

        let reversal = TransactionId::new();
        let mut ok = CommitBatch::new();
        ok.update_status(StatusUpdate {
            transaction_id: tx.id,
            from: TransactionStatus::Completed,
            to: TransactionStatus::Reversed,
            reversed_by: Some(reversal),
        });
        store.commit(ok.clone()).await.unwrap();

        let stored = store.load_transaction(&tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Reversed);
        assert_eq!(stored.reversed_by, Some(reversal));

        // Same update again no longer matches the stored status.
        assert!(store.commit(ok).await.is_err());
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_paged() {
        let (store, account) = store_with_account().await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            let tx = deposit(&account, None);
            ids.push(tx.id);
            let mut batch = CommitBatch::new();
            batch.insert(tx);
            store.commit(batch).await.unwrap();
        }

        let page = store
            .transactions_for_account(&account.id, 2, 1)
            .await
            .unwrap();
        let page_ids: Vec<_> = page.iter().map(|t| t.id).collect();
        assert_eq!(page_ids, vec![ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn test_accounts_for_user() {
        let (store, account) = store_with_account().await;
        let other = Account::open(UserId::new("user-2"));
        store.insert_account(&other).await.unwrap();

        let mine = store.accounts_for_user(&UserId::new("user-1")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, account.id);
        assert!(store.insert_account(&account).await.is_err());
    }
}
