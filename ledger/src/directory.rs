//! Account directory: opening accounts, ownership checks and status changes.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use bakripay_common::{AccountId, AccountStatus, LedgerError, Result, UserId};

use crate::account::Account;
use crate::balance::BalanceSnapshot;
use crate::lock_manager::LockManager;
use crate::store::{CommitBatch, LedgerStore};

/// Account lifecycle manager.
///
/// Shares its store and account locks with the [`LedgerEngine`], so a
/// freeze never interleaves with a transfer on the same account.
///
/// [`LedgerEngine`]: crate::engine::LedgerEngine
#[derive(Clone)]
pub struct AccountDirectory {
    store: Arc<dyn LedgerStore>,
    locks: Arc<LockManager<AccountId>>,
}

impl AccountDirectory {
    pub fn new(store: Arc<dyn LedgerStore>, locks: Arc<LockManager<AccountId>>) -> Self {
        Self { store, locks }
    }

    /// Open a new, empty, active account for a user.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn open_account(&self, user_id: UserId) -> Result<Account> {
        let account = Account::open(user_id);
        self.store.insert_account(&account).await?;
        info!(account_id = %account.id, "Account opened");
        Ok(account)
    }

    /// Get an account by id.
    pub async fn get_account(&self, id: &AccountId) -> Result<Account> {
        self.store
            .load_account(id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(id.clone()))
    }

    /// All accounts of a user, oldest first.
    pub async fn accounts_for_user(&self, user_id: &UserId) -> Result<Vec<Account>> {
        self.store.accounts_for_user(user_id).await
    }

    /// Get an account, failing unless `user_id` owns it.
    pub async fn ensure_owner(&self, user_id: &UserId, account_id: &AccountId) -> Result<Account> {
        let account = self.get_account(account_id).await?;
        if &account.user_id != user_id {
            warn!(account_id = %account_id, user_id = %user_id, "Account access denied");
            return Err(LedgerError::NotAccountOwner {
                account_id: account_id.clone(),
                user_id: user_id.clone(),
            });
        }
        Ok(account)
    }

    /// Stop all balance changes on an account.
    pub async fn freeze(&self, id: &AccountId) -> Result<Account> {
        self.transition(id, AccountStatus::Frozen).await
    }

    pub async fn unfreeze(&self, id: &AccountId) -> Result<Account> {
        self.transition(id, AccountStatus::Active).await
    }

    /// Close an empty account for good.
    pub async fn close(&self, id: &AccountId) -> Result<Account> {
        self.transition(id, AccountStatus::Closed).await
    }

    /// Current balance for display. Not locked.
    pub async fn balance(&self, id: &AccountId) -> Result<BalanceSnapshot> {
        let account = self.get_account(id).await?;
        Ok(BalanceSnapshot::from(&account))
    }

    #[instrument(skip_all, fields(account_id = %id, to = %target))]
    async fn transition(&self, id: &AccountId, target: AccountStatus) -> Result<Account> {
        let _locks = self.locks.acquire([id.clone()]).await?;
        let account = self.get_account(id).await?;

        if !account.status.can_transition_to(target) {
            return Err(LedgerError::InvalidStatusTransition {
                account_id: id.clone(),
                from: account.status,
                to: target,
            });
        }
        if target == AccountStatus::Closed && !account.balance.is_zero() {
            return Err(LedgerError::AccountNotEmpty {
                account_id: id.clone(),
                balance: account.balance,
            });
        }

        let updated = account.with_status(target);
        let mut batch = CommitBatch::new();
        batch.write_account(account.version, updated.clone());
        self.store.commit(batch).await?;

        info!(from = %account.status, "Account status changed");
        Ok(updated)
    }
}
