//! Account definitions for ledger.

use bakripay_common::{AccountId, AccountStatus, LedgerError, Result, UserId};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning user.
    pub user_id: UserId,
    /// Human-facing 10 digit account number.
    pub account_number: String,
    /// Current balance. Never negative.
    pub balance: Decimal,
    /// Account status.
    pub status: AccountStatus,
    /// Optimistic concurrency token, bumped on every write.
    pub version: u64,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a new, empty, active account for a user.
    pub fn open(user_id: UserId) -> Self {
        Self::with_id(AccountId::generate(), user_id)
    }

    /// Open an account with a caller-chosen identifier.
    pub fn with_id(id: AccountId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            account_number: generate_account_number(),
            balance: Decimal::ZERO,
            status: AccountStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if account can transact.
    pub fn can_transact(&self) -> bool {
        self.status.can_transact()
    }

    /// Fail with `AccountFrozen` unless the account is active.
    pub fn ensure_active(&self) -> Result<()> {
        if self.can_transact() {
            Ok(())
        } else {
            Err(LedgerError::AccountFrozen {
                account_id: self.id.clone(),
                status: self.status,
            })
        }
    }

    /// Balance after crediting `amount`.
    pub fn credit_balance(&self, amount: Decimal) -> Result<Decimal> {
        self.balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount(format!("{amount} overflows balance")))
    }

    /// Balance after debiting `amount`; fails rather than go negative.
    pub fn debit_balance(&self, amount: Decimal) -> Result<Decimal> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id.clone(),
                required: amount,
                available: self.balance,
            });
        }
        Ok(self.balance - amount)
    }

    /// Next version of this account with a new balance.
    pub fn with_balance(&self, balance: Decimal) -> Self {
        Self {
            balance,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Next version of this account with a new status.
    pub fn with_status(&self, status: AccountStatus) -> Self {
        Self {
            status,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

fn generate_account_number() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000u64..10_000_000_000u64)
        .to_string()
}
