//! Account balance snapshots for display.

use bakripay_common::{AccountId, AccountStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;

/// Account balance at a point in time.
///
/// Read without taking the account lock, so it may already be stale when
/// the caller sees it. Never feed it back into a mutating decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Account identifier.
    pub account_id: AccountId,
    /// Balance at read time.
    pub balance: Decimal,
    /// Status at read time.
    pub status: AccountStatus,
    /// Account version the snapshot was taken from.
    pub version: u64,
    /// When the snapshot was taken.
    pub as_of: DateTime<Utc>,
}

impl From<&Account> for BalanceSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            balance: account.balance,
            status: account.status,
            version: account.version,
            as_of: Utc::now(),
        }
    }
}
