//! Lifecycle states for accounts and transactions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// Account is active and can transact.
    Active,
    /// Account is frozen (no balance changes allowed).
    Frozen,
    /// Account is closed. Terminal.
    Closed,
}

impl AccountStatus {
    /// Check if the account can take part in balance-affecting operations.
    pub fn can_transact(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[AccountStatus] {
        match self {
            AccountStatus::Active => &[AccountStatus::Frozen, AccountStatus::Closed],
            AccountStatus::Frozen => &[AccountStatus::Active, AccountStatus::Closed],
            AccountStatus::Closed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: AccountStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Frozen => "frozen",
            AccountStatus::Closed => "closed",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "frozen" => Some(AccountStatus::Frozen),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Built by the engine, not yet committed.
    Pending,
    /// Committed together with its balance changes.
    Completed,
    /// Rejected under lock; no balance was touched.
    Failed,
    /// A compensating transaction has undone this one.
    Reversed,
}

impl TransactionStatus {
    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => {
                &[TransactionStatus::Completed, TransactionStatus::Failed]
            }
            TransactionStatus::Completed => &[TransactionStatus::Reversed],
            TransactionStatus::Failed => &[],
            TransactionStatus::Reversed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "reversed" => Some(TransactionStatus::Reversed),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
