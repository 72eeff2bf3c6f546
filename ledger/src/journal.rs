//! Journal entries: the per-account balance effects of a transaction.

use bakripay_common::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a journal entry, from the account holder's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    /// Money leaves the account.
    Debit,
    /// Money enters the account.
    Credit,
}

/// A single balance change recorded on a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Account affected.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: EntryDirection,
    /// Amount moved. Always positive.
    pub amount: Decimal,
    /// Balance of the account right after this entry.
    pub balance_after: Decimal,
}

impl JournalEntry {
    /// Create a debit entry.
    pub fn debit(account_id: AccountId, amount: Decimal, balance_after: Decimal) -> Self {
        Self {
            account_id,
            direction: EntryDirection::Debit,
            amount,
            balance_after,
        }
    }

    /// Create a credit entry.
    pub fn credit(account_id: AccountId, amount: Decimal, balance_after: Decimal) -> Self {
        Self {
            account_id,
            direction: EntryDirection::Credit,
            amount,
            balance_after,
        }
    }

    /// Effect on the account balance: positive for credits.
    pub fn signed_amount(&self) -> Decimal {
        match self.direction {
            EntryDirection::Credit => self.amount,
            EntryDirection::Debit => -self.amount,
        }
    }
}

/// Sum of debits minus credits over a set of entries.
pub fn net_outflow(entries: &[JournalEntry]) -> Decimal {
    entries.iter().map(|e| -e.signed_amount()).sum()
}
