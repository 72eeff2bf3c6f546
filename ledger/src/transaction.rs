//! Transaction records produced by every ledger operation.

use bakripay_common::{
    AccountId, FailureReason, IdempotencyKey, TransactionId, TransactionStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::journal::JournalEntry;

/// Kind of balance-affecting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionType::Deposit),
            "withdrawal" => Some(TransactionType::Withdrawal),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of one ledger operation.
///
/// Financial fields never change after commit. The only later change is
/// `Completed -> Reversed`, which also sets `reversed_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// Operation kind.
    pub kind: TransactionType,
    /// Debited account (none for deposits).
    pub source: Option<AccountId>,
    /// Credited account (none for withdrawals).
    pub destination: Option<AccountId>,
    /// Amount moved.
    pub amount: Decimal,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Free-text reference supplied by the caller.
    pub reference: Option<String>,
    /// Client idempotency key, if the caller supplied one.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Transaction this one compensates.
    pub reverses: Option<TransactionId>,
    /// Compensating transaction that undid this one.
    pub reversed_by: Option<TransactionId>,
    /// Why the transaction failed.
    pub failure: Option<FailureReason>,
    /// Balance effects, one entry per touched account.
    pub entries: Vec<JournalEntry>,
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a pending transaction.
    pub fn new(
        kind: TransactionType,
        source: Option<AccountId>,
        destination: Option<AccountId>,
        amount: Decimal,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            kind,
            source,
            destination,
            amount,
            status: TransactionStatus::Pending,
            reference: None,
            idempotency_key: None,
            reverses: None,
            reversed_by: None,
            failure: None,
            entries: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Mark this transaction as compensating `original`.
    pub fn reversing(mut self, original: TransactionId) -> Self {
        self.reverses = Some(original);
        self
    }

    /// Complete a pending transaction with its journal entries.
    pub fn completed(mut self, entries: Vec<JournalEntry>) -> Self {
        debug_assert!(self.status.can_transition_to(TransactionStatus::Completed));
        self.status = TransactionStatus::Completed;
        self.entries = entries;
        self
    }

    /// Fail a pending transaction. No entries are recorded.
    pub fn failed(mut self, reason: FailureReason) -> Self {
        debug_assert!(self.status.can_transition_to(TransactionStatus::Failed));
        self.status = TransactionStatus::Failed;
        self.failure = Some(reason);
        self.entries.clear();
        self
    }

    /// Accounts touched by this transaction.
    pub fn accounts(&self) -> Vec<AccountId> {
        self.source
            .iter()
            .chain(self.destination.iter())
            .cloned()
            .collect()
    }

    /// Whether the transaction moved money (completed, possibly since reversed).
    pub fn moved_funds(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Completed | TransactionStatus::Reversed
        )
    }

    /// Check whether a retried request describes the same operation.
    pub fn matches_request(
        &self,
        kind: TransactionType,
        source: Option<&AccountId>,
        destination: Option<&AccountId>,
        amount: Decimal,
    ) -> bool {
        self.kind == kind
            && self.source.as_ref() == source
            && self.destination.as_ref() == destination
            && self.amount == amount
    }

    /// Net change this transaction made to total money in the ledger.
    /// Deposits add, withdrawals remove, transfers are neutral.
    pub fn net_issuance(&self) -> Decimal {
        if !self.moved_funds() {
            return Decimal::ZERO;
        }
        match self.kind {
            TransactionType::Deposit => self.amount,
            TransactionType::Withdrawal => -self.amount,
            TransactionType::Transfer => Decimal::ZERO,
        }
    }
}
