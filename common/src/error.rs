//! Error types for ledger operations.

use crate::{AccountId, AccountStatus, IdempotencyKey, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Amount is not positive or has sub-minor-unit precision.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account exists but is not active.
    #[error("Account {account_id} is {status}")]
    AccountFrozen {
        account_id: AccountId,
        status: AccountStatus,
    },

    /// Transfer source and destination are the same account.
    #[error("Source and destination are the same account: {0}")]
    SameAccount(AccountId),

    /// Debit would drive the balance negative.
    #[error("Insufficient funds in {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: AccountId,
        required: Decimal,
        available: Decimal,
    },

    /// Transaction does not exist.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Transaction has already been reversed.
    #[error("Transaction already reversed: {0}")]
    AlreadyReversed(TransactionId),

    /// Lock acquisition timed out.
    #[error("Ledger busy, gave up waiting for locks after {waited_ms}ms")]
    Busy { waited_ms: u64 },

    /// Underlying persistence failed or rejected the unit of work.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Idempotency key was already used for a different request.
    #[error("Idempotency key reused with different parameters: {0}")]
    IdempotencyKeyReused(IdempotencyKey),

    /// Transaction cannot be reversed (failed or itself a compensation).
    #[error("Transaction {transaction_id} cannot be reversed: {reason}")]
    NotReversible {
        transaction_id: TransactionId,
        reason: String,
    },

    /// Account belongs to another user.
    #[error("Account {account_id} is not owned by user {user_id}")]
    NotAccountOwner {
        account_id: AccountId,
        user_id: UserId,
    },

    /// Account still holds funds and cannot be closed.
    #[error("Account {account_id} still holds {balance}")]
    AccountNotEmpty {
        account_id: AccountId,
        balance: Decimal,
    },

    /// Invalid account status transition.
    #[error("Invalid status transition for {account_id} from {from} to {to}")]
    InvalidStatusTransition {
        account_id: AccountId,
        from: AccountStatus,
        to: AccountStatus,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl LedgerError {
    /// Check if the caller may retry automatically with the same
    /// idempotency key.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::StorageFailure(_))
    }

    /// Get suggested retry delay in milliseconds.
    ///
    /// `Busy` is safe to retry but is left to the caller's judgement.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LedgerError::Busy { .. } => Some(50),
            LedgerError::StorageFailure(_) => Some(100),
            _ => None,
        }
    }

    /// Get the stable error code exposed to the request layer.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::AccountFrozen { .. } => "ACCOUNT_FROZEN",
            LedgerError::SameAccount(_) => "SAME_ACCOUNT",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::AlreadyReversed(_) => "ALREADY_REVERSED",
            LedgerError::Busy { .. } => "BUSY",
            LedgerError::StorageFailure(_) => "STORAGE_FAILURE",
            LedgerError::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            LedgerError::NotReversible { .. } => "NOT_REVERSIBLE",
            LedgerError::NotAccountOwner { .. } => "NOT_ACCOUNT_OWNER",
            LedgerError::AccountNotEmpty { .. } => "ACCOUNT_NOT_EMPTY",
            LedgerError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }

    /// The reason to record on a failed transaction, for rejections that
    /// happen against existing accounts.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            LedgerError::AccountFrozen { account_id, status } => {
                Some(FailureReason::AccountFrozen {
                    account_id: account_id.clone(),
                    status: *status,
                })
            }
            LedgerError::InsufficientFunds {
                account_id,
                required,
                available,
            } => Some(FailureReason::InsufficientFunds {
                account_id: account_id.clone(),
                required: *required,
                available: *available,
            }),
            _ => None,
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Why a persisted transaction ended up `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    AccountFrozen {
        account_id: AccountId,
        status: AccountStatus,
    },
    InsufficientFunds {
        account_id: AccountId,
        required: Decimal,
        available: Decimal,
    },
}

impl From<FailureReason> for LedgerError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::AccountFrozen { account_id, status } => {
                LedgerError::AccountFrozen { account_id, status }
            }
            FailureReason::InsufficientFunds {
                account_id,
                required,
                available,
            } => LedgerError::InsufficientFunds {
                account_id,
                required,
                available,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_only_storage_failure_is_retryable() {
        assert!(LedgerError::StorageFailure("down".into()).is_retryable());
        assert!(!LedgerError::Busy { waited_ms: 10 }.is_retryable());
        assert!(!LedgerError::InvalidAmount("zero".into()).is_retryable());
        assert_eq!(LedgerError::Busy { waited_ms: 10 }.retry_after_ms(), Some(50));
    }

    #[test]
    fn test_error_codes_are_distinct() {
        let account = AccountId::new("a");
        let tx = TransactionId::new();
        let errors = vec![
            LedgerError::InvalidAmount("x".into()),
            LedgerError::AccountNotFound(account.clone()),
            LedgerError::AccountFrozen {
                account_id: account.clone(),
                status: AccountStatus::Frozen,
            },
            LedgerError::SameAccount(account.clone()),
            LedgerError::InsufficientFunds {
                account_id: account.clone(),
                required: dec!(1),
                available: dec!(0),
            },
            LedgerError::TransactionNotFound(tx),
            LedgerError::AlreadyReversed(tx),
            LedgerError::Busy { waited_ms: 1 },
            LedgerError::StorageFailure("x".into()),
            LedgerError::IdempotencyKeyReused(IdempotencyKey::new("k")),
            LedgerError::NotReversible {
                transaction_id: tx,
                reason: "x".into(),
            },
            LedgerError::NotAccountOwner {
                account_id: account.clone(),
                user_id: UserId::new("u"),
            },
            LedgerError::AccountNotEmpty {
                account_id: account.clone(),
                balance: dec!(1),
            },
            LedgerError::InvalidStatusTransition {
                account_id: account,
                from: AccountStatus::Closed,
                to: AccountStatus::Active,
            },
            LedgerError::ConfigurationError("x".into()),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.error_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_failure_reason_roundtrip() {
        let err = LedgerError::InsufficientFunds {
            account_id: AccountId::new("a"),
            required: dec!(10.01),
            available: dec!(10),
        };
        let reason = err.failure_reason().unwrap();
        assert_eq!(LedgerError::from(reason), err);
        assert!(LedgerError::SameAccount(AccountId::new("a"))
            .failure_reason()
            .is_none());
    }
}
