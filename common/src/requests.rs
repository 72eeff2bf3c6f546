//! Request payloads accepted by the request layer and the validated
//! commands they turn into.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::validation::{
    validate_account_id, validate_amount, validate_idempotency_key, validate_minor_units,
    validate_reference, validate_transaction_id, ValidationError,
};
use crate::{AccountId, IdempotencyKey, TransactionId};

/// Raw transaction creation request.
///
/// `type` is one of `deposit`, `withdrawal` or `transfer`. Exactly one of
/// `amount` (decimal string) and `amount_minor` (integer minor units) must
/// be present.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TransactionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub from_account: Option<String>,
    #[serde(default)]
    pub to_account: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub amount_minor: Option<i64>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Raw reversal request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReversalRequest {
    pub transaction_id: String,
}

/// Raw transaction history query.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HistoryQuery {
    pub account_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// A validated, balance-affecting ledger command.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    Deposit {
        account_id: AccountId,
        amount: Decimal,
        reference: Option<String>,
        idempotency_key: Option<IdempotencyKey>,
    },
    Withdraw {
        account_id: AccountId,
        amount: Decimal,
        reference: Option<String>,
        idempotency_key: Option<IdempotencyKey>,
    },
    Transfer {
        source: AccountId,
        destination: AccountId,
        amount: Decimal,
        reference: Option<String>,
        idempotency_key: Option<IdempotencyKey>,
    },
    Reverse {
        transaction_id: TransactionId,
    },
}

/// A validated history query with the page size already clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedHistoryQuery {
    pub account_id: AccountId,
    pub limit: usize,
    pub offset: usize,
}

impl TransactionRequest {
    /// Validate the request and build the ledger command it describes.
    pub fn validate(&self, max_reference_len: usize) -> Result<LedgerCommand, ValidationError> {
        let amount = self.parse_amount()?;
        let reference = validate_reference(self.reference.as_deref(), max_reference_len)?;
        let idempotency_key = validate_idempotency_key(self.idempotency_key.as_deref())?;

        match self.kind.trim() {
            "deposit" => Ok(LedgerCommand::Deposit {
                account_id: required_account(&self.to_account, "to_account")?,
                amount,
                reference,
                idempotency_key,
            }),
            "withdrawal" | "withdraw" => Ok(LedgerCommand::Withdraw {
                account_id: required_account(&self.from_account, "from_account")?,
                amount,
                reference,
                idempotency_key,
            }),
            "transfer" => Ok(LedgerCommand::Transfer {
                source: required_account(&self.from_account, "from_account")?,
                destination: required_account(&self.to_account, "to_account")?,
                amount,
                reference,
                idempotency_key,
            }),
            "" => Err(ValidationError::missing("type")),
            other => Err(ValidationError::new(
                "type",
                format!("unsupported transaction type '{other}'"),
            )),
        }
    }

    fn parse_amount(&self) -> Result<Decimal, ValidationError> {
        match (&self.amount, self.amount_minor) {
            (Some(raw), None) => validate_amount("amount", raw),
            (None, Some(minor)) => validate_minor_units("amount_minor", minor),
            (None, None) => Err(ValidationError::missing("amount")),
            (Some(_), Some(_)) => Err(ValidationError::new(
                "amount",
                "give either amount or amount_minor, not both",
            )),
        }
    }
}

impl ReversalRequest {
    pub fn validate(&self) -> Result<LedgerCommand, ValidationError> {
        Ok(LedgerCommand::Reverse {
            transaction_id: validate_transaction_id("transaction_id", &self.transaction_id)?,
        })
    }
}

impl HistoryQuery {
    /// Validate the query. A missing limit falls back to `default_limit`;
    /// larger limits are clamped to `max_limit`.
    pub fn validate(
        &self,
        default_limit: usize,
        max_limit: usize,
    ) -> Result<ValidatedHistoryQuery, ValidationError> {
        let account_id = validate_account_id("account_id", &self.account_id)?;
        let limit = match self.limit {
            Some(0) => return Err(ValidationError::new("limit", "must be at least 1")),
            Some(limit) => limit.min(max_limit),
            None => default_limit,
        };
        Ok(ValidatedHistoryQuery {
            account_id,
            limit,
            offset: self.offset.unwrap_or(0),
        })
    }
}

fn required_account(raw: &Option<String>, field: &str) -> Result<AccountId, ValidationError> {
    match raw {
        Some(raw) => validate_account_id(field, raw),
        None => Err(ValidationError::missing(field)),
    }
}
