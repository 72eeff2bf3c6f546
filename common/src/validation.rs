//! Input validation for the request layer.
//!
//! These checks run before anything reaches the ledger engine and report
//! `ValidationError`, which is deliberately a different type from
//! `LedgerError`.

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::monetary::{from_minor_units, has_minor_unit_precision};
use crate::{AccountId, IdempotencyKey, TransactionId};

/// Maximum accepted account identifier length.
pub const MAX_ACCOUNT_ID_LEN: usize = 64;

/// A request field failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    /// Field that caused the rejection.
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "field is required")
    }
}

/// Parse a decimal amount string: positive, at most two decimal places.
pub fn validate_amount(field: &str, raw: &str) -> Result<Decimal, ValidationError> {
    let amount = Decimal::from_str(raw.trim())
        .map_err(|_| ValidationError::new(field, format!("'{raw}' is not a decimal number")))?;
    check_amount(field, amount)
}

/// Convert an amount given in minor units.
pub fn validate_minor_units(field: &str, minor: i64) -> Result<Decimal, ValidationError> {
    check_amount(field, from_minor_units(minor))
}

fn check_amount(field: &str, amount: Decimal) -> Result<Decimal, ValidationError> {
    if amount <= Decimal::ZERO {
        return Err(ValidationError::new(field, "amount must be positive"));
    }
    if !has_minor_unit_precision(amount) {
        return Err(ValidationError::new(
            field,
            "amount must have at most two decimal places",
        ));
    }
    Ok(amount.normalize())
}

/// Validate an account identifier: non-empty, alphanumeric with `-`/`_`.
pub fn validate_account_id(field: &str, raw: &str) -> Result<AccountId, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::missing(field));
    }
    if raw.len() > MAX_ACCOUNT_ID_LEN
        || !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::new(field, "malformed account identifier"));
    }
    Ok(AccountId::new(raw))
}

/// Validate a transaction identifier (UUID text).
pub fn validate_transaction_id(field: &str, raw: &str) -> Result<TransactionId, ValidationError> {
    TransactionId::parse(raw.trim())
        .map_err(|_| ValidationError::new(field, "malformed transaction identifier"))
}

/// Normalize a free-text reference. Blank references become `None`.
pub fn validate_reference(
    raw: Option<&str>,
    max_len: usize,
) -> Result<Option<String>, ValidationError> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if raw.chars().count() > max_len {
        return Err(ValidationError::new(
            "reference",
            format!("must be at most {max_len} characters"),
        ));
    }
    if raw.chars().any(char::is_control) {
        return Err(ValidationError::new("reference", "contains control characters"));
    }
    Ok(Some(raw.to_string()))
}

/// Validate an optional client-supplied idempotency key.
pub fn validate_idempotency_key(
    raw: Option<&str>,
) -> Result<Option<IdempotencyKey>, ValidationError> {
    match raw {
        None => Ok(None),
        Some(raw) => {
            let key = IdempotencyKey::new(raw);
            if key.is_valid() {
                Ok(Some(key))
            } else {
                Err(ValidationError::new(
                    "idempotency_key",
                    "must be 1-128 characters of [A-Za-z0-9_:.-]",
                ))
            }
        }
    }
}
