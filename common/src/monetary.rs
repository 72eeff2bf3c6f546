//! Monetary helpers.
//!
//! Amounts are `rust_decimal::Decimal` values restricted to two decimal
//! places. Integer minor units (cents, paisa) convert losslessly in both
//! directions.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Number of decimal places in one minor unit.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Check that an amount has no more precision than one minor unit.
pub fn has_minor_unit_precision(amount: Decimal) -> bool {
    amount.normalize().scale() <= MINOR_UNIT_SCALE
}

/// Check that an amount can be moved by a ledger operation.
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO && has_minor_unit_precision(amount)
}

/// Build an amount from integer minor units.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Convert an amount to integer minor units.
///
/// Returns `None` if the amount carries sub-minor-unit precision or does not
/// fit in an `i64`.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    if !has_minor_unit_precision(amount) {
        return None;
    }
    amount.checked_mul(Decimal::ONE_HUNDRED)?.to_i64()
}

/// Render an amount with exactly two decimal places.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp(MINOR_UNIT_SCALE);
    rounded.rescale(MINOR_UNIT_SCALE);
    rounded.to_string()
}
