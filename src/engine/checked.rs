//! Overflow-checked arithmetic on request-derived amounts.
//!
//! Overflow is reported as [`LedgerError::InvalidAmount`] naming the quantity
//! being computed.

use crate::domain::Decimal;
use crate::error::LedgerError;

pub fn mul(what: &str, a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_mul(b).ok_or_else(|| out_of_range(what))
}

pub fn div(what: &str, a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_div(b).ok_or_else(|| out_of_range(what))
}

pub fn add(what: &str, a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_add(b).ok_or_else(|| out_of_range(what))
}

pub fn sub(what: &str, a: Decimal, b: Decimal) -> Result<Decimal, LedgerError> {
    a.checked_sub(b).ok_or_else(|| out_of_range(what))
}

/// Sum that fails instead of overflowing.
pub fn sum(what: &str, values: impl IntoIterator<Item = Decimal>) -> Result<Decimal, LedgerError> {
    values
        .into_iter()
        .try_fold(Decimal::zero(), |acc, v| add(what, acc, v))
}

fn out_of_range(what: &str) -> LedgerError {
    LedgerError::InvalidAmount(format!("{} is out of range", what))
}
