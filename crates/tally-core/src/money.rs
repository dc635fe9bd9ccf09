//! Credit amounts.
//!
//! Credits are decimal dollar-equivalents. Amounts are kept at most
//! [`CREDIT_SCALE`] decimal places; anything finer is rounded away from zero so
//! metered usage is never under-charged.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept for credit amounts.
pub const CREDIT_SCALE: u32 = 6;

/// Round a computed amount to the ledger's precision.
#[must_use]
pub fn round_credits(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(CREDIT_SCALE, RoundingStrategy::AwayFromZero)
        .normalize()
}

/// Format an amount for human-readable entry descriptions (`$9.98`).
#[must_use]
pub fn format_credits(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    if rounded.is_sign_negative() {
        format!("-${:.2}", rounded.abs())
    } else {
        format!("${rounded:.2}")
    }
}
