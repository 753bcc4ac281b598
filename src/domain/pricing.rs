//! Pure price arithmetic. Everything here is integer minor-currency-unit
//! math with no I/O, shared by the preview and commit paths so the two can
//! never disagree on a number.

use crate::domain::DiscountKind;

/// A discounted price. Invariants: `final_cents >= 0`,
/// `discount_cents <= original`, and `final_cents + discount_cents` equals
/// the original price exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub final_cents: i64,
    pub discount_cents: i64,
}

/// Applies a discount to a base price. Percentage discounts round half-up
/// to the nearest minor unit; fixed discounts clamp to the price so the
/// result never goes negative. The discount is recomputed from the final
/// price afterwards, so displayed discount and displayed final price always
/// reconcile exactly.
pub fn apply_discount(original_cents: i64, kind: DiscountKind, value: i64) -> Quote {
    let raw = match kind {
        DiscountKind::Percent => round_half_up_percent(original_cents, value),
        DiscountKind::Fixed => value,
    };
    let discount = raw.clamp(0, original_cents);
    let final_cents = original_cents - discount;
    Quote {
        final_cents,
        discount_cents: original_cents - final_cents,
    }
}

/// `amount * percent / 100`, rounded half-up. Both operands are expected to
/// be non-negative.
pub fn round_half_up_percent(amount: i64, percent: i64) -> i64 {
    (amount * percent + 50) / 100
}

/// Platform's cut of a gross amount, rounded half-up.
pub fn platform_fee(gross_cents: i64, fee_percent: i64) -> i64 {
    round_half_up_percent(gross_cents, fee_percent)
}
