//! Monetary helpers
//!
//! Amounts are `rust_decimal::Decimal` everywhere; conversion to integer
//! minor units happens only at the payment-gateway boundary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Convert a major-unit amount to rounded minor units (e.g. rupees to paise).
/// Returns `None` if the amount does not fit in an `i64`.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED).round().to_i64()
}

/// Round to two decimal places, the precision all stored amounts carry.
pub fn round(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_units_rounds_half_up() {
        assert_eq!(to_minor_units(Decimal::new(10995, 3)), Some(1100)); // 10.995
        assert_eq!(to_minor_units(Decimal::new(2500, 2)), Some(2500)); // 25.00
    }

    #[test]
    fn test_minor_units_overflow() {
        assert_eq!(to_minor_units(Decimal::MAX), None);
    }
}
