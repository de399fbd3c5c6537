//! Money helpers.
//!
//! Amounts are decimal dollars inside the invoicing layer and integer
//! minor-units (cents) at the payment-processor boundary. Conversions round
//! half away from zero to the nearest cent.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round a dollar amount to the nearest cent.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a dollar amount to integer cents.
///
/// Returns `None` for non-positive amounts; the caller treats that as a
/// validation failure before anything reaches the payment processor.
pub fn to_minor_units(amount: Decimal) -> Option<u64> {
    if amount <= Decimal::ZERO {
        return None;
    }
    (round2(amount) * Decimal::from(100)).to_u64()
}

/// Convert integer cents back to a dollar amount.
pub fn from_minor_units(cents: u64) -> Decimal {
    Decimal::new(cents as i64, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round2(dec("137.505")), dec("137.51"));
        assert_eq!(round2(dec("137.504")), dec("137.50"));
        assert_eq!(round2(dec("137.5")), dec("137.5"));
    }

    #[test]
    fn cents_round_trip_preserves_value() {
        for raw in ["0.01", "0.99", "137.50", "362.50", "9999.99", "10000.00"] {
            let amount = dec(raw);
            let cents = to_minor_units(amount).unwrap();
            assert_eq!(from_minor_units(cents), amount, "round trip for {}", raw);
        }
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert_eq!(to_minor_units(Decimal::ZERO), None);
        assert_eq!(to_minor_units(dec("-5")), None);
    }

    #[test]
    fn converts_to_cents() {
        assert_eq!(to_minor_units(dec("275")).unwrap(), 27500);
        assert_eq!(to_minor_units(dec("137.50")).unwrap(), 13750);
    }
}
