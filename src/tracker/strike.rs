//! ATM strike resolution

use rust_decimal::{Decimal, RoundingStrategy};

use crate::common::types::IndexName;

/// Nearest strike on the `interval` grid to `reference_price`.
///
/// Exact half-interval prices round to the even multiple (banker's
/// rounding), so 23525 at interval 50 resolves to 23500 and 23575 to 23600.
pub fn resolve_strike(reference_price: Decimal, interval: u32) -> Decimal {
    let interval = Decimal::from(interval.max(1));
    let steps = (reference_price / interval)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    (steps * interval).normalize()
}

/// Strike for `index` at the given spot price
pub fn resolve_index_strike(reference_price: Decimal, index: IndexName) -> Decimal {
    resolve_strike(reference_price, index.strike_interval())
}
