//! Percentile-based value estimate from ranked comps
//! Pure function - no side effects

use crate::cma::types::{Comp, EstimatedValue};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

/// Read the 25th/50th/75th percentile prices out of the comps.
///
/// Percentiles are index-based (`floor(n * p)` into the ascending price
/// list), not interpolated. Comps without a sale or list price are ignored;
/// with no usable prices the estimate is all zero.
pub fn estimate_value(comps: &[Comp]) -> EstimatedValue {
    let mut prices: Vec<Decimal> = comps.iter().filter_map(Comp::usable_price).collect();

    if prices.is_empty() {
        debug!("No priced comps among {}, estimate is zero", comps.len());
        return EstimatedValue::default();
    }

    prices.sort();
    let n = prices.len();

    // floor(n * 0.25), floor(n * 0.5), floor(n * 0.75) in integer arithmetic
    let low = prices[n / 4];
    let mid = prices[n / 2];
    let high = prices[n * 3 / 4];

    EstimatedValue {
        low: round_price(low),
        mid: round_price(mid),
        high: round_price(high),
    }
}

/// Nearest whole unit, halves away from zero
fn round_price(price: Decimal) -> i64 {
    price
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}
