//! Discount metrics against the three reference prices.
//!
//! A listing is measured against the market price, the last BBX transaction,
//! and the next-lowest competing listing for the same wine.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::market::models::{Listing, PricingRecord};

const HUNDRED: Decimal = dec!(100);

/// Pricing and discount metrics for one listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discounts {
    pub ask: Decimal,
    pub market_price: Decimal,
    pub last_transaction: Option<Decimal>,
    pub pct_market: Decimal,
    pub pct_last: Option<Decimal>,
    pub next_lowest: Option<Decimal>,
    pub pct_next: Option<Decimal>,
}

/// Percentage by which `ask` undercuts `reference`, to one decimal place.
/// Negative when the ask is above the reference; `None` when the reference
/// is not positive or the result does not fit in a `Decimal`.
pub fn pct_discount(reference: Decimal, ask: Decimal) -> Option<Decimal> {
    if reference <= Decimal::ZERO {
        return None;
    }
    let pct = reference
        .checked_sub(ask)?
        .checked_div(reference)?
        .checked_mul(HUNDRED)?;
    Some(pct.round_dp_with_strategy(1, RoundingStrategy::MidpointNearestEven))
}

/// Cheapest competing price strictly above the ask.
pub fn next_lowest_price(ask: Decimal, variant_prices: &[Decimal]) -> Option<Decimal> {
    variant_prices.iter().copied().filter(|p| *p > ask).min()
}

/// Compute all three discounts, or `None` when ask or market price is unusable.
pub fn compute_discounts(pricing: &PricingRecord, variant_prices: &[Decimal]) -> Option<Discounts> {
    let ask = pricing.least_listing_price?;
    let market_price = pricing.market_price?;
    if ask <= Decimal::ZERO || market_price <= Decimal::ZERO {
        return None;
    }

    let pct_market = pct_discount(market_price, ask)?;
    let pct_last = pricing
        .last_bbx_transaction
        .and_then(|last| pct_discount(last, ask));
    let next_lowest = next_lowest_price(ask, variant_prices);
    let pct_next = next_lowest.and_then(|next| pct_discount(next, ask));

    Some(Discounts {
        ask,
        market_price,
        last_transaction: pricing.last_bbx_transaction,
        pct_market,
        pct_last,
        next_lowest,
        pct_next,
    })
}

/// Compact case format for alert lines, e.g. `6x75cl`.
pub fn derive_case_format(listing: &Listing) -> String {
    if let (Some(size), Some(volume)) = (&listing.case_size, &listing.bottle_volume) {
        return format!("{size}x{volume}");
    }

    match listing.format.as_deref().map(str::trim) {
        Some(fmt) if !fmt.is_empty() => fmt.replace(" x ", "x").replace(' ', ""),
        _ => "N/A".to_string(),
    }
}

/// Human-readable form of the pricing endpoint's format code:
/// `12-00750` becomes `12 x 75 cl`.
pub fn pretty_case_format(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "Unknown format".to_string();
    };

    let mut parts = raw.split('-');
    let parsed = parts
        .next()
        .and_then(|qty| qty.trim().parse::<u32>().ok())
        .zip(parts.next().and_then(|ml| ml.trim().parse::<u32>().ok()));

    match parsed {
        Some((qty, ml)) => format!("{qty} x {} cl", ml / 10),
        None if raw.is_empty() => "Unknown format".to_string(),
        None => raw.to_string(),
    }
}
