use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ThresholdConfig;
use crate::market::models::{Listing, PricingRecord};
use crate::valuation::discount::Discounts;

/// Whether a scanned listing is worth announcing. Missing last-transaction or
/// next-lowest references do not disqualify.
pub fn passes_thresholds(d: &Discounts, thresholds: &ThresholdConfig) -> bool {
    d.pct_market >= thresholds.min_pct_market
        && d.pct_last.map_or(true, |pct| pct >= thresholds.min_pct_last)
        && d.pct_next.map_or(true, |pct| pct >= thresholds.min_pct_next)
}

/// A search hit joined with its pricing entry and derived metrics.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedListing {
    #[serde(flatten)]
    pub listing: Listing,
    pub pricing: PricingRecord,
    pub case_format: String,
    pub discounts: Option<Discounts>,
}

/// Bargain-hunting criteria for ad-hoc listing queries.
#[derive(Debug, Clone)]
pub struct BargainFilter {
    pub min_pct_market: Decimal,
    pub min_pct_last: Decimal,
    pub max_price_per_case: Decimal,
    /// Exact case format such as `6 x 75 cl`.
    pub case_format: Option<String>,
}

impl BargainFilter {
    pub fn matches(&self, item: &EnrichedListing) -> bool {
        let Some(d) = &item.discounts else {
            return false;
        };

        let last_ok = d.pct_last.is_some_and(|pct| pct >= self.min_pct_last);
        let format_ok = match &self.case_format {
            Some(wanted) => {
                &item.case_format == wanted || item.listing.format.as_ref() == Some(wanted)
            }
            None => true,
        };

        d.pct_market >= self.min_pct_market
            && last_ok
            && d.ask <= self.max_price_per_case
            && format_ok
    }

    /// Keep matching listings. When no listing carries discount data at all
    /// there is nothing to filter on and the input is returned unchanged.
    pub fn apply(&self, items: Vec<EnrichedListing>) -> Vec<EnrichedListing> {
        if items.is_empty() || items.iter().all(|i| i.discounts.is_none()) {
            return items;
        }
        items.into_iter().filter(|i| self.matches(i)).collect()
    }
}
