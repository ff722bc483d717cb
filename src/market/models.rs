use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::market::de;

/// A search-index hit for a BBX lot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Listing {
    #[serde(rename = "objectID", default, deserialize_with = "de::opt_string")]
    pub object_id: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub parent_sku: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub vintage: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub colour: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub product_path: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub product_url: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub case_size: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub bottle_volume: Option<String>,
}

impl Listing {
    /// Site-relative product path without the leading slash.
    pub fn path(&self) -> String {
        self.product_path
            .as_deref()
            .or(self.product_url.as_deref())
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string()
    }

    /// The key pricing lookups are made under.
    pub fn pricing_sku(&self) -> Option<&str> {
        self.parent_sku.as_deref().or(self.sku.as_deref())
    }
}

/// One entry from the biddable-stock pricing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingRecord {
    #[serde(default, deserialize_with = "de::opt_string")]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub qty_available: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub highest_bid: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub least_listing_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub last_bbx_transaction: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub market_price: Option<Decimal>,
}

/// Descriptive payload carried alongside a candidate; never inspected by dedup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingDetails {
    #[serde(default, deserialize_with = "de::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub vintage: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub case_format: Option<String>,
    #[serde(rename = "mkt", default, deserialize_with = "de::opt_decimal")]
    pub market_price: Option<Decimal>,
    #[serde(rename = "last", default, deserialize_with = "de::opt_decimal")]
    pub last_transaction: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub pct_market: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub pct_last: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub next_lowest: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub pct_next: Option<Decimal>,
    #[serde(default, deserialize_with = "de::opt_string")]
    pub url: Option<String>,
}

/// A listing that cleared the discount thresholds and may be announced.
///
/// `sku` and `ask` are optional: a candidate without a usable key still has to
/// reach the notifier, it just cannot be tracked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateOpportunity {
    #[serde(default, deserialize_with = "de::opt_string")]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "opt_ask")]
    pub ask: Option<Decimal>,
    #[serde(flatten)]
    pub details: ListingDetails,
}

impl CandidateOpportunity {
    pub fn new(sku: impl Into<String>, ask: Decimal) -> Self {
        Self {
            sku: Some(sku.into()),
            ask: Some(ask),
            details: ListingDetails::default(),
        }
    }

    /// Build from an untyped record; malformed fields become `None`.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// The `(sku, ask)` pair dedup is keyed on, if both are usable.
    pub fn dedup_key(&self) -> Option<(&str, Decimal)> {
        let sku = self.sku.as_deref().filter(|s| !s.is_empty())?;
        let ask = self.ask.filter(|a| !a.is_sign_negative())?;
        Some((sku, ask))
    }
}

fn opt_ask<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let ask = de::opt_decimal(deserializer)?;
    Ok(ask.filter(|a| !a.is_sign_negative()))
}
