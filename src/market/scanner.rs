//! Listing discovery and discount screening.
//!
//! Pulls recent BBX listings from the search index, prices them, looks up
//! competing listings, and returns those that clear every discount
//! threshold as notification candidates.

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::config::{AppConfig, Secrets, ThresholdConfig};
use crate::market::algolia::{AlgoliaClient, ListingQuery};
use crate::market::http::RequestPolicy;
use crate::market::models::{CandidateOpportunity, Listing, ListingDetails};
use crate::market::pricing::PricingClient;
use crate::market::variants::{PayloadTemplate, VariantClient};
use crate::valuation::discount::{
    compute_discounts, derive_case_format, pretty_case_format, Discounts,
};
use crate::valuation::filters::{passes_thresholds, EnrichedListing};

/// Outcome of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub candidates: Vec<CandidateOpportunity>,
    /// Search hits returned by the index.
    pub listings: usize,
    /// SKUs with a pricing entry.
    pub priced: usize,
}

/// Anything that can produce notification candidates.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn scan(&self) -> Result<ScanReport>;
}

pub struct Scanner {
    algolia: AlgoliaClient,
    pricing: PricingClient,
    variants: VariantClient,
    thresholds: ThresholdConfig,
    min_case_price: Decimal,
    lookback_label: String,
    site_base_url: String,
}

impl Scanner {
    /// Build all three clients from configuration.
    pub fn new(config: &AppConfig, secrets: &Secrets) -> Result<Self> {
        let policy = RequestPolicy::new(&config.rate_limit);
        let credentials = secrets.algolia()?;
        let template = PayloadTemplate::load(&config.endpoints.payload_path)?;

        Ok(Self::from_parts(
            config,
            AlgoliaClient::new(config, credentials, policy.clone())
                .context("Failed to create search client")?,
            PricingClient::new(config, policy.clone()).context("Failed to create pricing client")?,
            VariantClient::new(config, template, policy).context("Failed to create variant client")?,
        ))
    }

    pub fn from_parts(
        config: &AppConfig,
        algolia: AlgoliaClient,
        pricing: PricingClient,
        variants: VariantClient,
    ) -> Self {
        Self {
            algolia,
            pricing,
            variants,
            thresholds: config.thresholds.clone(),
            min_case_price: config.scan.min_case_price,
            lookback_label: config.lookback_label(),
            site_base_url: config.endpoints.site_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn algolia(&self) -> &AlgoliaClient {
        &self.algolia
    }

    /// Join listings with their pricing entries and discounts against market
    /// and last transaction. Competing listings are not fetched.
    pub async fn enrich(&self, listings: Vec<Listing>) -> Vec<EnrichedListing> {
        let skus = unique_skus(listings.iter().filter_map(Listing::pricing_sku));
        let priced = self.pricing.fetch_all(&skus).await;

        listings
            .into_iter()
            .filter_map(|listing| {
                let pricing = priced.get(listing.pricing_sku()?)?.clone();
                let discounts = compute_discounts(&pricing, &[]);
                let case_format =
                    pretty_case_format(pricing.format.as_deref().or(listing.format.as_deref()));
                Some(EnrichedListing {
                    listing,
                    pricing,
                    case_format,
                    discounts,
                })
            })
            .collect()
    }

    fn candidate(&self, listing: &Listing, sku: &str, d: Discounts) -> CandidateOpportunity {
        CandidateOpportunity {
            sku: Some(sku.to_string()),
            ask: Some(d.ask),
            details: ListingDetails {
                name: listing.name.clone(),
                vintage: listing.vintage.clone(),
                region: listing.region.clone(),
                case_format: Some(derive_case_format(listing)),
                market_price: Some(d.market_price),
                last_transaction: d.last_transaction,
                pct_market: Some(d.pct_market),
                pct_last: d.pct_last,
                next_lowest: d.next_lowest,
                pct_next: d.pct_next,
                url: Some(format!("{}/{}", self.site_base_url, listing.path())),
            },
        }
    }
}

#[async_trait]
impl CandidateSource for Scanner {
    #[instrument(skip(self), fields(window = %self.lookback_label))]
    async fn scan(&self) -> Result<ScanReport> {
        let listings = self
            .algolia
            .fetch_listings(&ListingQuery::recent(self.lookback_label.clone()))
            .await
            .context("Failed to fetch listings")?;
        info!(count = listings.len(), "Listings discovered");

        let mut report = ScanReport {
            listings: listings.len(),
            ..ScanReport::default()
        };

        let with_sku: Vec<&Listing> = listings.iter().filter(|l| l.parent_sku.is_some()).collect();
        if with_sku.is_empty() {
            warn!("No listings had a parent_sku, nothing to process");
            return Ok(report);
        }

        let skus = unique_skus(with_sku.iter().filter_map(|l| l.parent_sku.as_deref()));
        let priced = self.pricing.fetch_all(&skus).await;
        report.priced = priced.len();
        if priced.is_empty() {
            warn!("No pricing results were obtained");
            return Ok(report);
        }

        for listing in with_sku {
            let Some(sku) = listing.parent_sku.as_deref() else {
                continue;
            };
            let Some(pricing) = priced.get(sku) else {
                continue;
            };
            let Some(ask) = pricing.least_listing_price else {
                continue;
            };
            if ask <= self.min_case_price {
                debug!(sku, %ask, "Ask below sanity floor");
                continue;
            }

            let variant_prices = match self.variants.fetch_prices(sku, &listing.path()).await {
                Ok(prices) => prices,
                Err(e) => {
                    warn!(sku, error = %e, "Variant lookup failed, skipping");
                    continue;
                }
            };

            let Some(discounts) = compute_discounts(pricing, &variant_prices) else {
                continue;
            };
            if !passes_thresholds(&discounts, &self.thresholds) {
                debug!(sku, pct_market = %discounts.pct_market, "Below discount thresholds");
                continue;
            }

            report.candidates.push(self.candidate(listing, sku, discounts));
        }

        info!(
            listings = report.listings,
            priced = report.priced,
            candidates = report.candidates.len(),
            "Scan complete"
        );
        Ok(report)
    }
}

/// SKUs in first-seen order, without repeats.
fn unique_skus<'a>(skus: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    skus.into_iter()
        .filter(|sku| seen.insert(*sku))
        .map(str::to_string)
        .collect()
}
