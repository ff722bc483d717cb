//! Batch pricing lookups against the biddable-stock REST endpoint.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::AppConfig;
use crate::error::FetchError;
use crate::market::http::{self, RequestPolicy, ACCEPT_JSON};
use crate::market::models::PricingRecord;

const ENDPOINT: &str = "pricing";
const PRICING_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct StockRequest<'a> {
    account_id: &'a str,
    product_codes: String,
    is_biddable: bool,
}

pub struct PricingClient {
    http: reqwest::Client,
    policy: RequestPolicy,
    url: String,
    referer: String,
    batch_size: usize,
}

impl PricingClient {
    pub fn new(config: &AppConfig, policy: RequestPolicy) -> Result<Self, FetchError> {
        Ok(Self {
            http: http::build_client(ENDPOINT, PRICING_TIMEOUT)?,
            policy,
            url: config.endpoints.pricing_url.clone(),
            referer: format!(
                "{}/bbx-listings",
                config.endpoints.site_base_url.trim_end_matches('/')
            ),
            batch_size: config.scan.pricing_batch_size.max(1),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Price one batch of SKUs. SKUs absent from the response, or with an
    /// empty entry list, are absent from the result.
    #[instrument(skip(self, skus), fields(skus = skus.len()))]
    pub async fn fetch_batch(&self, skus: &[String]) -> Result<HashMap<String, PricingRecord>, FetchError> {
        if skus.is_empty() {
            return Ok(HashMap::new());
        }

        let body = [StockRequest {
            account_id: "",
            product_codes: skus.join(","),
            is_biddable: true,
        }];
        let body = &body;

        let data: Value = self
            .policy
            .run(ENDPOINT, || async move {
                let response = self
                    .http
                    .post(&self.url)
                    .header(reqwest::header::ACCEPT, ACCEPT_JSON)
                    .header(reqwest::header::REFERER, &self.referer)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| http::network_error(ENDPOINT, e))?;
                http::read_json(ENDPOINT, response).await
            })
            .await?;

        let Value::Object(mut entries) = data else {
            return Err(FetchError::Parse {
                endpoint: ENDPOINT,
                reason: "expected a JSON object keyed by SKU".to_string(),
            });
        };

        let mut priced = HashMap::new();
        for sku in skus {
            let first = match entries.remove(sku) {
                Some(Value::Array(list)) => list.into_iter().next(),
                _ => None,
            };
            let Some(first) = first else {
                debug!(sku = %sku, "No pricing entry");
                continue;
            };
            match serde_json::from_value::<PricingRecord>(first) {
                Ok(record) => {
                    priced.insert(sku.clone(), record);
                }
                Err(e) => warn!(sku = %sku, error = %e, "Skipping unreadable pricing entry"),
            }
        }

        Ok(priced)
    }

    /// Price every SKU in batches. A failed batch is logged and skipped.
    pub async fn fetch_all(&self, skus: &[String]) -> HashMap<String, PricingRecord> {
        let mut priced = HashMap::new();
        for (index, batch) in skus.chunks(self.batch_size).enumerate() {
            match self.fetch_batch(batch).await {
                Ok(records) => priced.extend(records),
                Err(e) => warn!(batch = index, size = batch.len(), error = %e, "Pricing batch failed"),
            }
        }
        priced
    }
}
