//! Competing listings for a product, via the site's GraphQL endpoint.
//!
//! The endpoint wants a browser session: the product page is fetched first to
//! seed cookies, and the `X-CSRF-Token` cookie is echoed back as a header.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::AppConfig;
use crate::error::FetchError;
use crate::market::de::decimal_from_value;
use crate::market::http::{self, RequestPolicy, ACCEPT_JSON, BROWSER_USER_AGENT};

const ENDPOINT: &str = "graphql";
const PAGE_ENDPOINT: &str = "product page";
const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(30);
const CSRF_COOKIE: &str = "X-CSRF-Token";

/// GraphQL request body with a placeholder SKU filter.
#[derive(Debug, Clone)]
pub struct PayloadTemplate {
    body: Value,
}

impl PayloadTemplate {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload template {}", path.display()))?;
        let body: Value = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse payload template {}", path.display()))?;
        Ok(Self { body })
    }

    pub fn from_value(body: Value) -> Self {
        Self { body }
    }

    /// The template with `[0].variables.filter.sku.eq` set to `sku`.
    pub fn for_sku(&self, sku: &str) -> Result<Value, FetchError> {
        let mut body = self.body.clone();
        let slot = body
            .pointer_mut("/0/variables/filter/sku")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| FetchError::Schema {
                what: "payload template",
                reason: "can't find [0].variables.filter.sku".to_string(),
            })?;
        slot.insert("eq".to_string(), Value::String(sku.to_string()));
        Ok(body)
    }
}

/// Per-case prices of every variant in a GraphQL response. Variants without
/// a readable price are skipped.
pub fn variant_prices(response: &Value) -> Vec<Decimal> {
    response
        .pointer("/data/products/items/0/variants")
        .and_then(Value::as_array)
        .map(|variants| {
            variants
                .iter()
                .filter_map(|v| v.pointer("/product/custom_prices/price_per_case/amount/value"))
                .filter_map(decimal_from_value)
                .collect()
        })
        .unwrap_or_default()
}

pub struct VariantClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    policy: RequestPolicy,
    graphql_url: String,
    site_base_url: String,
    template: PayloadTemplate,
}

impl VariantClient {
    pub fn new(
        config: &AppConfig,
        template: PayloadTemplate,
        policy: RequestPolicy,
    ) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .timeout(GRAPHQL_TIMEOUT)
            .user_agent(BROWSER_USER_AGENT)
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|source| FetchError::Network {
                endpoint: ENDPOINT,
                source,
            })?;

        Ok(Self {
            http,
            jar,
            policy,
            graphql_url: config.endpoints.graphql_url.clone(),
            site_base_url: config.endpoints.site_base_url.trim_end_matches('/').to_string(),
            template,
        })
    }

    /// Raw GraphQL response for `sku`, whose product page lives at `product_path`.
    #[instrument(skip(self))]
    pub async fn fetch_variants(&self, sku: &str, product_path: &str) -> Result<Value, FetchError> {
        let body = self.template.for_sku(sku)?;
        let page_url = format!("{}/{}", self.site_base_url, product_path.trim_start_matches('/'));

        self.seed_session(&page_url).await?;
        let csrf = self.csrf_token(&page_url).unwrap_or_default();
        if csrf.is_empty() {
            debug!("No CSRF cookie after visiting product page");
        }

        let headers = self.browser_headers(&page_url, &csrf);
        let body = &body;
        let headers = &headers;

        self.policy
            .run(ENDPOINT, || async move {
                let response = self
                    .http
                    .post(&self.graphql_url)
                    .headers(headers.clone())
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| http::network_error(ENDPOINT, e))?;
                http::read_json(ENDPOINT, response).await
            })
            .await
    }

    /// Competing per-case prices for `sku`.
    pub async fn fetch_prices(&self, sku: &str, product_path: &str) -> Result<Vec<Decimal>, FetchError> {
        let response = self.fetch_variants(sku, product_path).await?;
        Ok(variant_prices(&response))
    }

    async fn seed_session(&self, page_url: &str) -> Result<(), FetchError> {
        self.policy
            .run(PAGE_ENDPOINT, || async move {
                let response = self
                    .http
                    .get(page_url)
                    .send()
                    .await
                    .map_err(|e| http::network_error(PAGE_ENDPOINT, e))?;
                http::ensure_success(PAGE_ENDPOINT, response).await.map(|_| ())
            })
            .await
    }

    fn csrf_token(&self, page_url: &str) -> Option<String> {
        let url = reqwest::Url::parse(page_url).ok()?;
        let cookies = self.jar.cookies(&url)?;
        let cookies = cookies.to_str().ok()?;
        find_cookie(cookies, CSRF_COOKIE)
    }

    fn browser_headers(&self, page_url: &str, csrf: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let pairs: [(&'static str, &str); 13] = [
            ("accept", ACCEPT_JSON),
            ("accept-language", "en-GB,en;q=0.5"),
            ("content-type", "application/json"),
            ("origin", &self.site_base_url),
            ("referer", page_url),
            ("sec-ch-ua", "\"Chromium\";v=\"134\", \"Not:A-Brand\";v=\"24\", \"Brave\";v=\"134\""),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", "\"macOS\""),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
            ("sec-gpc", "1"),
            ("x-csrf-token", csrf),
        ];
        for (name, value) in pairs {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        headers
    }
}

/// Value of cookie `name` in a `Cookie` header string.
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
