//! Client for the Algolia index behind the BBX listings page.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{AlgoliaCredentials, AppConfig};
use crate::error::FetchError;
use crate::market::http::{self, RequestPolicy};
use crate::market::models::Listing;

const ENDPOINT: &str = "algolia";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

const PRICE_FACET_FIELD: &str = "prices.price_per_case";
const BOTTLE_FACET_FIELD: &str = "purchase_options.bottle_order_unit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Colour {
    #[default]
    Any,
    Red,
    White,
    Rose,
}

impl Colour {
    pub const SPECIFIC: [Colour; 3] = [Colour::Red, Colour::White, Colour::Rose];

    /// Facet clause, `None` for [`Colour::Any`].
    pub fn facet(&self) -> Option<String> {
        match self {
            Colour::Any => None,
            other => Some(format!("colour:'{other}'")),
        }
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Colour::Any => "Any",
            Colour::Red => "Red",
            Colour::White => "White",
            Colour::Rose => "Rosé",
        })
    }
}

impl FromStr for Colour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "any" => Ok(Colour::Any),
            "red" => Ok(Colour::Red),
            "white" => Ok(Colour::White),
            "rosé" | "rose" => Ok(Colour::Rose),
            other => Err(format!("unknown colour '{other}' (expected Any, Red, White or Rosé)")),
        }
    }
}

/// What to ask the index for.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    /// `new_to_bbx` facet value, e.g. `1 Day`.
    pub days_label: Option<String>,
    pub colour: Colour,
    pub price_bands: Vec<String>,
    pub bottle_only: bool,
}

impl ListingQuery {
    pub fn recent(days_label: impl Into<String>) -> Self {
        Self {
            days_label: Some(days_label.into()),
            ..Self::default()
        }
    }

    /// Filter clauses shared by every colour.
    fn base_filters(&self) -> Vec<String> {
        let mut filters = vec!["stock_origin:'BBX'".to_string()];
        if let Some(label) = &self.days_label {
            filters.push(format!("new_to_bbx:'{label}'"));
        }
        if self.bottle_only {
            filters.push(format!("{BOTTLE_FACET_FIELD}:'Bottle'"));
        }
        if !self.price_bands.is_empty() {
            let parts: Vec<String> = self
                .price_bands
                .iter()
                .map(|band| format!("{PRICE_FACET_FIELD}:'{band}'"))
                .collect();
            filters.push(format!("({})", parts.join(" OR ")));
        }
        filters
    }

    /// One filter string per query to issue.
    pub fn filter_strings(&self) -> Vec<String> {
        let base = self.base_filters();
        let colours: Vec<Colour> = match self.colour {
            Colour::Any => Colour::SPECIFIC.to_vec(),
            specific => vec![specific],
        };
        colours
            .iter()
            .map(|colour| {
                let mut clauses = base.clone();
                clauses.extend(colour.facet());
                clauses.join(" AND ")
            })
            .collect()
    }
}

#[derive(Serialize)]
struct MultiQuery<'a> {
    requests: [IndexQuery<'a>; 1],
}

#[derive(Serialize)]
struct IndexQuery<'a> {
    #[serde(rename = "indexName")]
    index_name: &'a str,
    params: String,
}

#[derive(Deserialize)]
struct MultiQueryResponse {
    #[serde(default)]
    results: Vec<QueryResult>,
}

#[derive(Deserialize)]
struct QueryResult {
    #[serde(default)]
    hits: Vec<Value>,
}

pub struct AlgoliaClient {
    http: reqwest::Client,
    policy: RequestPolicy,
    url: String,
    credentials: AlgoliaCredentials,
    index: String,
    hits_per_page: u32,
    max_pages: u32,
    page_delay_ms: (u64, u64),
}

impl AlgoliaClient {
    pub fn new(
        config: &AppConfig,
        credentials: AlgoliaCredentials,
        policy: RequestPolicy,
    ) -> Result<Self, FetchError> {
        let base = config
            .endpoints
            .algolia_base_url
            .clone()
            .unwrap_or_else(|| format!("https://{}-dsn.algolia.net", credentials.app_id));
        let url = format!("{}/1/indexes/*/queries", base.trim_end_matches('/'));

        let (lo, hi) = (config.scan.page_delay_min_ms, config.scan.page_delay_max_ms);

        Ok(Self {
            http: http::build_client(ENDPOINT, SEARCH_TIMEOUT)?,
            policy,
            url,
            credentials,
            index: config.endpoints.algolia_index.clone(),
            hits_per_page: config.scan.hits_per_page,
            max_pages: config.scan.max_pages,
            page_delay_ms: (lo.min(hi), lo.max(hi)),
        })
    }

    /// All hits matching `query`. `Colour::Any` unions the per-colour results
    /// by `objectID`, keeping first-seen order.
    #[instrument(skip(self), fields(days = ?query.days_label, colour = %query.colour))]
    pub async fn fetch_listings(&self, query: &ListingQuery) -> Result<Vec<Listing>, FetchError> {
        let mut listings: Vec<Listing> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for filters in query.filter_strings() {
            for listing in self.fetch_all_pages(&filters).await? {
                match listing.object_id.clone() {
                    Some(id) => match positions.get(&id) {
                        Some(&pos) => listings[pos] = listing,
                        None => {
                            positions.insert(id, listings.len());
                            listings.push(listing);
                        }
                    },
                    None => listings.push(listing),
                }
            }
        }

        info!(count = listings.len(), "Fetched listings");
        Ok(listings)
    }

    async fn fetch_all_pages(&self, filters: &str) -> Result<Vec<Listing>, FetchError> {
        let mut records = Vec::new();

        for page in 0..self.max_pages {
            let hits = self.fetch_page(filters, page).await?;
            if hits.is_empty() {
                break;
            }

            debug!(page, hits = hits.len(), "Fetched search page");
            records.extend(hits.into_iter().filter_map(|hit| {
                serde_json::from_value::<Listing>(hit)
                    .map_err(|e| warn!(error = %e, "Skipping unreadable search hit"))
                    .ok()
            }));

            self.page_pause().await;
        }

        Ok(records)
    }

    async fn fetch_page(&self, filters: &str, page: u32) -> Result<Vec<Value>, FetchError> {
        let body = MultiQuery {
            requests: [IndexQuery {
                index_name: &self.index,
                params: format!(
                    "hitsPerPage={}&page={page}&filters={}",
                    self.hits_per_page,
                    urlencoding::encode(filters)
                ),
            }],
        };

        let body = &body;
        let response: MultiQueryResponse = self
            .policy
            .run(ENDPOINT, || async move {
                let response = self
                    .http
                    .post(&self.url)
                    .header("x-algolia-application-id", &self.credentials.app_id)
                    .header("x-algolia-api-key", self.credentials.api_key.expose_secret())
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| http::network_error(ENDPOINT, e))?;
                http::read_json(ENDPOINT, response).await
            })
            .await?;

        Ok(response
            .results
            .into_iter()
            .next()
            .map(|r| r.hits)
            .unwrap_or_default())
    }

    async fn page_pause(&self) {
        let (lo, hi) = self.page_delay_ms;
        if hi == 0 {
            return;
        }
        let ms = rand::thread_rng().gen_range(lo..=hi);
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}
