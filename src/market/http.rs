//! Shared request plumbing for the marketplace clients: rate limiting,
//! retries with capped exponential backoff, and response decoding.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::error::FetchError;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Browser-ish user agent; the BBR endpoints reject obvious scripts.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36";

pub const ACCEPT_JSON: &str = "application/json, text/plain, */*";

/// Rate limit and retry policy shared by all clients built from one config.
#[derive(Clone)]
pub struct RequestPolicy {
    limiter: Arc<Limiter>,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl RequestPolicy {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limiter: create_rate_limiter(config),
            max_retries: config.max_retries,
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
        }
    }

    /// Run `operation` under the rate limiter, retrying transient failures.
    pub async fn run<F, Fut, T>(&self, endpoint: &'static str, operation: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0u32;

        loop {
            self.limiter.until_ready().await;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;

                    if !e.is_retryable() || attempt > self.max_retries {
                        return Err(e);
                    }

                    let backoff_ms = self.backoff_ms(attempt);
                    warn!(
                        endpoint,
                        attempt,
                        backoff_ms,
                        error = %e,
                        "Retrying after transient failure"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    fn backoff_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.backoff_base_ms.saturating_mul(factor), self.backoff_max_ms)
    }
}

fn create_rate_limiter(config: &RateLimitConfig) -> Arc<Limiter> {
    let rps = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst_size).unwrap_or(rps);
    Arc::new(RateLimiter::direct(Quota::per_second(rps).allow_burst(burst)))
}

/// Build a client with a fixed per-request timeout.
pub fn build_client(endpoint: &'static str, timeout: Duration) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|source| FetchError::Network { endpoint, source })
}

/// Map a transport error, stripping the URL (it may carry query secrets).
pub fn network_error(endpoint: &'static str, source: reqwest::Error) -> FetchError {
    FetchError::Network {
        endpoint,
        source: source.without_url(),
    }
}

/// Fail with [`FetchError::Status`] unless the response is a 2xx.
pub async fn ensure_success(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        endpoint,
        status,
        body: truncate(&body, 500),
    })
}

/// Check the status, then decode the body as JSON.
pub async fn read_json<T: DeserializeOwned>(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<T, FetchError> {
    let response = ensure_success(endpoint, response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| network_error(endpoint, e))?;
    serde_json::from_slice(&bytes).map_err(|e| FetchError::Parse {
        endpoint,
        reason: e.to_string(),
    })
}

fn truncate(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RequestPolicy {
        RequestPolicy::new(&RateLimitConfig {
            requests_per_second: 100,
            burst_size: 100,
            backoff_base_ms: 1,
            backoff_max_ms: 4,
            max_retries,
        })
    }

    fn server_error() -> FetchError {
        FetchError::Status {
            endpoint: "test",
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = RequestPolicy::new(&RateLimitConfig {
            requests_per_second: 5,
            burst_size: 10,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            max_retries: 2,
        });
        assert_eq!(p.backoff_ms(1), 500);
        assert_eq!(p.backoff_ms(2), 1000);
        assert_eq!(p.backoff_ms(5), 8000);
        assert_eq!(p.backoff_ms(64), 8000);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy(2)
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(server_error())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(2)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy(5)
            .run("test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Parse {
                    endpoint: "test",
                    reason: "bad".to_string(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("Rosé wine", 4), "Rosé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
