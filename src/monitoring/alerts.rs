//! Chat alerts for scan results.
//!
//! Sends the run summary to a Slack incoming webhook. Delivery is
//! best-effort: failures are logged and reported as `false`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything that can deliver the run summary.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns whether the message was delivered.
    async fn send(&self, text: &str) -> bool;

    /// Whether every run should produce a message, even one with nothing new
    /// and empty alerts disabled.
    fn wants_every_message(&self) -> bool {
        false
    }
}

/// Slack incoming-webhook client.
pub struct SlackNotifier {
    webhook_url: Option<SecretString>,
    http: reqwest::Client,
}

/// Slack webhook message format.
#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<SecretString>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build webhook client, using defaults");
                reqwest::Client::new()
            });
        Self { webhook_url, http }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, text: &str) -> bool {
        let Some(url) = &self.webhook_url else {
            warn!("SLACK_WEBHOOK not configured, skipping alert");
            return false;
        };

        match self
            .http
            .post(url.expose_secret())
            .json(&SlackMessage { text })
            .send()
            .await
        {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                info!(chars = text.len(), "Slack alert sent");
                true
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "Slack webhook returned non-200 status");
                false
            }
            Err(e) => {
                // reqwest errors can embed the URL, which is the secret here.
                warn!(error = %e.without_url(), "Failed to send Slack alert");
                false
            }
        }
    }
}

/// Prints the message instead of posting it.
#[derive(Debug, Default)]
pub struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn send(&self, text: &str) -> bool {
        println!("{text}");
        true
    }

    fn wants_every_message(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier_for(server: &MockServer) -> SlackNotifier {
        SlackNotifier::new(Some(SecretString::from(format!("{}/hook", server.uri()))))
    }

    #[test]
    fn test_notifier_disabled_without_url() {
        assert!(!SlackNotifier::new(None).is_enabled());
    }

    #[tokio::test]
    async fn test_send_without_webhook_is_false() {
        assert!(!SlackNotifier::new(None).send("hello").await);
    }

    #[tokio::test]
    async fn test_send_posts_text_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(serde_json::json!({"text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        assert!(notifier_for(&server).send("hello").await);
    }

    #[tokio::test]
    async fn test_only_200_counts_as_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert!(!notifier_for(&server).send("hello").await);
    }

    #[tokio::test]
    async fn test_server_error_is_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("invalid_payload"))
            .mount(&server)
            .await;

        assert!(!notifier_for(&server).send("hello").await);
    }

    #[tokio::test]
    async fn test_dry_run_always_delivers() {
        assert!(DryRunNotifier.send("hello").await);
    }
}
