use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub thresholds: ThresholdConfig,
    pub notification: NotificationConfig,
    pub state: StateConfig,
    pub endpoints: EndpointConfig,
    pub rate_limit: RateLimitConfig,
    pub monitoring: MonitoringConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Window for the `new_to_bbx` facet, in days.
    pub lookback_days: u32,
    /// Asks at or below this are treated as placeholder listings.
    pub min_case_price: Decimal,
    pub hits_per_page: u32,
    pub max_pages: u32,
    pub pricing_batch_size: usize,
    pub page_delay_min_ms: u64,
    pub page_delay_max_ms: u64,
}

/// Minimum discounts (percent) a listing must clear to become a candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    pub min_pct_market: Decimal,
    pub min_pct_last: Decimal,
    pub min_pct_next: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Days after which an unchanged ask is announced again.
    pub reminder_days: f64,
    pub max_per_alert: usize,
    pub send_empty_alerts: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub algolia_index: String,
    /// Overrides `https://{app_id}-dsn.algolia.net`; used for testing.
    #[serde(default)]
    pub algolia_base_url: Option<String>,
    pub pricing_url: String,
    pub graphql_url: String,
    pub site_base_url: String,
    pub payload_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// TOML secrets store consulted after the environment.
    pub secrets_file: PathBuf,
}

impl AppConfig {
    /// Load configuration from a TOML file after loading `.env` into the environment.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// The `new_to_bbx` facet label for the configured lookback.
    pub fn lookback_label(&self) -> String {
        lookback_label(self.scan.lookback_days)
    }
}

pub fn lookback_label(days: u32) -> String {
    if days == 1 {
        "1 Day".to_string()
    } else {
        format!("{days} Days")
    }
}

/// Credentials given on the command line; they take precedence over everything else.
#[derive(Debug, Default)]
pub struct CredentialOverrides {
    pub algolia_app_id: Option<String>,
    pub algolia_api_key: Option<String>,
    pub slack_webhook: Option<String>,
}

/// Secrets resolved from arguments, the environment, or the secrets file.
/// Never read from the main config file.
#[derive(Debug)]
pub struct Secrets {
    pub algolia_app_id: Option<String>,
    pub algolia_api_key: Option<SecretString>,
    pub slack_webhook: Option<SecretString>,
}

/// Algolia application credentials, both required.
#[derive(Debug)]
pub struct AlgoliaCredentials {
    pub app_id: String,
    pub api_key: SecretString,
}

impl Secrets {
    pub fn resolve(overrides: CredentialOverrides, secrets_file: &Path) -> Self {
        let table = read_secrets_file(secrets_file);
        Self::resolve_with(overrides, |name| std::env::var(name).ok(), &table)
    }

    pub fn resolve_with(
        overrides: CredentialOverrides,
        env: impl Fn(&str) -> Option<String>,
        secrets: &toml::Table,
    ) -> Self {
        let app_id = resolve_credential("ALGOLIA_APP_ID", overrides.algolia_app_id, &env, secrets);
        let api_key =
            resolve_credential("ALGOLIA_API_KEY", overrides.algolia_api_key, &env, secrets);
        let webhook = resolve_credential("SLACK_WEBHOOK", overrides.slack_webhook, &env, secrets);

        debug!(
            algolia_app_id_len = app_id.as_ref().map_or(0, String::len),
            algolia_api_key_len = api_key.as_ref().map_or(0, String::len),
            slack_webhook = webhook.is_some(),
            "Credentials resolved"
        );

        Self {
            algolia_app_id: app_id,
            algolia_api_key: api_key.map(SecretString::from),
            slack_webhook: webhook.map(SecretString::from),
        }
    }

    /// A fresh handle on the webhook URL, if one was resolved.
    pub fn slack_webhook(&self) -> Option<SecretString> {
        self.slack_webhook
            .as_ref()
            .map(|url| SecretString::from(url.expose_secret()))
    }

    /// Both Algolia values, or the first one missing.
    pub fn algolia(&self) -> Result<AlgoliaCredentials, ConfigError> {
        let app_id = self
            .algolia_app_id
            .clone()
            .ok_or(ConfigError::MissingCredential {
                name: "ALGOLIA_APP_ID",
            })?;
        let api_key = self
            .algolia_api_key
            .as_ref()
            .map(|key| SecretString::from(key.expose_secret()))
            .ok_or(ConfigError::MissingCredential {
                name: "ALGOLIA_API_KEY",
            })?;
        Ok(AlgoliaCredentials { app_id, api_key })
    }
}

/// Resolve one credential: explicit value, then environment, then secrets table.
/// Empty strings count as absent.
pub fn resolve_credential(
    name: &str,
    explicit: Option<String>,
    env: impl Fn(&str) -> Option<String>,
    secrets: &toml::Table,
) -> Option<String> {
    let non_empty = |value: String| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };

    explicit
        .and_then(non_empty)
        .or_else(|| env(name).and_then(non_empty))
        .or_else(|| {
            secrets
                .get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .and_then(non_empty)
        })
}

/// A missing secrets file is normal; an unreadable one is logged and ignored.
pub fn read_secrets_file(path: &Path) -> toml::Table {
    if !path.exists() {
        return toml::Table::new();
    }

    let parsed = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })
        .and_then(|contents| {
            contents
                .parse::<toml::Table>()
                .map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })
        });

    match parsed {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable secrets file");
            toml::Table::new()
        }
    }
}
