use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

use bbx_arbitrage::bot::ArbitrageBot;
use bbx_arbitrage::config::{self, AppConfig, CredentialOverrides, Secrets, DEFAULT_CONFIG_PATH};
use bbx_arbitrage::market::algolia::{Colour, ListingQuery};
use bbx_arbitrage::market::http::RequestPolicy;
use bbx_arbitrage::market::scanner::Scanner;
use bbx_arbitrage::market::variants::{PayloadTemplate, VariantClient};
use bbx_arbitrage::monitoring::alerts::{DryRunNotifier, Notifier, SlackNotifier};
use bbx_arbitrage::monitoring::logger;
use bbx_arbitrage::notification::state::format_timestamp;
use bbx_arbitrage::notification::store::{select_location, StateLocation, StateStore};
use bbx_arbitrage::valuation::filters::BargainFilter;

#[derive(Parser)]
#[command(name = "bbx-arbitrage", version, about = "BBX wine arbitrage scanner and notifier")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CredentialArgs {
    #[arg(long, global = true)]
    algolia_app_id: Option<String>,
    #[arg(long, global = true)]
    algolia_api_key: Option<String>,
    #[arg(long, global = true)]
    slack_webhook: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan, deduplicate, notify, and persist state once.
    Run {
        /// Print the message instead of posting it.
        #[arg(long)]
        dry_run: bool,
        /// Override the state file location.
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Query listings and print priced bargains as JSON lines.
    Listings(ListingsArgs),
    /// Print the raw variant response for one product.
    Variants {
        sku: String,
        product_path: String,
        #[arg(long, short)]
        payload: Option<PathBuf>,
    },
    /// Show the stored notification history.
    State {
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ListingsArgs {
    /// `new_to_bbx` window in days; omit for all listings.
    #[arg(long)]
    days: Option<u32>,
    #[arg(long, default_value = "Any")]
    colour: Colour,
    #[arg(long = "price-band")]
    price_bands: Vec<String>,
    /// Only lots sold by the bottle.
    #[arg(long)]
    bottle: bool,
    #[arg(long, default_value = "0")]
    min_pct_market: Decimal,
    #[arg(long, default_value = "0")]
    min_pct_last: Decimal,
    #[arg(long, default_value = "100000")]
    max_price: Decimal,
    /// Exact case format, e.g. "6 x 75 cl".
    #[arg(long)]
    case_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    logger::init_logging(&config.monitoring)?;

    let overrides = CredentialOverrides {
        algolia_app_id: cli.credentials.algolia_app_id,
        algolia_api_key: cli.credentials.algolia_api_key,
        slack_webhook: cli.credentials.slack_webhook,
    };

    match cli.command {
        Command::Run { dry_run, state } => {
            let secrets = Secrets::resolve(overrides, &config.credentials.secrets_file);
            run(&config, &secrets, dry_run, state).await
        }
        Command::Listings(args) => {
            let secrets = Secrets::resolve(overrides, &config.credentials.secrets_file);
            listings(&config, &secrets, args).await
        }
        Command::Variants {
            sku,
            product_path,
            payload,
        } => variants(&config, &sku, &product_path, payload.as_deref()).await,
        Command::State { state } => show_state(state_location(&config, state)).await,
    }
}

async fn run(config: &AppConfig, secrets: &Secrets, dry_run: bool, state: Option<PathBuf>) -> Result<()> {
    let dry_run = dry_run || config.notification.dry_run;
    let store = StateStore::open(state_location(config, state)).await;

    tracing::info!(
        dry_run,
        state = %store.location(),
        window = %config.lookback_label(),
        "BBX arbitrage starting"
    );

    let scanner = Scanner::new(config, secrets)?;
    let notifier: Box<dyn Notifier> = if dry_run {
        Box::new(DryRunNotifier)
    } else {
        Box::new(SlackNotifier::new(secrets.slack_webhook()))
    };

    let bot = ArbitrageBot::new(config, Box::new(scanner), notifier, store);
    let summary = bot.run_once(Utc::now()).await;

    tracing::info!(
        scan_succeeded = summary.scan_succeeded,
        candidates = summary.candidates,
        notified = summary.notified,
        suppressed = summary.suppressed,
        delivered = summary.message_delivered,
        state_saved = summary.state_saved,
        "Run summary"
    );
    Ok(())
}

async fn listings(config: &AppConfig, secrets: &Secrets, args: ListingsArgs) -> Result<()> {
    let scanner = Scanner::new(config, secrets)?;

    let query = ListingQuery {
        days_label: args.days.map(config::lookback_label),
        colour: args.colour,
        price_bands: args.price_bands,
        bottle_only: args.bottle,
    };
    let found = scanner
        .algolia()
        .fetch_listings(&query)
        .await
        .context("Failed to fetch listings")?;

    let filter = BargainFilter {
        min_pct_market: args.min_pct_market,
        min_pct_last: args.min_pct_last,
        max_price_per_case: args.max_price,
        case_format: args.case_format,
    };
    let enriched = filter.apply(scanner.enrich(found).await);

    for item in &enriched {
        println!("{}", serde_json::to_string(item)?);
    }
    tracing::info!(count = enriched.len(), "Listings printed");
    Ok(())
}

async fn variants(config: &AppConfig, sku: &str, product_path: &str, payload: Option<&Path>) -> Result<()> {
    let template = PayloadTemplate::load(payload.unwrap_or(config.endpoints.payload_path.as_path()))?;
    let client = VariantClient::new(config, template, RequestPolicy::new(&config.rate_limit))?;

    let response = client
        .fetch_variants(sku, product_path)
        .await
        .with_context(|| format!("Failed to fetch variants for {sku}"))?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// S3 when `S3_BUCKET` and `S3_STATE_KEY` are set, else the `--state` path
/// or the configured file.
fn state_location(config: &AppConfig, state: Option<PathBuf>) -> StateLocation {
    let path = state.unwrap_or_else(|| config.state.path.clone());
    select_location(|name| std::env::var(name).ok(), &path)
}

async fn show_state(location: StateLocation) -> Result<()> {
    let store = StateStore::open(location).await;
    let state = store.load().await;
    if state.is_empty() {
        println!("No notification history at {}", store.location());
        return Ok(());
    }

    println!(
        "{:<16} {:>12} {:<22} {:<22} {:>5}",
        "SKU", "LAST ASK", "FIRST NOTIFIED", "LAST NOTIFIED", "COUNT"
    );
    let show = |ts: Option<&chrono::DateTime<Utc>>| ts.map_or_else(|| "-".to_string(), format_timestamp);
    for (sku, record) in &state {
        println!(
            "{:<16} {:>12} {:<22} {:<22} {:>5}",
            sku,
            record
                .ask_last_notified
                .map_or_else(|| "-".to_string(), |a| a.to_string()),
            show(record.first_notified_at.as_ref()),
            show(record.last_notified_at.as_ref()),
            record.notification_count,
        );
    }
    Ok(())
}
