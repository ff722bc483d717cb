//! End-to-end runs against mocked search, pricing, product, GraphQL and
//! webhook endpoints.

use std::path::Path;

use bbx_arbitrage::bot::ArbitrageBot;
use bbx_arbitrage::config::{AppConfig, CredentialOverrides, Secrets};
use bbx_arbitrage::error::FetchError;
use bbx_arbitrage::market::algolia::{AlgoliaClient, Colour, ListingQuery};
use bbx_arbitrage::market::http::RequestPolicy;
use bbx_arbitrage::market::pricing::PricingClient;
use bbx_arbitrage::market::scanner::{CandidateSource, Scanner};
use bbx_arbitrage::market::variants::{PayloadTemplate, VariantClient};
use bbx_arbitrage::monitoring::alerts::SlackNotifier;
use bbx_arbitrage::notification::store::StateStore;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAYLOAD: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config/variant_query.json");

fn config_for(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::from_toml_str(include_str!("../config/default.toml")).unwrap();
    let uri = server.uri();
    config.endpoints.algolia_base_url = Some(uri.clone());
    config.endpoints.pricing_url = format!("{uri}/pricing");
    config.endpoints.graphql_url = format!("{uri}/graphql");
    config.endpoints.site_base_url = uri;
    config.endpoints.payload_path = PAYLOAD.into();
    config.scan.page_delay_min_ms = 0;
    config.scan.page_delay_max_ms = 0;
    config.rate_limit.max_retries = 0;
    config
}

fn secrets_for(server: &MockServer) -> Secrets {
    Secrets::resolve_with(
        CredentialOverrides {
            algolia_app_id: Some("APP".to_string()),
            algolia_api_key: Some("KEY".to_string()),
            slack_webhook: Some(format!("{}/hook", server.uri())),
        },
        |_| None,
        &toml::Table::new(),
    )
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 23, 8, 10, 0).unwrap()
}

fn search_hits() -> Value {
    json!({"results": [{"hits": [
        {
            "objectID": "o-111",
            "parent_sku": "111",
            "name": "Chateau Test",
            "vintage": "2015",
            "region": "Bordeaux",
            "case_size": "6",
            "bottle_volume": "75cl",
            "product_path": "/products-111"
        },
        {
            "objectID": "o-222",
            "parent_sku": "222",
            "name": "Too Cheap To Be Real",
            "product_path": "products-222"
        },
        {
            "objectID": "o-333",
            "name": "No Parent",
            "sku": "333"
        }
    ]}]})
}

fn variant_response(values: &[u32]) -> Value {
    let variants: Vec<Value> = values
        .iter()
        .map(|v| json!({"product": {"custom_prices": {"price_per_case": {"amount": {"value": v, "currency": "GBP"}}}}}))
        .collect();
    json!({"data": {"products": {"items": [{"sku": "111", "variants": variants}]}}})
}

async fn mount_market(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .and(header("x-algolia-application-id", "APP"))
        .and(header("x-algolia-api-key", "KEY"))
        .and(body_string_contains("page=0&"))
        .and(body_string_contains("Red"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_hits()))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [{"hits": []}]})))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/pricing"))
        .and(body_string_contains("\"product_codes\":\"111,222\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "111": [
                {"format": "06-00750", "least_listing_price": 400, "market_price": 560, "last_bbx_transaction": 500},
                {"least_listing_price": 1, "market_price": 1}
            ],
            "222": [{"least_listing_price": "0.5", "market_price": 100}]
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/products-111"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "X-CSRF-Token=tok; Path=/")
                .set_body_string("<html></html>"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"eq\":\"111\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(variant_response(&[400, 520])))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(server)
        .await;
}

async fn slack_texts(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/hook")
        .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
        .filter_map(|v| v["text"].as_str().map(str::to_string))
        .collect()
}

// ──────────────────────────────────────────
// Full runs
// ──────────────────────────────────────────

#[tokio::test]
async fn scan_announces_bargain_then_suppresses_it() {
    let server = MockServer::start().await;
    mount_market(&server).await;

    let config = config_for(&server);
    let secrets = secrets_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("data/arbitrage_state.json");

    let bot = ArbitrageBot::new(
        &config,
        Box::new(Scanner::new(&config, &secrets).unwrap()),
        Box::new(SlackNotifier::new(secrets.slack_webhook())),
        StateStore::file(&state_path),
    );

    let first = bot.run_once(now()).await;
    assert!(first.scan_succeeded);
    assert_eq!(first.candidates, 1);
    assert_eq!(first.notified, 1);
    assert!(first.message_delivered);
    assert!(first.state_saved);

    let stored: Value = serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
    assert_eq!(
        stored,
        json!({"111": {
            "sku": "111",
            "ask_last_notified": 400.0,
            "first_notified_at": "2025-11-23T08:10:00Z",
            "last_notified_at": "2025-11-23T08:10:00Z",
            "notification_count": 1
        }})
    );

    let second = bot.run_once(now() + chrono::Duration::hours(1)).await;
    assert_eq!(second.notified, 0);
    assert_eq!(second.suppressed, 1);
    assert!(second.message_delivered);

    let texts = slack_texts(&server).await;
    assert_eq!(texts.len(), 2);

    let lines: Vec<&str> = texts[0].lines().collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], "BBX arbitrage scan - 1 candidates (mkt>=15%, last>=15%, next>=15%)");
    assert!(lines[1].starts_with("1. Chateau Test (2015, Bordeaux, 6x75cl) - £400 ask | £560 mkt (28.6%)"));
    assert!(lines[1].contains("| last 20"));
    assert!(lines[1].contains("| next 23.1%"));
    assert!(lines[1].ends_with(&format!("- {}/products-111", server.uri())));

    assert_eq!(
        texts[1],
        "BBX arbitrage scan: no new or improved opportunities found.\n\
         (Suppressed 1 previously-notified opportunities this run.)"
    );
}

#[tokio::test]
async fn cheaper_relisting_is_announced_again() {
    let server = MockServer::start().await;
    mount_market(&server).await;

    let config = config_for(&server);
    let secrets = secrets_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");

    // History says we last announced 111 at a higher price.
    std::fs::write(
        &state_path,
        r#"{"111": {"sku": "111", "ask_last_notified": 450.0,
                    "first_notified_at": "2025-11-20T08:00:00Z",
                    "last_notified_at": "2025-11-22T08:00:00Z",
                    "notification_count": 2}}"#,
    )
    .unwrap();

    let bot = ArbitrageBot::new(
        &config,
        Box::new(Scanner::new(&config, &secrets).unwrap()),
        Box::new(SlackNotifier::new(secrets.slack_webhook())),
        StateStore::file(&state_path),
    );
    let summary = bot.run_once(now()).await;

    assert_eq!(summary.notified, 1);
    assert_eq!(summary.counts.improved, 1);

    let state = StateStore::file(&state_path).load().await;
    assert_eq!(state["111"].ask_last_notified, Some(dec!(400)));
    assert_eq!(state["111"].notification_count, 3);
    assert_eq!(state["111"].first_notified_at, Some(Utc.with_ymd_and_hms(2025, 11, 20, 8, 0, 0).unwrap()));
    assert_eq!(state["111"].last_notified_at, Some(now()));
}

#[tokio::test]
async fn search_outage_still_reports_and_keeps_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let secrets = secrets_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::write(
        &state_path,
        r#"{"A": {"sku": "A", "ask_last_notified": 100.0, "first_notified_at": "2025-11-01T00:00:00Z",
                  "last_notified_at": "2025-11-01T00:00:00Z", "notification_count": 1}}"#,
    )
    .unwrap();

    let bot = ArbitrageBot::new(
        &config,
        Box::new(Scanner::new(&config, &secrets).unwrap()),
        Box::new(SlackNotifier::new(secrets.slack_webhook())),
        StateStore::file(&state_path),
    );
    let summary = bot.run_once(now()).await;

    assert!(!summary.scan_succeeded);
    assert_eq!(summary.candidates, 0);
    assert!(summary.state_saved);
    assert_eq!(StateStore::file(&state_path).load().await.len(), 1);
    assert_eq!(
        slack_texts(&server).await,
        vec!["BBX arbitrage scan: no new or improved opportunities found.".to_string()]
    );
}

#[tokio::test]
async fn rejected_webhook_does_not_block_state_save() {
    let server = MockServer::start().await;
    mount_market(&server).await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let secrets = secrets_for(&server);
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");

    let bot = ArbitrageBot::new(
        &config,
        Box::new(Scanner::new(&config, &secrets).unwrap()),
        Box::new(SlackNotifier::new(secrets.slack_webhook())),
        StateStore::file(&state_path),
    );
    let summary = bot.run_once(now()).await;

    assert!(summary.message_attempted);
    assert!(!summary.message_delivered);
    assert!(summary.state_saved);
    assert!(StateStore::file(&state_path).load().await.contains_key("111"));
}

// ──────────────────────────────────────────
// Individual clients
// ──────────────────────────────────────────

#[tokio::test]
async fn scanner_skips_floor_prices_and_parentless_hits() {
    let server = MockServer::start().await;
    mount_market(&server).await;

    let config = config_for(&server);
    let scanner = Scanner::new(&config, &secrets_for(&server)).unwrap();
    let report = scanner.scan().await.unwrap();

    assert_eq!(report.listings, 3);
    assert_eq!(report.priced, 2);
    assert_eq!(report.candidates.len(), 1);

    let candidate = &report.candidates[0];
    assert_eq!(candidate.sku.as_deref(), Some("111"));
    assert_eq!(candidate.ask, Some(dec!(400)));
    assert_eq!(candidate.details.next_lowest, Some(dec!(520)));
    assert_eq!(candidate.details.pct_market, Some(dec!(28.6)));
    assert_eq!(candidate.details.pct_next, Some(dec!(23.1)));
}

#[tokio::test]
async fn search_pages_until_empty_and_unions_colours() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .and(body_string_contains("page=0&"))
        .and(body_string_contains("White"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [{"hits": [
            {"objectID": "w1", "parent_sku": "W1"},
            {"objectID": "shared", "parent_sku": "S", "name": "from white"}
        ]}]})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .and(body_string_contains("page=1&"))
        .and(body_string_contains("White"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [{"hits": [
            {"objectID": "w2", "parent_sku": "W2"}
        ]}]})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .and(body_string_contains("page=0&"))
        .and(body_string_contains("Red"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [{"hits": [
            {"objectID": "shared", "parent_sku": "S", "name": "from red"}
        ]}]})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/indexes/*/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [{"hits": []}]})))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let credentials = secrets_for(&server).algolia().unwrap();
    let client = AlgoliaClient::new(&config, credentials, RequestPolicy::new(&config.rate_limit)).unwrap();

    let listings = client.fetch_listings(&ListingQuery::recent("1 Day")).await.unwrap();
    let ids: Vec<&str> = listings.iter().filter_map(|l| l.object_id.as_deref()).collect();
    assert_eq!(ids, vec!["shared", "w1", "w2"]);
    assert_eq!(listings[0].name.as_deref(), Some("from white"));

    let reds = client
        .fetch_listings(&ListingQuery {
            colour: Colour::Red,
            ..ListingQuery::recent("1 Day")
        })
        .await
        .unwrap();
    assert_eq!(reds.len(), 1);
}

#[tokio::test]
async fn pricing_keeps_first_entry_per_sku() {
    let server = MockServer::start().await;
    mount_market(&server).await;

    let config = config_for(&server);
    let client = PricingClient::new(&config, RequestPolicy::new(&config.rate_limit)).unwrap();
    let priced = client
        .fetch_batch(&["111".to_string(), "222".to_string()])
        .await
        .unwrap();

    assert_eq!(priced["111"].least_listing_price, Some(dec!(400)));
    assert_eq!(priced["111"].format.as_deref(), Some("06-00750"));
    assert_eq!(priced["222"].least_listing_price, Some(dec!(0.5)));
}

#[tokio::test]
async fn pricing_rejects_non_object_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pricing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["unexpected"])))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = PricingClient::new(&config, RequestPolicy::new(&config.rate_limit)).unwrap();
    let err = client.fetch_batch(&["111".to_string()]).await.unwrap_err();
    assert!(matches!(err, FetchError::Parse { .. }));

    assert!(client.fetch_all(&["111".to_string()]).await.is_empty());
}

#[tokio::test]
async fn variant_lookup_echoes_csrf_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products-111"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "X-CSRF-Token=tok; Path=/"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("x-csrf-token", "tok"))
        .and(header("referer", format!("{}/products-111", server.uri()).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(variant_response(&[380, 400, 450])))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = VariantClient::new(
        &config,
        PayloadTemplate::load(Path::new(PAYLOAD)).unwrap(),
        RequestPolicy::new(&config.rate_limit),
    )
    .unwrap();

    let prices = client.fetch_prices("111", "products-111").await.unwrap();
    assert_eq!(prices, vec![dec!(380), dec!(400), dec!(450)]);
}
