use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::{AppConfig, NotificationConfig, ThresholdConfig};
use crate::market::scanner::CandidateSource;
use crate::monitoring::alerts::Notifier;
use crate::notification::dedup::{decide, VerdictCounts};
use crate::notification::message::format_message;
use crate::notification::store::StateStore;

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// False when the scan errored and the run continued with no candidates.
    pub scan_succeeded: bool,
    pub candidates: usize,
    pub notified: usize,
    pub suppressed: usize,
    pub counts: VerdictCounts,
    /// Whether a message was handed to the notifier.
    pub message_attempted: bool,
    pub message_delivered: bool,
    pub state_saved: bool,
}

/// One load → scan → decide → notify → save pass.
pub struct ArbitrageBot {
    source: Box<dyn CandidateSource>,
    notifier: Box<dyn Notifier>,
    store: StateStore,
    thresholds: ThresholdConfig,
    notification: NotificationConfig,
}

impl ArbitrageBot {
    pub fn new(
        config: &AppConfig,
        source: Box<dyn CandidateSource>,
        notifier: Box<dyn Notifier>,
        store: StateStore,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            thresholds: config.thresholds.clone(),
            notification: config.notification.clone(),
        }
    }

    /// Run a single cycle at `now`. Never fails: scan errors mean no
    /// candidates, and delivery or save failures are reported in the summary.
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunSummary {
        let start = Instant::now();
        info!(state = %self.store.location(), "Starting arbitrage run");

        let state = self.store.load().await;

        let (candidates, scan_succeeded) = match self.source.scan().await {
            Ok(report) => (report.candidates, true),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Scan failed, continuing with no candidates");
                (Vec::new(), false)
            }
        };
        let candidate_count = candidates.len();

        let decision = decide(candidates, &state, self.notification.reminder_days, now);
        info!(
            candidates = candidate_count,
            notified = decision.notified.len(),
            suppressed = decision.suppressed.len(),
            new = decision.counts.new,
            improved = decision.counts.improved,
            reminders = decision.counts.reminder,
            "Dedup complete"
        );

        let should_send = !decision.notified.is_empty()
            || self.notification.send_empty_alerts
            || self.notifier.wants_every_message();
        let message_delivered = if should_send {
            let text = format_message(
                &decision.notified,
                decision.suppressed.len(),
                &self.thresholds,
                self.notification.max_per_alert,
            );
            self.notifier.send(&text).await
        } else {
            info!("Nothing new to announce and empty alerts are disabled");
            false
        };

        let state_saved = self.store.save(&decision.state).await;

        let summary = RunSummary {
            scan_succeeded,
            candidates: candidate_count,
            notified: decision.notified.len(),
            suppressed: decision.suppressed.len(),
            counts: decision.counts,
            message_attempted: should_send,
            message_delivered,
            state_saved,
        };

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            delivered = summary.message_delivered,
            state_saved = summary.state_saved,
            "Arbitrage run finished"
        );
        summary
    }
}
