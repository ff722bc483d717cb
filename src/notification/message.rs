use std::fmt::Display;

use crate::config::ThresholdConfig;
use crate::market::models::CandidateOpportunity;

const NOTHING_NEW: &str = "BBX arbitrage scan: no new or improved opportunities found.";

/// Render the chat summary for one run.
pub fn format_message(
    notified: &[CandidateOpportunity],
    suppressed_count: usize,
    thresholds: &ThresholdConfig,
    max_per_alert: usize,
) -> String {
    let mut lines = Vec::new();

    if notified.is_empty() {
        lines.push(NOTHING_NEW.to_string());
    } else {
        lines.push(format!(
            "BBX arbitrage scan - {} candidates (mkt>={}%, last>={}%, next>={}%)",
            notified.len(),
            thresholds.min_pct_market,
            thresholds.min_pct_last,
            thresholds.min_pct_next,
        ));

        lines.extend(
            notified
                .iter()
                .take(max_per_alert)
                .enumerate()
                .map(|(i, c)| format_line(i + 1, c)),
        );

        if notified.len() > max_per_alert {
            lines.push(format!("... and {} more.", notified.len() - max_per_alert));
        }
    }

    if suppressed_count > 0 {
        lines.push(format!(
            "(Suppressed {suppressed_count} previously-notified opportunities this run.)"
        ));
    }

    lines.join("\n")
}

fn format_line(index: usize, c: &CandidateOpportunity) -> String {
    let d = &c.details;
    format!(
        "{index}. {} ({}, {}, {}) - £{} ask | £{} mkt ({}%) | last {}% | next {}% - {}",
        or_na(d.name.as_ref()),
        or_na(d.vintage.as_ref()),
        or_na(d.region.as_ref()),
        or_na(d.case_format.as_ref()),
        or_na(c.ask.as_ref()),
        or_na(d.market_price.as_ref()),
        or_na(d.pct_market.as_ref()),
        or_na(d.pct_last.as_ref()),
        or_na(d.pct_next.as_ref()),
        or_na(d.url.as_ref()),
    )
}

fn or_na<T: Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "N/A".to_string(), ToString::to_string)
}
