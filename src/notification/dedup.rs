//! The notify-or-suppress decision for each scan candidate.
//!
//! [`decide`] is pure: it reads a snapshot of the notification history and
//! returns a new one alongside the two partitions of the input. Nothing here
//! performs I/O or reads the clock.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::debug;

use crate::market::models::CandidateOpportunity;
use crate::notification::state::{NotificationRecord, NotificationState};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyReason {
    /// No usable sku/ask; announced without being tracked.
    MissingKey,
    New,
    /// Stored record was incomplete and has been rebuilt.
    Reset,
    Improved,
    Reminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressReason {
    Unchanged,
    Worsened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Notify(NotifyReason),
    Suppress(SuppressReason),
}

impl Verdict {
    pub fn is_notify(&self) -> bool {
        matches!(self, Self::Notify(_))
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Notify(NotifyReason::MissingKey) => "notify:missing_key",
            Self::Notify(NotifyReason::New) => "notify:new",
            Self::Notify(NotifyReason::Reset) => "notify:reset",
            Self::Notify(NotifyReason::Improved) => "notify:improved",
            Self::Notify(NotifyReason::Reminder) => "notify:reminder",
            Self::Suppress(SuppressReason::Unchanged) => "suppress:unchanged",
            Self::Suppress(SuppressReason::Worsened) => "suppress:worsened",
        };
        f.write_str(label)
    }
}

/// Tally of verdicts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictCounts {
    pub missing_key: usize,
    pub new: usize,
    pub reset: usize,
    pub improved: usize,
    pub reminder: usize,
    pub unchanged: usize,
    pub worsened: usize,
}

impl VerdictCounts {
    pub fn record(&mut self, verdict: Verdict) {
        let slot = match verdict {
            Verdict::Notify(NotifyReason::MissingKey) => &mut self.missing_key,
            Verdict::Notify(NotifyReason::New) => &mut self.new,
            Verdict::Notify(NotifyReason::Reset) => &mut self.reset,
            Verdict::Notify(NotifyReason::Improved) => &mut self.improved,
            Verdict::Notify(NotifyReason::Reminder) => &mut self.reminder,
            Verdict::Suppress(SuppressReason::Unchanged) => &mut self.unchanged,
            Verdict::Suppress(SuppressReason::Worsened) => &mut self.worsened,
        };
        *slot += 1;
    }

    pub fn notified(&self) -> usize {
        self.missing_key + self.new + self.reset + self.improved + self.reminder
    }

    pub fn suppressed(&self) -> usize {
        self.unchanged + self.worsened
    }
}

/// Output of [`decide`].
#[derive(Debug, Clone, Default)]
pub struct Decision {
    pub notified: Vec<CandidateOpportunity>,
    pub suppressed: Vec<CandidateOpportunity>,
    pub state: NotificationState,
    pub counts: VerdictCounts,
}

/// Reminder interval in seconds. Negative and NaN inputs clamp to zero.
fn reminder_seconds(reminder_days: f64) -> f64 {
    if reminder_days.is_nan() || reminder_days <= 0.0 {
        return 0.0;
    }
    reminder_days * SECONDS_PER_DAY
}

fn elapsed_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed = now.signed_duration_since(since);
    elapsed.num_seconds() as f64 + f64::from(elapsed.subsec_nanos()) / 1e9
}

/// Classify one candidate against the current history and return the record
/// to store for it, if any.
///
/// `stamp` is what gets written to the record; `now` is what elapsed time is
/// measured against.
pub fn evaluate(
    candidate: &CandidateOpportunity,
    previous: Option<&NotificationRecord>,
    reminder_secs: f64,
    now: DateTime<Utc>,
    stamp: DateTime<Utc>,
) -> (Verdict, Option<NotificationRecord>) {
    let Some((sku, ask)) = candidate.dedup_key() else {
        return (Verdict::Notify(NotifyReason::MissingKey), None);
    };

    let Some(record) = previous else {
        return (
            Verdict::Notify(NotifyReason::New),
            Some(NotificationRecord::first(sku, ask, stamp)),
        );
    };

    let (Some(last_ask), Some(last_at)) = (record.ask_last_notified, record.last_notified_at)
    else {
        let reset = NotificationRecord {
            sku: sku.to_string(),
            ask_last_notified: Some(ask),
            first_notified_at: record.first_notified_at.or(Some(stamp)),
            last_notified_at: Some(stamp),
            notification_count: record.notification_count.saturating_add(1),
        };
        return (Verdict::Notify(NotifyReason::Reset), Some(reset));
    };

    if ask < last_ask {
        let mut updated = renotified(record, stamp);
        updated.ask_last_notified = Some(ask);
        return (Verdict::Notify(NotifyReason::Improved), Some(updated));
    }

    if ask == last_ask {
        if elapsed_seconds(last_at, now) >= reminder_secs {
            return (Verdict::Notify(NotifyReason::Reminder), Some(renotified(record, stamp)));
        }
        return (Verdict::Suppress(SuppressReason::Unchanged), None);
    }

    (Verdict::Suppress(SuppressReason::Worsened), None)
}

/// `record` notified again at `stamp`. A lost `first_notified_at` is
/// restored so every written record has both timestamps.
fn renotified(record: &NotificationRecord, stamp: DateTime<Utc>) -> NotificationRecord {
    let mut updated = record.clone();
    updated.first_notified_at.get_or_insert(stamp);
    updated.last_notified_at = Some(stamp);
    updated.notification_count = updated.notification_count.saturating_add(1);
    updated
}

/// Split `candidates` into those to announce now and those already announced,
/// and compute the history to persist afterwards.
///
/// Both partitions keep input order. `state` is left untouched; records in the
/// returned state are replaced only for SKUs that were notified.
pub fn decide(
    candidates: Vec<CandidateOpportunity>,
    state: &NotificationState,
    reminder_days: f64,
    now: DateTime<Utc>,
) -> Decision {
    let reminder_secs = reminder_seconds(reminder_days);
    let stamp = now.trunc_subsecs(0);

    let mut decision = Decision {
        state: state.clone(),
        ..Decision::default()
    };

    for candidate in candidates {
        let previous = candidate
            .dedup_key()
            .and_then(|(sku, _)| decision.state.get(sku));
        let (verdict, record) = evaluate(&candidate, previous, reminder_secs, now, stamp);

        debug!(
            sku = candidate.sku.as_deref().unwrap_or("<none>"),
            ask = ?candidate.ask,
            verdict = %verdict,
            "Dedup verdict"
        );

        if let (Some(record), Some((sku, _))) = (record, candidate.dedup_key()) {
            decision.state.insert(sku.to_string(), record);
        }
        decision.counts.record(verdict);

        if verdict.is_notify() {
            decision.notified.push(candidate);
        } else {
            decision.suppressed.push(candidate);
        }
    }

    decision
}
