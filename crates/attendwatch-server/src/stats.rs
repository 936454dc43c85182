use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

pub const SKIP_LOG_CAPACITY: usize = 100;
pub const RECENT_EVENTS_CAPACITY: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total_alerts_sent: u64,
    pub failed_alerts: u64,
    pub by_day: BTreeMap<String, u64>,
    pub by_target: BTreeMap<String, u64>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl AlertStats {
    pub fn record_sent(&mut self, target: &str, now: DateTime<Utc>, tz: Tz) {
        self.total_alerts_sent += 1;
        let day = now.with_timezone(&tz).format("%Y-%m-%d").to_string();
        *self.by_day.entry(day).or_default() += 1;
        *self.by_target.entry(target.to_string()).or_default() += 1;
        self.last_alert_at = Some(now);
    }

    pub fn record_failed(&mut self) {
        self.failed_alerts += 1;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SkippedEvent {
    pub at: DateTime<Utc>,
    pub reason: String,
    pub key: Option<String>,
    pub event_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedEvent {
    pub at: DateTime<Utc>,
    pub key: String,
    pub direction: &'static str,
    pub sector: String,
    pub event_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct EventJournal {
    skipped: VecDeque<SkippedEvent>,
    received: VecDeque<ReceivedEvent>,
}

impl EventJournal {
    pub fn skip(&mut self, entry: SkippedEvent) {
        push_bounded(&mut self.skipped, entry, SKIP_LOG_CAPACITY);
    }

    pub fn receive(&mut self, entry: ReceivedEvent) {
        push_bounded(&mut self.received, entry, RECENT_EVENTS_CAPACITY);
    }

    pub fn skipped(&self) -> impl Iterator<Item = &SkippedEvent> {
        self.skipped.iter()
    }

    pub fn received(&self) -> impl Iterator<Item = &ReceivedEvent> {
        self.received.iter()
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    buf.push_back(item);
    while buf.len() > cap {
        buf.pop_front();
    }
}
