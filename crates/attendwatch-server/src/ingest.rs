use std::collections::BTreeMap;
use std::sync::Arc;

use attendwatch_config::Config;
use attendwatch_contracts::{ConversationEvent, Direction, DirectionFallback};
use attendwatch_kernel::{
    evaluate, excerpt, fallback_conversation_key, normalize, AlertDecision, BusinessHours,
    ConversationState, HistoryEntry, PatternTables, PolicyConfig, EXCERPT_CHARS,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::stats::{EventJournal, ReceivedEvent, SkippedEvent};
use crate::sweep::Tracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Tracked { key: String },
    Closed { key: String },
    Pending { key: String },
    Skipped { reason: String },
}

pub struct Ingestor {
    tracker: Arc<Mutex<Tracker>>,
    journal: Arc<Mutex<EventJournal>>,
    tables: Arc<PatternTables>,
    hours: BusinessHours,
    policy: PolicyConfig,
    direction_fallback: DirectionFallback,
    ender_clears_pending: bool,
    agent_names: BTreeMap<String, String>,
    link_base: String,
}

impl Ingestor {
    pub fn new(
        cfg: &Config,
        tracker: Arc<Mutex<Tracker>>,
        journal: Arc<Mutex<EventJournal>>,
        tables: Arc<PatternTables>,
        hours: BusinessHours,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            tracker,
            journal,
            tables,
            hours,
            policy,
            direction_fallback: cfg.monitor.direction_fallback,
            ender_clears_pending: cfg.monitor.ender_clears_pending,
            agent_names: cfg.classifier.agent_names.clone(),
            link_base: cfg.messaging.conversation_link_base.clone(),
        }
    }

    pub async fn ingest(&self, raw: &Value, now: DateTime<Utc>) -> IngestOutcome {
        let event = match normalize(raw, &self.tables, self.direction_fallback) {
            Ok(event) => event,
            Err(reason) => {
                let event_id = raw_event_id(raw);
                return self.skip(now, reason.as_str(), None, event_id).await;
            }
        };
        let event_id = event.source_event_id.clone();

        if event.is_private {
            return self.skip(now, "private_message", None, event_id).await;
        }
        if event.is_internal {
            return self.skip(now, "internal_conversation", None, event_id).await;
        }

        let key = event
            .natural_key()
            .map(str::to_string)
            .unwrap_or_else(fallback_conversation_key);

        let outcome = match event.direction {
            Direction::Inbound => self.apply_inbound(&key, &event, now).await,
            Direction::Outbound => self.apply_outbound(&key, &event, now).await,
        };
        match &outcome {
            Err(reason) => {
                let skipped = self.skip(now, reason, Some(key.clone()), event_id).await;
                if *reason == "ender_pending_alert" {
                    IngestOutcome::Pending { key }
                } else {
                    skipped
                }
            }
            Ok(outcome) => {
                self.journal.lock().await.receive(ReceivedEvent {
                    at: now,
                    key: key.clone(),
                    direction: event.direction.as_str(),
                    sector: event.sector.clone(),
                    event_id,
                });
                outcome.clone()
            }
        }
    }

    async fn apply_inbound(
        &self,
        key: &str,
        event: &ConversationEvent,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, &'static str> {
        let mut tracker = self.tracker.lock().await;

        if self.tables.is_conversation_ender(event.text.as_deref()) {
            let Some(state) = tracker.conversations.get(key) else {
                return Err("conversation_ender");
            };
            if !self.ender_clears_pending && self.is_pending_alert(state, now) {
                debug!(key, "ender kept pending overdue conversation");
                return Err("ender_pending_alert");
            }
            tracker.conversations.delete(key);
            debug!(key, "conversation closed by ender phrase");
            return Ok(IngestOutcome::Closed {
                key: key.to_string(),
            });
        }

        if !self.hours.is_business_moment(now) {
            return Err("outside_business_hours");
        }

        let link = event
            .conversation_id
            .as_deref()
            .map(|id| format!("{}{id}", self.link_base));
        let excerpt = event.text.as_deref().map(|t| excerpt(t, EXCERPT_CHARS));
        tracker.conversations.upsert(key, now, |state| {
            state.record_inbound(now);
            let meta = &mut state.meta;
            if event.conversation_id.is_some() {
                meta.conversation_id = event.conversation_id.clone();
                meta.link = link;
            }
            if event.phone.is_some() {
                meta.phone = event.phone.clone();
            }
            if event.name.is_some() {
                meta.name = event.name.clone();
            }
            meta.sector = event.sector.clone();
            if !event.tags.is_empty() {
                meta.tags = event.tags.clone();
            }
            meta.last_message_excerpt = excerpt.clone();
            state.push_history(HistoryEntry {
                at: now,
                direction: Direction::Inbound,
                agent_id: None,
                agent_name: None,
                excerpt,
                is_automated: false,
            });
        });
        Ok(IngestOutcome::Tracked {
            key: key.to_string(),
        })
    }

    async fn apply_outbound(
        &self,
        key: &str,
        event: &ConversationEvent,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, &'static str> {
        let mut tracker = self.tracker.lock().await;
        if !tracker.conversations.contains(key) {
            return Err("untracked_outbound");
        }

        let agent_name = event
            .agent_id
            .as_deref()
            .and_then(|id| self.agent_names.get(id).cloned());
        let excerpt = event.text.as_deref().map(|t| excerpt(t, EXCERPT_CHARS));
        tracker.conversations.upsert(key, now, |state| {
            if !event.is_automated {
                state.record_outbound(now);
                if event.agent_id.is_some() {
                    state.meta.agent_id = event.agent_id.clone();
                    state.meta.agent_name = agent_name.clone();
                }
            }
            state.meta.last_message_excerpt = excerpt.clone();
            state.push_history(HistoryEntry {
                at: now,
                direction: Direction::Outbound,
                agent_id: event.agent_id.clone(),
                agent_name,
                excerpt,
                is_automated: event.is_automated,
            });
        });
        Ok(IngestOutcome::Tracked {
            key: key.to_string(),
        })
    }

    fn is_pending_alert(&self, state: &ConversationState, now: DateTime<Utc>) -> bool {
        matches!(
            evaluate(state, now, &self.hours, &self.tables, &self.policy),
            AlertDecision::Fire { .. }
        )
    }

    async fn skip(
        &self,
        now: DateTime<Utc>,
        reason: &str,
        key: Option<String>,
        event_id: Option<String>,
    ) -> IngestOutcome {
        debug!(reason, key = key.as_deref().unwrap_or("-"), "webhook event skipped");
        self.journal.lock().await.skip(SkippedEvent {
            at: now,
            reason: reason.to_string(),
            key,
            event_id,
        });
        IngestOutcome::Skipped {
            reason: reason.to_string(),
        }
    }
}

pub fn raw_event_id(raw: &Value) -> Option<String> {
    ["EventId", "eventId", "id"]
        .iter()
        .find_map(|k| raw.get(*k))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
