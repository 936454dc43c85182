use std::collections::{HashMap, VecDeque};

use attendwatch_contracts::Direction;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub direction: Direction,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub excerpt: Option<String>,
    pub is_automated: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ConversationMeta {
    pub conversation_id: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub sector: String,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub link: Option<String>,
    pub tags: Vec<String>,
    pub last_message_excerpt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub alerted_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub meta: ConversationMeta,
    history: VecDeque<HistoryEntry>,
    #[serde(skip)]
    history_limit: usize,
}

impl ConversationState {
    pub fn new(now: DateTime<Utc>, history_limit: usize) -> Self {
        Self {
            last_inbound_at: None,
            last_outbound_at: None,
            alerted_at: None,
            last_activity_at: now,
            meta: ConversationMeta::default(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history(&self) -> &VecDeque<HistoryEntry> {
        &self.history
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    // A qualifying customer message opens a fresh waiting period.
    pub fn record_inbound(&mut self, at: DateTime<Utc>) {
        self.last_inbound_at = Some(at);
        self.alerted_at = None;
    }

    pub fn record_outbound(&mut self, at: DateTime<Utc>) {
        self.last_outbound_at = Some(at);
    }

    pub fn already_alerted(&self) -> bool {
        match (self.alerted_at, self.last_inbound_at) {
            (Some(alerted), Some(inbound)) => alerted >= inbound,
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct ConversationStore {
    states: HashMap<String, ConversationState>,
    history_limit: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(50)
    }
}

impl ConversationStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            states: HashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn upsert<R>(
        &mut self,
        key: &str,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut ConversationState) -> R,
    ) -> R {
        let limit = self.history_limit;
        let state = self
            .states
            .entry(key.to_string())
            .or_insert_with(|| ConversationState::new(now, limit));
        if now > state.last_activity_at {
            state.last_activity_at = now;
        }
        f(state)
    }

    pub fn update<R>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut ConversationState) -> R,
    ) -> Option<R> {
        self.states.get_mut(key).map(f)
    }

    pub fn get(&self, key: &str) -> Option<&ConversationState> {
        self.states.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.states.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.states.remove(key).is_some()
    }

    pub fn for_each(&self, mut visitor: impl FnMut(&str, &ConversationState)) {
        for (key, state) in &self.states {
            visitor(key, state);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn evict_idle(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|(_, s)| now - s.last_activity_at > retention)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            self.states.remove(key);
        }
        stale
    }
}
