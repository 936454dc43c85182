use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use attendwatch_kernel::{
    evaluate, AlertDecision, AlertPayload, BusinessHours, ConversationStore, PatternTables,
    PolicyConfig,
};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::stats::AlertStats;
use crate::Clock;

// Conversation table plus the keys whose alert is being delivered right now.
#[derive(Debug)]
pub struct Tracker {
    pub conversations: ConversationStore,
    in_flight: HashSet<String>,
}

impl Tracker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            conversations: ConversationStore::new(history_limit),
            in_flight: HashSet::new(),
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains(key)
    }
}

struct DueAlert {
    alert: AlertPayload,
    based_on: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Sweeper {
    tracker: Arc<Mutex<Tracker>>,
    tables: Arc<PatternTables>,
    hours: BusinessHours,
    policy: PolicyConfig,
    retention: chrono::Duration,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<Mutex<AlertStats>>,
}

impl Sweeper {
    pub fn new(
        tracker: Arc<Mutex<Tracker>>,
        tables: Arc<PatternTables>,
        hours: BusinessHours,
        policy: PolicyConfig,
        retention: chrono::Duration,
        dispatcher: Arc<Dispatcher>,
        stats: Arc<Mutex<AlertStats>>,
    ) -> Self {
        Self {
            tracker,
            tables,
            hours,
            policy,
            retention,
            dispatcher,
            stats,
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let evicted = {
            let mut tracker = self.tracker.lock().await;
            tracker.conversations.evict_idle(now, self.retention)
        };
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted idle conversations");
        }

        if !self.hours.is_business_moment(now) {
            debug!("sweep outside business hours");
            return 0;
        }
        if !self.dispatcher.is_configured() {
            warn!("no alert target configured; skipping sweep");
            return 0;
        }

        let due = {
            let mut tracker = self.tracker.lock().await;
            let keys = tracker.conversations.keys();
            keys.iter()
                .filter_map(|key| self.claim(&mut tracker, key, now))
                .collect::<Vec<_>>()
        };

        let mut sent = 0;
        for item in due {
            if self.deliver(item, now).await {
                sent += 1;
            }
        }
        sent
    }

    pub async fn check_one(&self, key: &str, now: DateTime<Utc>) -> bool {
        if !self.dispatcher.is_configured() {
            return false;
        }
        let due = {
            let mut tracker = self.tracker.lock().await;
            self.claim(&mut tracker, key, now)
        };
        match due {
            Some(item) => self.deliver(item, now).await,
            None => false,
        }
    }

    fn claim(&self, tracker: &mut Tracker, key: &str, now: DateTime<Utc>) -> Option<DueAlert> {
        if tracker.in_flight.contains(key) {
            return None;
        }
        let state = tracker.conversations.get(key)?;
        match evaluate(state, now, &self.hours, &self.tables, &self.policy) {
            AlertDecision::Fire { elapsed, based_on } => {
                let alert = AlertPayload::from_state(key, state, elapsed, based_on);
                tracker.in_flight.insert(key.to_string());
                Some(DueAlert { alert, based_on })
            }
            AlertDecision::Skip(reason) => {
                debug!(key, reason = reason.as_str(), "no alert");
                None
            }
        }
    }

    async fn deliver(&self, item: DueAlert, now: DateTime<Utc>) -> bool {
        let outcome = self.dispatcher.dispatch(&item.alert, now).await;
        let key = item.alert.key.as_str();

        let committed = {
            let mut tracker = self.tracker.lock().await;
            tracker.in_flight.remove(key);
            outcome.success
                && tracker
                    .conversations
                    .update(key, |state| {
                        // A newer inbound opened another waiting period while we were sending.
                        if state.last_inbound_at == Some(item.based_on) {
                            state.alerted_at = Some(now);
                            true
                        } else {
                            false
                        }
                    })
                    .unwrap_or(false)
        };
        if outcome.success && !committed {
            debug!(key, "conversation changed during delivery; marker not set");
        }

        let mut stats = self.stats.lock().await;
        if outcome.success {
            let target = outcome.target.as_deref().unwrap_or("none");
            stats.record_sent(target, now, self.hours.timezone());
        } else {
            stats.record_failed();
        }
        outcome.success
    }
}

pub struct SweepTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepTask {
    pub fn spawn(sweeper: Sweeper, period: Duration, clock: Clock) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sent = sweeper.sweep_once(clock()).await;
                        if sent > 0 {
                            info!(sent, "sweep delivered alerts");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("sweep task stopped");
        });
        Self { stop, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
