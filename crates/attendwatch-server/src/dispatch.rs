use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use attendwatch_config::{is_http_url, Config, Messaging, Routing};
use attendwatch_kernel::{
    digits_only, format_alert_text, stable_index, to_relay_alert, AlertPayload, BusinessHours,
};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("attendwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    Phone(String),
    Chat(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertTarget {
    Message(MessageTarget),
    Webhook(String),
}

impl AlertTarget {
    pub fn label(&self) -> String {
        match self {
            AlertTarget::Message(MessageTarget::Phone(p)) => format!("phone:{p}"),
            AlertTarget::Message(MessageTarget::Chat(c)) => format!("chat:{c}"),
            AlertTarget::Webhook(_) => "webhook".to_string(),
        }
    }
}

// Sector route, then alert chat, then the hashed phone pool, then the single phone.
pub fn resolve_target(routing: &Routing, sector: &str, key: &str) -> Option<AlertTarget> {
    let routed = routing
        .sector_managers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(sector))
        .and_then(|(_, value)| parse_route(value));
    if routed.is_some() {
        return routed;
    }

    if let Some(chat) = alert_chat(routing) {
        return Some(AlertTarget::Message(MessageTarget::Chat(chat.to_string())));
    }

    let pool: Vec<String> = routing
        .fallback_phones
        .iter()
        .filter_map(|p| digits_only(p))
        .collect();
    if !pool.is_empty() {
        let phone = pool[stable_index(key, pool.len())].clone();
        return Some(AlertTarget::Message(MessageTarget::Phone(phone)));
    }

    routing
        .fallback_phone
        .as_deref()
        .and_then(digits_only)
        .map(|p| AlertTarget::Message(MessageTarget::Phone(p)))
}

fn alert_chat(routing: &Routing) -> Option<&str> {
    routing
        .alert_chat_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
}

fn has_route(routing: &Routing) -> bool {
    routing.sector_managers.values().any(|v| parse_route(v).is_some())
        || alert_chat(routing).is_some()
        || routing.fallback_phones.iter().any(|p| digits_only(p).is_some())
        || routing.fallback_phone.as_deref().and_then(digits_only).is_some()
}

fn parse_route(value: &str) -> Option<AlertTarget> {
    let value = value.trim();
    if is_http_url(value) {
        return Some(AlertTarget::Webhook(value.to_string()));
    }
    if let Some(chat) = value.strip_prefix("chat:") {
        let chat = chat.trim();
        return (!chat.is_empty())
            .then(|| AlertTarget::Message(MessageTarget::Chat(chat.to_string())));
    }
    digits_only(value).map(|p| AlertTarget::Message(MessageTarget::Phone(p)))
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, target: &MessageTarget, text: &str) -> Result<(), String>;
}

pub struct HttpMessenger {
    client: Client,
    endpoint: String,
    api_token: String,
    organization_id: Option<String>,
    from_phone: Option<String>,
}

impl HttpMessenger {
    pub fn from_config(cfg: &Messaging) -> Result<Option<Self>, String> {
        let Some(api_token) = cfg.api_token.clone().filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Some(Self {
            client,
            endpoint: format!("{}/v1/messages/simplified/", cfg.base_url.trim_end_matches('/')),
            api_token,
            organization_id: cfg.organization_id.clone(),
            from_phone: cfg.from_phone.clone(),
        }))
    }
}

#[async_trait]
impl Messenger for HttpMessenger {
    async fn send_text(&self, target: &MessageTarget, text: &str) -> Result<(), String> {
        let mut body = json!({
            "FromPhone": self.from_phone,
            "OrganizationId": self.organization_id,
            "Message": text.trim(),
        });
        match target {
            MessageTarget::Phone(phone) => body["ToPhone"] = json!(phone),
            MessageTarget::Chat(chat) => body["ChatId"] = json!(chat),
        }
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("messaging transport error: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("messaging http status {}", response.status()));
        }
        Ok(())
    }
}

pub struct RelayClient {
    client: Client,
    max_attempts: usize,
    backoff: Duration,
}

impl RelayClient {
    pub fn new(max_attempts: usize, backoff_ms: u64, timeout_ms: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            backoff: Duration::from_millis(backoff_ms),
        })
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        event_id: &str,
        body: &T,
    ) -> Result<usize, (usize, String)> {
        let mut last_failure = String::from("relay_not_attempted");
        for attempt in 1..=self.max_attempts {
            let sent = self
                .client
                .post(url)
                .header("x-attempt", attempt.to_string())
                .header("x-event-id", event_id)
                .json(body)
                .send()
                .await;
            match sent {
                Ok(response) if response.status().is_success() => return Ok(attempt),
                Ok(response) => last_failure = format!("relay http status {}", response.status()),
                Err(e) if e.is_timeout() => last_failure = "relay timeout".to_string(),
                Err(e) => last_failure = format!("relay transport error: {e}"),
            }
            debug!(url, event_id, attempt, error = %last_failure, "relay attempt failed");
            if attempt < self.max_attempts && self.backoff > Duration::ZERO {
                sleep(self.backoff).await;
            }
        }
        Err((self.max_attempts, last_failure))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MechanismAttempt {
    pub mechanism: &'static str,
    pub attempts: usize,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    pub success: bool,
    pub target: Option<String>,
    pub attempts: Vec<MechanismAttempt>,
}

pub struct Dispatcher {
    routing: Routing,
    relay_url: Option<String>,
    messenger: Option<Arc<dyn Messenger>>,
    relay: RelayClient,
    hours: BusinessHours,
}

impl Dispatcher {
    pub fn new(
        cfg: &Config,
        hours: BusinessHours,
        messenger: Option<Arc<dyn Messenger>>,
    ) -> Result<Self, String> {
        Ok(Self {
            routing: cfg.routing.clone(),
            relay_url: cfg.relay.webhook_url.clone().filter(|u| !u.trim().is_empty()),
            messenger,
            relay: RelayClient::new(
                cfg.relay.max_attempts,
                cfg.relay.backoff_ms,
                cfg.relay.timeout_ms,
            )?,
            hours,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.relay_url.is_some() || has_route(&self.routing)
    }

    pub async fn dispatch(&self, alert: &AlertPayload, now: DateTime<Utc>) -> DispatchOutcome {
        let target = resolve_target(&self.routing, &alert.sector, &alert.key);
        let mut attempts = Vec::new();

        if let Some(AlertTarget::Message(msg_target)) = &target {
            let result = match &self.messenger {
                Some(messenger) => {
                    messenger
                        .send_text(msg_target, &format_alert_text(alert, now, &self.hours))
                        .await
                }
                None => Err("messaging not configured".to_string()),
            };
            let ok = result.is_ok();
            if let Err(e) = &result {
                warn!(
                    key = %alert.key,
                    target = %target_label(&target),
                    error = %e,
                    "direct alert failed"
                );
            }
            attempts.push(MechanismAttempt {
                mechanism: "direct",
                attempts: 1,
                ok,
                error: result.err(),
            });
            if ok {
                return self.finish(alert, target, attempts);
            }
        }

        let relay_url = match &target {
            Some(AlertTarget::Webhook(url)) => Some(url.clone()),
            _ => self.relay_url.clone(),
        };
        if let Some(url) = relay_url {
            let body = to_relay_alert(alert, now, &self.hours);
            let result = self.relay.post(&url, &alert.event_id, &body).await;
            let attempt = match result {
                Ok(n) => MechanismAttempt {
                    mechanism: "relay",
                    attempts: n,
                    ok: true,
                    error: None,
                },
                Err((n, e)) => {
                    warn!(
                        key = %alert.key,
                        url = %url,
                        attempts = n,
                        error = %e,
                        "relay alert failed"
                    );
                    MechanismAttempt {
                        mechanism: "relay",
                        attempts: n,
                        ok: false,
                        error: Some(e),
                    }
                }
            };
            let ok = attempt.ok;
            attempts.push(attempt);
            if ok {
                return self.finish(alert, Some(AlertTarget::Webhook(url)), attempts);
            }
        }

        if attempts.is_empty() {
            warn!(key = %alert.key, sector = %alert.sector, "no alert target configured");
        }
        self.finish(alert, target, attempts)
    }

    fn finish(
        &self,
        alert: &AlertPayload,
        target: Option<AlertTarget>,
        attempts: Vec<MechanismAttempt>,
    ) -> DispatchOutcome {
        let success = attempts.iter().any(|a| a.ok);
        if success {
            info!(
                key = %alert.key,
                event_id = %alert.event_id,
                target = %target_label(&target),
                idle_minutes = alert.idle_minutes,
                "unattended alert sent"
            );
        }
        DispatchOutcome {
            success,
            target: target.map(|t| t.label()),
            attempts,
        }
    }
}

fn target_label(target: &Option<AlertTarget>) -> String {
    target
        .as_ref()
        .map(AlertTarget::label)
        .unwrap_or_else(|| "none".to_string())
}
