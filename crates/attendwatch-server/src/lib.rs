pub mod dispatch;
pub mod ingest;
pub mod stats;
pub mod sweep;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use attendwatch_config::Config;
use attendwatch_contracts::DEFAULT_SECTOR;
use attendwatch_kernel::{
    is_attended, stable_alert_event_id, AlertPayload, BusinessHours, ClassifierRules,
    PatternTables, PolicyConfig,
};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use dispatch::{DispatchOutcome, Dispatcher, HttpMessenger, MessageTarget, Messenger};
pub use ingest::{IngestOutcome, Ingestor};
pub use stats::{AlertStats, EventJournal};
pub use sweep::{SweepTask, Sweeper, Tracker};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

const RECENT_HISTORY: usize = 5;

#[derive(Clone)]
pub struct AppDeps {
    pub clock: Clock,
    pub messenger: Option<Arc<dyn Messenger>>,
}

impl AppDeps {
    pub fn from_config(cfg: &Config) -> Result<Self, String> {
        let messenger = HttpMessenger::from_config(&cfg.messaging)?
            .map(|m| Arc::new(m) as Arc<dyn Messenger>);
        Ok(Self {
            clock: system_clock(),
            messenger,
        })
    }
}

pub fn compile_tables(cfg: &Config) -> Result<PatternTables, String> {
    PatternTables::compile(&ClassifierRules {
        bot_sender_id: cfg.classifier.bot_sender_id.clone(),
        manager_ids: cfg.classifier.manager_ids.clone(),
        bot_patterns: cfg.classifier.bot_patterns.clone(),
        ender_patterns: cfg.classifier.ender_patterns.clone(),
        internal_keywords: cfg.classifier.internal_keywords.clone(),
        internal_emojis: cfg.classifier.internal_emojis.clone(),
    })
}

pub fn policy_config(cfg: &Config) -> Result<PolicyConfig, String> {
    let idle_threshold = i64::try_from(cfg.monitor.idle_ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .ok_or_else(|| format!("monitor.idle_ms={} is out of range", cfg.monitor.idle_ms))?;
    let max_alert_window = i64::try_from(cfg.monitor.max_alert_minutes)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(|| {
            format!(
                "monitor.max_alert_minutes={} is out of range",
                cfg.monitor.max_alert_minutes
            )
        })?;
    Ok(PolicyConfig {
        idle_threshold,
        max_alert_window,
        attendance: cfg.monitor.attendance_policy,
    })
}

fn retention_window(cfg: &Config) -> Result<chrono::Duration, String> {
    i64::try_from(cfg.monitor.retention_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| {
            format!(
                "monitor.retention_hours={} is out of range",
                cfg.monitor.retention_hours
            )
        })
}

pub async fn serve(cfg: Config) -> Result<(), String> {
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;

    let deps = AppDeps::from_config(&cfg)?;
    let period = Duration::from_millis(cfg.monitor.sweep_interval_ms);
    let state = AppState::new(cfg, deps.clone())?;
    let task = SweepTask::spawn(state.sweeper.clone(), period, deps.clock);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;
    info!(%addr, "attendwatch listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("serve failed: {e}"));
    task.stop().await;
    served
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

pub async fn build_app(cfg: Config) -> Result<Router, String> {
    let deps = AppDeps::from_config(&cfg)?;
    build_app_with(cfg, deps).await
}

pub async fn build_app_with(cfg: Config, deps: AppDeps) -> Result<Router, String> {
    Ok(router(AppState::new(cfg, deps)?))
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/api/webhook/utalk", post(webhook))
        .route("/api/webhook/utalk/sweep", post(sweep))
        .route("/api/webhook/utalk/debug", get(debug_snapshot))
        .route("/api/test/send-alert", post(send_test_alert))
        .with_state(state)
}

#[derive(Clone)]
struct AppState {
    admin_token: Option<String>,
    link_base: String,
    clock: Clock,
    hours: BusinessHours,
    tables: Arc<PatternTables>,
    policy: PolicyConfig,
    tracker: Arc<Mutex<Tracker>>,
    journal: Arc<Mutex<EventJournal>>,
    stats: Arc<Mutex<AlertStats>>,
    ingestor: Arc<Ingestor>,
    sweeper: Sweeper,
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    fn new(cfg: Config, deps: AppDeps) -> Result<Self, String> {
        let hours = BusinessHours::new(
            &cfg.business_hours.timezone,
            cfg.business_hours.start_hour,
            cfg.business_hours.end_hour,
        )?;
        let tables = Arc::new(compile_tables(&cfg)?);
        let policy = policy_config(&cfg)?;
        let retention = retention_window(&cfg)?;
        let tracker = Arc::new(Mutex::new(Tracker::new(cfg.monitor.history_limit)));
        let journal = Arc::new(Mutex::new(EventJournal::default()));
        let stats = Arc::new(Mutex::new(AlertStats::default()));
        let dispatcher = Arc::new(Dispatcher::new(&cfg, hours, deps.messenger)?);
        let sweeper = Sweeper::new(
            tracker.clone(),
            tables.clone(),
            hours,
            policy,
            retention,
            dispatcher.clone(),
            stats.clone(),
        );
        let ingestor = Arc::new(Ingestor::new(
            &cfg,
            tracker.clone(),
            journal.clone(),
            tables.clone(),
            hours,
            policy,
        ));
        if !dispatcher.is_configured() {
            info!("no alert target configured; alerts will be skipped");
        }
        Ok(Self {
            admin_token: cfg.admin.token.clone(),
            link_base: cfg.messaging.conversation_link_base.clone(),
            clock: deps.clock,
            hours,
            tables,
            policy,
            tracker,
            journal,
            stats,
            ingestor,
            sweeper,
            dispatcher,
        })
    }

    fn authorize_admin(
        &self,
        headers: &HeaderMap,
        query: &AdminQuery,
    ) -> Result<(), (StatusCode, Json<Value>)> {
        let Some(expected) = self.admin_token.as_deref() else {
            return Err(error_body(
                StatusCode::FORBIDDEN,
                "admin_disabled",
                "admin token is not configured",
            ));
        };
        let provided = headers
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .or(query.token.as_deref());
        if provided != Some(expected) {
            return Err(error_body(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid admin token",
            ));
        }
        Ok(())
    }
}

fn error_body(status: StatusCode, code: &str, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"error": {"code": code, "message": message}})),
    )
}

fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Default, Deserialize)]
struct AdminQuery {
    token: Option<String>,
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let raw: Value = serde_json::from_slice(&body).map_err(|e| {
        error_body(
            StatusCode::BAD_REQUEST,
            "validation_error",
            &format!("body is not valid JSON: {e}"),
        )
    })?;
    let now = (state.clock)();

    let outcome = state.ingestor.ingest(&raw, now).await;
    if let IngestOutcome::Tracked { key } | IngestOutcome::Pending { key } = outcome {
        let sweeper = state.sweeper.clone();
        tokio::spawn(async move {
            sweeper.check_one(&key, now).await;
        });
    }

    Ok(Json(json!({
        "received": true,
        "eventId": ingest::raw_event_id(&raw),
        "timestamp": stamp(now),
    })))
}

async fn sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.authorize_admin(&headers, &query)?;
    let sent = state.sweeper.sweep_once((state.clock)()).await;
    Ok(Json(json!({"success": true, "alertsSent": sent})))
}

async fn debug_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.authorize_admin(&headers, &query)?;
    let now = (state.clock)();

    let mut conversations = Vec::new();
    {
        let tracker = state.tracker.lock().await;
        let mut keys = tracker.conversations.keys();
        keys.sort();
        for key in keys {
            let Some(conv) = tracker.conversations.get(&key) else {
                continue;
            };
            let elapsed = state
                .hours
                .business_elapsed(conv.last_inbound_at, Some(now));
            let history: Vec<Value> = conv
                .history()
                .iter()
                .rev()
                .take(RECENT_HISTORY)
                .rev()
                .map(|h| {
                    json!({
                        "at": stamp(h.at),
                        "direction": h.direction.as_str(),
                        "agentId": h.agent_id,
                        "agentName": h.agent_name,
                        "excerpt": h.excerpt,
                        "isAutomated": h.is_automated,
                    })
                })
                .collect();
            conversations.push(json!({
                "key": key,
                "conversationId": conv.meta.conversation_id,
                "phone": conv.meta.phone.as_deref().map(redact_phone),
                "name": conv.meta.name,
                "sector": conv.meta.sector,
                "agentName": conv.meta.agent_name,
                "tags": conv.meta.tags,
                "link": conv.meta.link,
                "lastMessage": conv.meta.last_message_excerpt,
                "lastInboundAt": conv.last_inbound_at.map(stamp),
                "lastOutboundAt": conv.last_outbound_at.map(stamp),
                "alertedAt": conv.alerted_at.map(stamp),
                "businessElapsedMinutes": elapsed.num_minutes(),
                "humanAttended": is_attended(conv, &state.tables, state.policy.attendance),
                "alertInFlight": tracker.is_in_flight(&key),
                "history": history,
            }));
        }
    }

    let (recent_webhooks, recent_skips) = {
        let journal = state.journal.lock().await;
        (
            journal.received().cloned().collect::<Vec<_>>(),
            journal.skipped().cloned().collect::<Vec<_>>(),
        )
    };
    let stats = state.stats.lock().await.clone();

    Ok(Json(json!({
        "timestamp": stamp(now),
        "isBusinessHours": state.hours.is_business_moment(now),
        "businessHours": state.hours.label(),
        "timezone": state.hours.timezone().name(),
        "alertTargetConfigured": state.dispatcher.is_configured(),
        "conversationCount": conversations.len(),
        "conversations": conversations,
        "recentWebhooks": recent_webhooks,
        "stats": stats,
        "recentSkips": recent_skips,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TestAlertInput {
    conversation_id: Option<String>,
    client_name: Option<String>,
    attendant_name: Option<String>,
    idle_minutes: Option<i64>,
    sector: Option<String>,
    tags: Vec<String>,
}

async fn send_test_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AdminQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    state.authorize_admin(&headers, &query)?;
    let input: TestAlertInput = if body.iter().all(u8::is_ascii_whitespace) {
        TestAlertInput::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            error_body(
                StatusCode::BAD_REQUEST,
                "validation_error",
                &format!("invalid test alert body: {e}"),
            )
        })?
    };

    let now = (state.clock)();
    let key = input
        .conversation_id
        .clone()
        .unwrap_or_else(|| "TEST_ALERT".to_string());
    let alert = AlertPayload {
        event_id: stable_alert_event_id(&key, now),
        link: input
            .conversation_id
            .as_deref()
            .map(|id| format!("{}{id}", state.link_base)),
        conversation_id: input.conversation_id,
        client_name: input.client_name.or_else(|| Some("Cliente Teste".to_string())),
        agent_id: None,
        agent_name: input.attendant_name,
        sector: input
            .sector
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SECTOR.to_string()),
        idle_minutes: input.idle_minutes.unwrap_or(16),
        tags: input.tags,
        key,
    };
    debug!(key = %alert.key, "dispatching test alert");
    let outcome = state.dispatcher.dispatch(&alert, now).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    Ok((
        status,
        Json(json!({
            "success": outcome.success,
            "eventId": alert.event_id,
            "target": outcome.target,
            "attempts": outcome.attempts,
        })),
    ))
}

fn redact_phone(phone: &str) -> String {
    let len = phone.chars().count();
    let visible = len.min(4);
    let tail: String = phone.chars().skip(len - visible).collect();
    format!("{}{tail}", "*".repeat(len - visible))
}
