use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use attendwatch_config::Config;
use attendwatch_server::{build_app_with, AppDeps, Clock, MessageTarget, Messenger};
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::util::ServiceExt;

const ADMIN: &str = "s3cret";

#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(MessageTarget, String)>>,
    failing: AtomicBool,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl RecordingMessenger {
    fn sent(&self) -> Vec<(MessageTarget, String)> {
        self.sent.lock().unwrap().clone()
    }

    // Holds the next send until the gate is released.
    fn hold_next(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, target: &MessageTarget, text: &str) -> Result<(), String> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err("vendor unavailable".to_string());
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.clone(), text.to_string()));
        Ok(())
    }
}

struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    fn new(ts: &str) -> Self {
        Self(Arc::new(Mutex::new(at(ts))))
    }

    fn set(&self, ts: &str) {
        *self.0.lock().unwrap() = at(ts);
    }

    fn clock(&self) -> Clock {
        let now = self.0.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

fn at(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.server.listen_addr = "127.0.0.1:0".to_string();
    cfg.business_hours.timezone = "UTC".to_string();
    cfg.admin.token = Some(ADMIN.to_string());
    cfg.routing.fallback_phone = Some("5548988880000".to_string());
    cfg.classifier.manager_ids = vec!["mgr-1".to_string()];
    cfg.classifier
        .agent_names
        .insert("agent-7".to_string(), "Ana Souza".to_string());
    cfg
}

struct Harness {
    app: Router,
    clock: TestClock,
    messenger: Arc<RecordingMessenger>,
}

async fn harness_with(cfg: Config, start: &str) -> Harness {
    let clock = TestClock::new(start);
    let messenger = Arc::new(RecordingMessenger::default());
    let app = build_app_with(
        cfg,
        AppDeps {
            clock: clock.clock(),
            messenger: Some(messenger.clone() as Arc<dyn Messenger>),
        },
    )
    .await
    .unwrap();
    Harness {
        app,
        clock,
        messenger,
    }
}

async fn harness(start: &str) -> Harness {
    harness_with(test_config(), start).await
}

async fn call_app(app: Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-admin-token", ADMIN)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

impl Harness {
    async fn call(&self, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
        call_app(self.app.clone(), method, uri, body).await
    }

    async fn webhook(&self, payload: Value) -> Value {
        let (status, body) = self
            .call("POST", "/api/webhook/utalk", Body::from(payload.to_string()))
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    async fn sweep_at(&self, ts: &str) -> u64 {
        self.clock.set(ts);
        let (status, body) = self
            .call("POST", "/api/webhook/utalk/sweep", Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        body["alertsSent"].as_u64().unwrap()
    }

    async fn debug(&self) -> Value {
        let (status, body) = self
            .call("GET", "/api/webhook/utalk/debug", Body::empty())
            .await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

fn chat_event(source: &str, text: &str, member: Option<&str>) -> Value {
    let mut last = json!({"Source": source, "Content": text});
    if let Some(id) = member {
        last["SentByOrganizationMember"] = json!({"Id": id});
    }
    json!({
        "Type": "Message",
        "EventId": "evt-1",
        "Payload": {
            "Type": "Chat",
            "Content": {
                "Id": "chat-1",
                "Contact": {"PhoneNumber": "+55 48 99999-0000", "Name": "Maria"},
                "Sector": {"Name": "Vendas"},
                "LastMessage": last
            }
        }
    })
}

fn customer(text: &str) -> Value {
    chat_event("Contact", text, None)
}

#[tokio::test]
async fn healthz_ok() {
    let h = harness("2026-10-19T10:00:00Z").await;
    let (status, _) = h.call("GET", "/v1/healthz", Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_require_matching_token() {
    let h = harness("2026-10-19T10:00:00Z").await;
    let unauthenticated = |uri: &str, headers: HeaderMap| {
        let mut builder = Request::builder().method("POST").uri(uri);
        for (k, v) in headers.iter() {
            builder = builder.header(k, v);
        }
        builder.body(Body::empty()).unwrap()
    };

    let response = h
        .app
        .clone()
        .oneshot(unauthenticated("/api/webhook/utalk/sweep", HeaderMap::new()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut wrong = HeaderMap::new();
    wrong.insert("x-admin-token", "nope".parse().unwrap());
    let response = h
        .app
        .clone()
        .oneshot(unauthenticated("/api/webhook/utalk/sweep", wrong))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .app
        .clone()
        .oneshot(unauthenticated(
            &format!("/api/webhook/utalk/sweep?token={ADMIN}"),
            HeaderMap::new(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_surface_is_disabled_without_token() {
    let mut cfg = test_config();
    cfg.admin.token = None;
    let h = harness_with(cfg, "2026-10-19T10:00:00Z").await;
    let (status, body) = h
        .call("GET", "/api/webhook/utalk/debug", Body::empty())
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "admin_disabled");
}

#[tokio::test]
async fn malformed_json_is_rejected_but_unknown_shapes_are_acknowledged() {
    let h = harness("2026-10-19T10:00:00Z").await;
    let (status, body) = h
        .call("POST", "/api/webhook/utalk", Body::from("{not json"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let ack = h.webhook(json!({"hello": "world", "id": "x-1"})).await;
    assert_eq!(ack["received"], true);
    assert_eq!(ack["eventId"], "x-1");

    let debug = h.debug().await;
    assert_eq!(debug["recentSkips"][0]["reason"], "unrecognized_envelope");
    assert_eq!(debug["conversationCount"], 0);
}

#[tokio::test]
async fn alerts_once_per_waiting_period() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("preciso de ajuda com meu pedido")).await;

    assert_eq!(h.sweep_at("2026-10-19T10:16:00Z").await, 1);
    assert_eq!(h.sweep_at("2026-10-19T10:17:00Z").await, 0);

    h.clock.set("2026-10-19T10:20:00Z");
    h.webhook(customer("alguém pode me responder?")).await;
    assert_eq!(h.sweep_at("2026-10-19T10:30:00Z").await, 0);
    assert_eq!(h.sweep_at("2026-10-19T10:36:00Z").await, 1);

    let sent = h.messenger.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0].0,
        MessageTarget::Phone("5548988880000".to_string())
    );
    assert!(sent[0].1.contains("*Cliente:* Maria"));
    assert!(sent[0].1.contains("16 minutos"));

    let debug = h.debug().await;
    assert_eq!(debug["stats"]["totalAlertsSent"], 2);
    assert_eq!(debug["stats"]["byDay"]["2026-10-19"], 2);
    assert_eq!(debug["stats"]["byTarget"]["phone:5548988880000"], 2);
}

#[tokio::test]
async fn human_reply_suppresses_alert_but_bot_reply_does_not() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    h.clock.set("2026-10-19T10:02:00Z");
    h.webhook(chat_event("Bot", "Olá! Seja bem-vindo. Digite uma opção", None))
        .await;
    h.webhook(chat_event("Member", "Vou verificar", Some("mgr-1")))
        .await;
    assert_eq!(h.sweep_at("2026-10-19T10:20:00Z").await, 1);

    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    h.clock.set("2026-10-19T10:05:00Z");
    h.webhook(chat_event("Member", "Oi Maria, já verifico", Some("agent-7")))
        .await;
    assert_eq!(h.sweep_at("2026-10-19T10:20:00Z").await, 0);

    let debug = h.debug().await;
    let conv = &debug["conversations"][0];
    assert_eq!(conv["humanAttended"], true);
    assert_eq!(conv["agentName"], "Ana Souza");
}

#[tokio::test]
async fn ender_phrase_closes_conversation() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    h.clock.set("2026-10-19T10:05:00Z");
    h.webhook(customer("Obrigado!")).await;
    assert_eq!(h.debug().await["conversationCount"], 0);
    assert_eq!(h.sweep_at("2026-10-19T10:20:00Z").await, 0);
}

#[tokio::test]
async fn ender_on_overdue_conversation_still_alerts_when_configured() {
    let mut cfg = test_config();
    cfg.monitor.ender_clears_pending = false;
    let h = harness_with(cfg, "2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    h.clock.set("2026-10-19T10:20:00Z");
    h.webhook(customer("Obrigado!")).await;

    for _ in 0..100 {
        if !h.messenger.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.messenger.sent().len(), 1);
    let debug = h.debug().await;
    assert_eq!(debug["recentSkips"][0]["reason"], "ender_pending_alert");
    assert_eq!(debug["conversationCount"], 1);
}

#[tokio::test]
async fn internal_conversations_are_never_armed() {
    let h = harness("2026-10-19T10:00:00Z").await;
    let mut event = customer("oi");
    event["Payload"]["Content"]["Sector"]["Name"] = json!("🤍 Equipe Interna");
    h.webhook(event).await;
    assert_eq!(h.sweep_at("2026-10-19T10:30:00Z").await, 0);
    let debug = h.debug().await;
    assert_eq!(debug["conversationCount"], 0);
    assert_eq!(debug["recentSkips"][0]["reason"], "internal_conversation");
}

#[tokio::test]
async fn waits_beyond_the_cap_are_not_alerted() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    assert_eq!(h.sweep_at("2026-10-19T11:00:00Z").await, 0);
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn weekend_messages_create_no_state() {
    let h = harness("2026-10-17T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    assert_eq!(h.debug().await["conversationCount"], 0);
    assert_eq!(h.sweep_at("2026-10-19T10:30:00Z").await, 0);
}

#[tokio::test]
async fn failed_dispatch_is_retried_on_next_sweep() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;

    h.messenger.failing.store(true, Ordering::SeqCst);
    assert_eq!(h.sweep_at("2026-10-19T10:16:00Z").await, 0);
    let debug = h.debug().await;
    assert_eq!(debug["stats"]["failedAlerts"], 1);
    assert_eq!(debug["conversations"][0]["alertedAt"], Value::Null);

    h.messenger.failing.store(false, Ordering::SeqCst);
    assert_eq!(h.sweep_at("2026-10-19T10:17:00Z").await, 1);
    assert_eq!(h.sweep_at("2026-10-19T10:18:00Z").await, 0);
}

#[tokio::test]
async fn ingestion_check_alerts_overdue_conversation() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    h.clock.set("2026-10-19T10:20:00Z");
    h.webhook(chat_event("Bot", "Nosso horário de atendimento é 8h às 18h", None))
        .await;

    for _ in 0..100 {
        if !h.messenger.sent().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.messenger.sent().len(), 1);
    assert_eq!(h.sweep_at("2026-10-19T10:21:00Z").await, 0);
}

#[tokio::test]
async fn inbound_during_delivery_keeps_marker_unset() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;

    let gate = h.messenger.hold_next();
    h.clock.set("2026-10-19T10:16:00Z");
    let sweep = tokio::spawn(call_app(
        h.app.clone(),
        "POST",
        "/api/webhook/utalk/sweep",
        Body::empty(),
    ));
    gate.entered.notified().await;

    h.clock.set("2026-10-19T10:16:30Z");
    h.webhook(customer("ainda estou aguardando")).await;
    gate.release.notify_one();

    let (status, body) = sweep.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alertsSent"], 1);

    let debug = h.debug().await;
    let conv = &debug["conversations"][0];
    assert_eq!(conv["alertedAt"], Value::Null);
    assert_eq!(conv["lastInboundAt"], "2026-10-19T10:16:30.000Z");

    assert_eq!(h.sweep_at("2026-10-19T10:25:00Z").await, 0);
    assert_eq!(h.sweep_at("2026-10-19T10:32:00Z").await, 1);
    assert_eq!(h.messenger.sent().len(), 2);
}

#[tokio::test]
async fn sweep_evicts_conversations_past_retention() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;

    assert_eq!(h.sweep_at("2026-10-19T15:59:00Z").await, 0);
    assert_eq!(h.debug().await["conversationCount"], 1);

    assert_eq!(h.sweep_at("2026-10-19T16:01:00Z").await, 0);
    assert_eq!(h.debug().await["conversationCount"], 0);
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn debug_snapshot_redacts_phone_and_reports_elapsed() {
    let h = harness("2026-10-19T10:00:00Z").await;
    h.webhook(customer("preciso de ajuda")).await;
    h.clock.set("2026-10-19T10:07:30Z");

    let debug = h.debug().await;
    assert_eq!(debug["isBusinessHours"], true);
    assert_eq!(debug["businessHours"], "8h-18h");
    assert_eq!(debug["recentWebhooks"][0]["key"], "chat-1");
    let conv = &debug["conversations"][0];
    assert_eq!(conv["key"], "chat-1");
    assert_eq!(conv["phone"], "*********0000");
    assert_eq!(conv["sector"], "Vendas");
    assert_eq!(conv["businessElapsedMinutes"], 7);
    assert_eq!(conv["humanAttended"], false);
    assert_eq!(conv["history"][0]["excerpt"], "preciso de ajuda");
    assert_eq!(
        conv["link"],
        "https://app-utalk.umbler.com/chats/chat-1"
    );
}

#[tokio::test]
async fn test_alert_endpoint_reports_outcome() {
    let h = harness("2026-10-19T10:00:00Z").await;
    let (status, body) = h
        .call(
            "POST",
            "/api/test/send-alert",
            Body::from(
                json!({"clientName": "João", "attendantName": "Ana", "idleMinutes": 22})
                    .to_string(),
            ),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["target"], "phone:5548988880000");
    let text = &h.messenger.sent()[0].1;
    assert!(text.contains("*Cliente:* João"));
    assert!(text.contains("*Atendente Responsável:* Ana"));
    assert!(text.contains("22 minutos"));
}

#[derive(Default)]
struct RelayLog {
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, String, Value)>>,
}

async fn spawn_relay(fail_first: usize) -> (String, Arc<RelayLog>) {
    let log = Arc::new(RelayLog::default());
    let handler_log = log.clone();
    let app = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap, body: axum::Json<Value>| {
            let log = handler_log.clone();
            async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                log.seen
                    .lock()
                    .unwrap()
                    .push((header("x-attempt"), header("x-event-id"), body.0));
                if log.calls.fetch_add(1, Ordering::SeqCst) < fail_first {
                    StatusCode::INTERNAL_SERVER_ERROR
                } else {
                    StatusCode::OK
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), log)
}

fn relay_only_config(url: String) -> Config {
    let mut cfg = test_config();
    cfg.routing.fallback_phone = None;
    cfg.relay.webhook_url = Some(url);
    cfg.relay.backoff_ms = 10;
    cfg
}

#[tokio::test]
async fn relay_is_retried_with_stable_event_id() {
    let (url, log) = spawn_relay(2).await;
    let h = harness_with(relay_only_config(url), "2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;

    assert_eq!(h.sweep_at("2026-10-19T10:16:00Z").await, 1);
    let seen = log.seen.lock().unwrap().clone();
    let attempts: Vec<&str> = seen.iter().map(|(a, _, _)| a.as_str()).collect();
    assert_eq!(attempts, vec!["1", "2", "3"]);
    assert!(seen.iter().all(|(_, id, _)| id == &seen[0].1));
    assert!(seen[0].1.starts_with("ALERT_"));
    assert_eq!(seen[0].2["Type"], "ClientUnattended");
    assert_eq!(seen[0].2["Payload"]["Content"]["ConversationId"], "chat-1");
    assert_eq!(seen[0].2["Payload"]["Content"]["IdleMinutes"], 16);
}

#[tokio::test]
async fn relay_exhaustion_counts_as_failure() {
    let (url, log) = spawn_relay(usize::MAX).await;
    let h = harness_with(relay_only_config(url), "2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;

    assert_eq!(h.sweep_at("2026-10-19T10:16:00Z").await, 0);
    assert_eq!(log.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.debug().await["stats"]["failedAlerts"], 1);
}

#[tokio::test]
async fn sweep_without_any_target_sends_nothing() {
    let mut cfg = test_config();
    cfg.routing.fallback_phone = None;
    let h = harness_with(cfg, "2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    assert_eq!(h.sweep_at("2026-10-19T10:16:00Z").await, 0);
    assert!(h.messenger.sent().is_empty());
    assert_eq!(h.debug().await["alertTargetConfigured"], false);
}

#[tokio::test]
async fn blank_alert_chat_is_not_a_target() {
    let mut cfg = test_config();
    cfg.routing.fallback_phone = None;
    cfg.routing.alert_chat_id = Some("  ".to_string());
    let h = harness_with(cfg, "2026-10-19T10:00:00Z").await;
    h.webhook(customer("oi")).await;
    assert_eq!(h.sweep_at("2026-10-19T10:16:00Z").await, 0);

    let debug = h.debug().await;
    assert_eq!(debug["alertTargetConfigured"], false);
    assert_eq!(debug["stats"]["failedAlerts"], 0);
}
