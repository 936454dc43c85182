use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use attendwatch_contracts::BOT_SENDER_ID;
pub use attendwatch_contracts::{AttendancePolicy, DirectionFallback};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub monitor: Monitor,
    #[serde(default)]
    pub business_hours: BusinessHours,
    #[serde(default)]
    pub admin: Admin,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub relay: Relay,
    #[serde(default)]
    pub messaging: Messaging,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    #[serde(default = "default_idle_ms")]
    pub idle_ms: u64,
    #[serde(default = "default_max_alert_minutes")]
    pub max_alert_minutes: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_attendance_policy")]
    pub attendance_policy: AttendancePolicy,
    #[serde(default = "default_direction_fallback")]
    pub direction_fallback: DirectionFallback,
    #[serde(default = "default_true")]
    pub ender_clears_pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Admin {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Routing {
    #[serde(default)]
    pub sector_managers: BTreeMap<String, String>,
    #[serde(default)]
    pub alert_chat_id: Option<String>,
    #[serde(default)]
    pub fallback_phones: Vec<String>,
    #[serde(default)]
    pub fallback_phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relay {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_relay_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_relay_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_relay_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messaging {
    #[serde(default = "default_messaging_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub from_phone: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_conversation_link_base")]
    pub conversation_link_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    #[serde(default = "default_manager_ids")]
    pub manager_ids: Vec<String>,
    #[serde(default = "default_bot_sender_id")]
    pub bot_sender_id: String,
    #[serde(default = "default_bot_patterns")]
    pub bot_patterns: Vec<String>,
    #[serde(default = "default_ender_patterns")]
    pub ender_patterns: Vec<String>,
    #[serde(default = "default_internal_keywords")]
    pub internal_keywords: Vec<String>,
    #[serde(default = "default_internal_emojis")]
    pub internal_emojis: Vec<String>,
    #[serde(default)]
    pub agent_names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default)]
    pub debug: bool,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            idle_ms: default_idle_ms(),
            max_alert_minutes: default_max_alert_minutes(),
            sweep_interval_ms: default_sweep_interval_ms(),
            retention_hours: default_retention_hours(),
            history_limit: default_history_limit(),
            attendance_policy: default_attendance_policy(),
            direction_fallback: default_direction_fallback(),
            ender_clears_pending: true,
        }
    }
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            timezone: default_timezone(),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_attempts: default_relay_max_attempts(),
            backoff_ms: default_relay_backoff_ms(),
            timeout_ms: default_relay_timeout_ms(),
        }
    }
}

impl Default for Messaging {
    fn default() -> Self {
        Self {
            base_url: default_messaging_base_url(),
            api_token: None,
            organization_id: None,
            from_phone: None,
            timeout_ms: default_timeout_ms(),
            conversation_link_base: default_conversation_link_base(),
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            manager_ids: default_manager_ids(),
            bot_sender_id: default_bot_sender_id(),
            bot_patterns: default_bot_patterns(),
            ender_patterns: default_ender_patterns(),
            internal_keywords: default_internal_keywords(),
            internal_emojis: default_internal_emojis(),
            agent_names: BTreeMap::new(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_idle_ms() -> u64 {
    15 * 60 * 1000
}

fn default_max_alert_minutes() -> u64 {
    60
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_retention_hours() -> u64 {
    6
}

fn default_history_limit() -> usize {
    50
}

fn default_attendance_policy() -> AttendancePolicy {
    AttendancePolicy::HumanReply
}

fn default_direction_fallback() -> DirectionFallback {
    DirectionFallback::AgentPresence
}

fn default_true() -> bool {
    true
}

fn default_start_hour() -> u32 {
    8
}

fn default_end_hour() -> u32 {
    18
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

fn default_relay_max_attempts() -> usize {
    3
}

fn default_relay_backoff_ms() -> u64 {
    1_000
}

// Stays under the 5s acknowledgement window common to chat platforms.
fn default_relay_timeout_ms() -> u64 {
    4_500
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_messaging_base_url() -> String {
    "https://app-utalk.umbler.com/api".to_string()
}

fn default_conversation_link_base() -> String {
    "https://app-utalk.umbler.com/chats/".to_string()
}

fn default_manager_ids() -> Vec<String> {
    Vec::new()
}

fn default_bot_sender_id() -> String {
    BOT_SENDER_ID.to_string()
}

pub fn default_bot_patterns() -> Vec<String> {
    [
        r"(?i)ol[aá].*bem.*vindo",
        r"(?i)como.*posso.*ajudar",
        r"(?i)digite.*op[cç][aã]o",
        r"(?i)selecione.*uma.*op[cç][aã]o",
        r"(?i)menu.*principal",
        r"(?m)^\s*\d+\s*[-.)]\s*\S",
        r"(?i)hor[aá]rio\s+de\s+atendimento",
        r"(?i)fora\s+do\s+(nosso\s+)?hor[aá]rio",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

pub fn default_ender_patterns() -> Vec<String> {
    [
        r"(?i)^(ok|okay|blz|beleza|obrigad[oa]|valeu|tchau|bye|flw|falou)[.!]*$",
        r"(?i)^(entendi|perfeito|certo|show|top|legal|massa)[.!]*$",
        r"^(👍|👌|✅|😊|😉|🙏)[\x{1F3FB}-\x{1F3FF}]?\x{FE0F}?$",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

pub fn default_internal_keywords() -> Vec<String> {
    [
        "interno",
        "internal",
        "staff",
        "equipe",
        "atendente",
        "processos desp laís",
        "autofacil",
        "auto facil",
        "auto fácil",
        "particular florianópolis",
        "auto vistoria",
        "são josé",
        "equipe particular são josé",
        "grupos",
        "lojas",
    ]
    .iter()
    .map(|v| v.to_string())
    .collect()
}

pub fn default_internal_emojis() -> Vec<String> {
    ["🚙", "🚍", "🐨", "🤍"].iter().map(|v| v.to_string()).collect()
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

pub fn load(path: Option<&str>) -> Result<Config, ConfigError> {
    let base = match path {
        Some(p) => load_and_validate(p)?,
        None => Config::default(),
    };
    let cfg = apply_env(base, |key| std::env::var(key).ok())?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

pub fn from_env() -> Result<Config, ConfigError> {
    load(None)
}

pub fn apply_env<F>(mut cfg: Config, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(v) = get("LISTEN_ADDR") {
        cfg.server.listen_addr = v;
    }
    if let Some(v) = get("IDLE_MS") {
        cfg.monitor.idle_ms = parse_number("IDLE_MS", &v)?;
    }
    if let Some(v) = get("MAX_ALERT_MINUTES") {
        cfg.monitor.max_alert_minutes = parse_number("MAX_ALERT_MINUTES", &v)?;
    }
    if let Some(v) = get("SWEEP_INTERVAL_MS") {
        cfg.monitor.sweep_interval_ms = parse_number("SWEEP_INTERVAL_MS", &v)?;
    }
    if let Some(v) = get("RETENTION_HOURS") {
        cfg.monitor.retention_hours = parse_number("RETENTION_HOURS", &v)?;
    }
    if let Some(v) = get("HISTORY_LIMIT") {
        cfg.monitor.history_limit = parse_number("HISTORY_LIMIT", &v)?;
    }
    if let Some(v) = get("ATTENDANCE_POLICY") {
        cfg.monitor.attendance_policy = match v.to_ascii_lowercase().as_str() {
            "human_reply" => AttendancePolicy::HumanReply,
            "any_reply" => AttendancePolicy::AnyReply,
            other => {
                return Err(ConfigError::Parse(format!(
                    "ATTENDANCE_POLICY={other}; expected human_reply or any_reply"
                )))
            }
        };
    }
    if let Some(v) = get("DIRECTION_FALLBACK") {
        cfg.monitor.direction_fallback = match v.to_ascii_lowercase().as_str() {
            "agent_presence" => DirectionFallback::AgentPresence,
            "inbound" => DirectionFallback::Inbound,
            other => {
                return Err(ConfigError::Parse(format!(
                    "DIRECTION_FALLBACK={other}; expected agent_presence or inbound"
                )))
            }
        };
    }
    if let Some(v) = get("ENDER_CLEARS_PENDING") {
        cfg.monitor.ender_clears_pending = parse_bool("ENDER_CLEARS_PENDING", &v)?;
    }
    if let Some(v) = get("BUSINESS_START_HOUR") {
        cfg.business_hours.start_hour = parse_number("BUSINESS_START_HOUR", &v)?;
    }
    if let Some(v) = get("BUSINESS_END_HOUR") {
        cfg.business_hours.end_hour = parse_number("BUSINESS_END_HOUR", &v)?;
    }
    if let Some(v) = get("BUSINESS_TIMEZONE") {
        cfg.business_hours.timezone = v;
    }
    if let Some(v) = get("ADMIN_TOKEN") {
        cfg.admin.token = Some(v);
    }
    if let Some(v) = get("MANAGER_ID") {
        cfg.classifier.manager_ids = split_list(&v);
    }
    if let Some(v) = get("SECTOR_MANAGERS") {
        cfg.routing.sector_managers = parse_pairs("SECTOR_MANAGERS", &v)?;
    }
    if let Some(v) = get("ALERT_CHAT_ID") {
        cfg.routing.alert_chat_id = Some(v);
    }
    if let Some(v) = get("MANAGER_PHONE") {
        let phones = split_list(&v);
        if phones.len() > 1 {
            cfg.routing.fallback_phones = phones;
        } else {
            cfg.routing.fallback_phone = phones.into_iter().next();
        }
    }
    if let Some(v) = get("FALLBACK_PHONES") {
        cfg.routing.fallback_phones = split_list(&v);
    }
    if let Some(v) = get("MANAGER1_WEBHOOK") {
        cfg.relay.webhook_url = Some(v);
    }
    if let Some(v) = get("RELAY_MAX_ATTEMPTS") {
        cfg.relay.max_attempts = parse_number("RELAY_MAX_ATTEMPTS", &v)?;
    }
    if let Some(v) = get("RELAY_BACKOFF_MS") {
        cfg.relay.backoff_ms = parse_number("RELAY_BACKOFF_MS", &v)?;
    }
    if let Some(v) = get("RELAY_TIMEOUT_MS") {
        cfg.relay.timeout_ms = parse_number("RELAY_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("UTALK_BASE_URL") {
        cfg.messaging.base_url = v.trim_end_matches('/').to_string();
    }
    if let Some(v) = get("UTALK_API_TOKEN") {
        cfg.messaging.api_token = Some(v);
    }
    if let Some(v) = get("ORGANIZATION_ID") {
        cfg.messaging.organization_id = Some(v);
    }
    if let Some(v) = get("BUSINESS_PHONE") {
        cfg.messaging.from_phone = Some(v);
    }
    if let Some(v) = get("CONVERSATION_LINK_BASE") {
        cfg.messaging.conversation_link_base = v;
    }
    if let Some(v) = get("BOT_SENDER_ID") {
        cfg.classifier.bot_sender_id = v;
    }
    if let Some(v) = get("INTERNAL_KEYWORDS") {
        cfg.classifier.internal_keywords = split_list(&v);
    }
    if let Some(v) = get("INTERNAL_EMOJIS") {
        cfg.classifier.internal_emojis = split_list(&v);
    }
    if let Some(v) = get("AGENT_NAMES") {
        cfg.classifier.agent_names = parse_pairs("AGENT_NAMES", &v)?;
    }
    if let Some(v) = get("DEBUG") {
        cfg.logging.debug = parse_bool("DEBUG", &v)?;
    }
    Ok(cfg)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::Parse(format!("{key}={raw} is not a valid number")))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse(format!("{key}={raw} is not a boolean"))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

pub fn parse_pairs(key: &str, raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let raw = raw.trim();
    if raw.starts_with('{') {
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)
            .map_err(|e| ConfigError::Parse(format!("{key} is not a JSON object: {e}")))?;
        return Ok(map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k.trim().to_string(), value.trim().to_string())
            })
            .collect());
    }

    let mut out = BTreeMap::new();
    for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').ok_or_else(|| {
            ConfigError::Parse(format!("{key}: entry '{pair}' is not in name=value form"))
        })?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            return Err(ConfigError::Parse(format!(
                "{key}: entry '{pair}' has an empty side"
            )));
        }
        out.insert(k.to_string(), v.to_string());
    }
    Ok(out)
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema_path = [
        std::path::PathBuf::from("config/config.schema.json"),
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .join("config/config.schema.json"),
    ]
    .into_iter()
    .find(|p| p.exists())
    .ok_or_else(|| {
        ConfigError::SchemaLoad(
            "config schema not found at config/config.schema.json or workspace config path"
                .to_string(),
        )
    })?;

    let schema_text =
        std::fs::read_to_string(schema_path).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&schema_text).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;

    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

const MAX_IDLE_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const MAX_ALERT_MINUTES: u64 = 7 * 24 * 60;
const MAX_SWEEP_INTERVAL_MS: u64 = 60 * 60 * 1000;
const MAX_RETENTION_HOURS: u64 = 24 * 365;

pub fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    let hours = &cfg.business_hours;
    if hours.end_hour > 24 || hours.start_hour >= hours.end_hour {
        return Err(ConfigError::UnsupportedConfig(format!(
            "business_hours window {}..{} is invalid; need 0 <= start < end <= 24",
            hours.start_hour, hours.end_hour
        )));
    }
    if hours.timezone.trim().is_empty() {
        return Err(ConfigError::UnsupportedConfig(
            "business_hours.timezone must not be empty".to_string(),
        ));
    }
    if cfg.monitor.idle_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "monitor.idle_ms must be >= 1".to_string(),
        ));
    }
    if cfg.monitor.idle_ms > MAX_IDLE_MS {
        return Err(ConfigError::UnsupportedConfig(format!(
            "monitor.idle_ms={} exceeds {MAX_IDLE_MS}",
            cfg.monitor.idle_ms
        )));
    }
    if cfg.monitor.max_alert_minutes > MAX_ALERT_MINUTES {
        return Err(ConfigError::UnsupportedConfig(format!(
            "monitor.max_alert_minutes={} exceeds {MAX_ALERT_MINUTES}",
            cfg.monitor.max_alert_minutes
        )));
    }
    if cfg.monitor.max_alert_minutes.saturating_mul(60_000) <= cfg.monitor.idle_ms {
        return Err(ConfigError::UnsupportedConfig(format!(
            "monitor.max_alert_minutes={} must exceed the idle threshold of {} ms",
            cfg.monitor.max_alert_minutes, cfg.monitor.idle_ms
        )));
    }
    if !(1_000..=MAX_SWEEP_INTERVAL_MS).contains(&cfg.monitor.sweep_interval_ms) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "monitor.sweep_interval_ms={} is not supported; expected 1000..={MAX_SWEEP_INTERVAL_MS}",
            cfg.monitor.sweep_interval_ms
        )));
    }
    if cfg.monitor.history_limit == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "monitor.history_limit must be >= 1".to_string(),
        ));
    }
    if !(1..=MAX_RETENTION_HOURS).contains(&cfg.monitor.retention_hours) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "monitor.retention_hours={} is not supported; expected 1..={MAX_RETENTION_HOURS}",
            cfg.monitor.retention_hours
        )));
    }
    if !(1..=3).contains(&cfg.relay.max_attempts) {
        return Err(ConfigError::UnsupportedConfig(format!(
            "relay.max_attempts={} is not supported; expected 1..=3",
            cfg.relay.max_attempts
        )));
    }
    if cfg.relay.timeout_ms == 0 || cfg.messaging.timeout_ms == 0 {
        return Err(ConfigError::UnsupportedConfig(
            "relay.timeout_ms and messaging.timeout_ms must be >= 1".to_string(),
        ));
    }
    if let Some(url) = &cfg.relay.webhook_url {
        if !is_http_url(url) {
            return Err(ConfigError::UnsupportedConfig(format!(
                "relay.webhook_url={url} must be an http(s) URL"
            )));
        }
    }
    if cfg.admin.token.as_deref().map(str::is_empty).unwrap_or(false) {
        return Err(ConfigError::UnsupportedConfig(
            "admin.token must not be empty when set".to_string(),
        ));
    }
    Ok(())
}

pub fn is_http_url(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
