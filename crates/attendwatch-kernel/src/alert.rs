use attendwatch_contracts::{
    RelayAlert, RelayAlertContent, RelayAlertPayload, DEFAULT_SECTOR, RELAY_ALERT_TYPE,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;

use crate::business_hours::BusinessHours;
use crate::stable_alert_event_id;
use crate::state::ConversationState;

pub const UNKNOWN_CLIENT: &str = "Nome não informado";
pub const UNKNOWN_AGENT: &str = "Sistema Automático";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub key: String,
    pub conversation_id: Option<String>,
    pub client_name: Option<String>,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub sector: String,
    pub idle_minutes: i64,
    pub link: Option<String>,
    pub tags: Vec<String>,
    pub event_id: String,
}

impl AlertPayload {
    pub fn from_state(
        key: &str,
        state: &ConversationState,
        elapsed: Duration,
        based_on: DateTime<Utc>,
    ) -> Self {
        let meta = &state.meta;
        Self {
            key: key.to_string(),
            conversation_id: meta.conversation_id.clone(),
            client_name: meta.name.clone(),
            agent_id: meta.agent_id.clone(),
            agent_name: meta.agent_name.clone(),
            sector: if meta.sector.is_empty() {
                DEFAULT_SECTOR.to_string()
            } else {
                meta.sector.clone()
            },
            idle_minutes: elapsed.num_minutes(),
            link: meta.link.clone(),
            tags: meta.tags.clone(),
            event_id: stable_alert_event_id(key, based_on),
        }
    }

    pub fn client_label(&self) -> &str {
        self.client_name.as_deref().unwrap_or(UNKNOWN_CLIENT)
    }

    pub fn agent_label(&self) -> &str {
        self.agent_name.as_deref().unwrap_or(UNKNOWN_AGENT)
    }
}

pub fn format_alert_text(
    alert: &AlertPayload,
    now: DateTime<Utc>,
    hours: &BusinessHours,
) -> String {
    let local = now.with_timezone(&hours.timezone());
    let chat_id = alert.conversation_id.as_deref().unwrap_or(&alert.key);
    let link = alert.link.as_deref().unwrap_or("Não disponível");
    let minutes = alert.idle_minutes;

    let mut text = String::from("🚨 *CLIENTE NÃO ATENDIDO*\n\n");
    text.push_str(&format!("👤 *Cliente:* {}\n", alert.client_label()));
    text.push_str(&format!("💬 *Chat ID:* {chat_id}\n"));
    text.push_str(&format!("🧑‍💼 *Atendente Responsável:* {}\n", alert.agent_label()));
    text.push_str(&format!("📍 *Setor:* {}\n", alert.sector));
    text.push_str(&format!(
        "⏱️ *Tempo aguardando:* {minutes} minutos (horário comercial)\n"
    ));
    text.push_str(&format!("🔗 *Link:* {link}\n"));
    text.push_str(&format!(
        "📅 *Data/Hora:* {}\n\n",
        local.format("%d/%m/%Y %H:%M:%S")
    ));
    text.push_str(&format!(
        "⚠️ *Cliente aguarda atendimento humano há {minutes} minutos*\n\n"
    ));
    text.push_str(&format!("_Alerta automático - Horário: {}_", hours.label()));
    text
}

pub fn to_relay_alert(
    alert: &AlertPayload,
    now: DateTime<Utc>,
    hours: &BusinessHours,
) -> RelayAlert {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    RelayAlert {
        kind: RELAY_ALERT_TYPE.to_string(),
        event_date: stamp.clone(),
        event_id: alert.event_id.clone(),
        payload: RelayAlertPayload {
            kind: "Alert".to_string(),
            content: RelayAlertContent {
                id: alert.event_id.clone(),
                conversation_id: alert.conversation_id.clone(),
                client_name: alert.client_label().to_string(),
                attendant_name: alert.agent_label().to_string(),
                sector: alert.sector.clone(),
                idle_minutes: alert.idle_minutes,
                link: alert.link.clone(),
                tags: alert.tags.clone(),
                business_hours: hours.label(),
                timestamp: stamp,
            },
        },
    }
}
