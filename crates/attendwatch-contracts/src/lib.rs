use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const BOT_SENDER_ID: &str = "BOT_SYSTEM";

pub const DEFAULT_SECTOR: &str = "Geral";

pub const RELAY_ALERT_TYPE: &str = "ClientUnattended";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in" | "inbound" | "message-in" | "incoming" => Some(Direction::Inbound),
            "out" | "outbound" | "message-out" | "outgoing" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendancePolicy {
    HumanReply,
    AnyReply,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectionFallback {
    AgentPresence,
    Inbound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationEvent {
    pub conversation_id: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub direction: Direction,
    pub agent_id: Option<String>,
    pub text: Option<String>,
    pub sector: String,
    pub is_private: bool,
    pub is_internal: bool,
    pub is_automated: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_event_id: Option<String>,
    pub source_event_date: Option<String>,
}

impl ConversationEvent {
    pub fn natural_key(&self) -> Option<&str> {
        self.conversation_id
            .as_deref()
            .filter(|v| !v.is_empty())
            .or(self.phone.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Text(v) => v.clone(),
            Scalar::Number(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SectorField {
    Named {
        #[serde(rename = "Name", alias = "name")]
        name: Option<String>,
    },
    Plain(String),
}

impl SectorField {
    pub fn name(&self) -> Option<&str> {
        match self {
            SectorField::Named { name } => name.as_deref(),
            SectorField::Plain(v) => Some(v.as_str()),
        }
        .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagField {
    Named {
        #[serde(rename = "Name", alias = "name")]
        name: Option<String>,
    },
    Plain(String),
}

impl TagField {
    pub fn name(&self) -> &str {
        match self {
            TagField::Named { name } => name.as_deref().unwrap_or(""),
            TagField::Plain(v) => v,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone)]
pub enum WebhookEnvelope {
    ChatSnapshot(ChatSnapshotEnvelope),
    FlatMessage(FlatMessageEnvelope),
}

impl WebhookEnvelope {
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.contains_key("Payload") || obj.contains_key("Type") {
            return serde_json::from_value(value.clone())
                .ok()
                .map(WebhookEnvelope::ChatSnapshot);
        }
        if obj.get("message").map(|m| m.is_object()).unwrap_or(false) {
            return serde_json::from_value(value.clone())
                .ok()
                .map(WebhookEnvelope::FlatMessage);
        }
        None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSnapshotEnvelope {
    #[serde(rename = "Type", default)]
    pub event_type: Option<String>,
    #[serde(rename = "EventId", default)]
    pub event_id: Option<String>,
    #[serde(rename = "EventDate", default)]
    pub event_date: Option<String>,
    #[serde(rename = "Payload", default)]
    pub payload: Option<ChatPayload>,
    #[serde(rename = "Sector", default)]
    pub sector: Option<SectorField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(rename = "Type", default)]
    pub payload_type: Option<String>,
    #[serde(rename = "Content", default)]
    pub content: Option<ChatContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatContent {
    #[serde(rename = "Id", default)]
    pub id: Option<Scalar>,
    #[serde(rename = "Contact", default)]
    pub contact: Option<ChatContact>,
    #[serde(rename = "Sector", default)]
    pub sector: Option<SectorField>,
    #[serde(rename = "Tags", default, deserialize_with = "null_as_empty")]
    pub tags: Vec<TagField>,
    #[serde(rename = "LastMessage", default)]
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatContact {
    #[serde(rename = "PhoneNumber", default)]
    pub phone_number: Option<Scalar>,
    #[serde(rename = "Phone", default)]
    pub phone: Option<Scalar>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(rename = "Source", default)]
    pub source: Option<String>,
    #[serde(rename = "Content", default)]
    pub content: Option<Value>,
    #[serde(rename = "Text", default)]
    pub text: Option<Value>,
    #[serde(rename = "IsPrivate", default)]
    pub is_private: Option<bool>,
    #[serde(rename = "SentByOrganizationMember", default)]
    pub sent_by_member: Option<MemberRef>,
    #[serde(rename = "Chat", default)]
    pub chat: Option<ChatRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRef {
    #[serde(rename = "Id", default)]
    pub id: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    #[serde(rename = "Id", default)]
    pub id: Option<Scalar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMessageEnvelope {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default, alias = "EventId")]
    pub event_id: Option<String>,
    #[serde(default, alias = "EventDate")]
    pub event_date: Option<String>,
    pub message: FlatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatMessage {
    #[serde(default)]
    pub conversation_id: Option<Scalar>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub from: Option<FlatContact>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attendant_id: Option<String>,
    #[serde(default)]
    pub sector: Option<SectorField>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<TagField>,
    #[serde(default)]
    pub is_private: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatContact {
    #[serde(default)]
    pub phone: Option<Scalar>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayAlert {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "EventDate")]
    pub event_date: String,
    #[serde(rename = "EventId")]
    pub event_id: String,
    #[serde(rename = "Payload")]
    pub payload: RelayAlertPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayAlertPayload {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "Content")]
    pub content: RelayAlertContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelayAlertContent {
    pub id: String,
    pub conversation_id: Option<String>,
    pub client_name: String,
    pub attendant_name: String,
    pub sector: String,
    pub idle_minutes: i64,
    pub link: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub business_hours: String,
    pub timestamp: String,
}
