use attendwatch_contracts::{
    ChatSnapshotEnvelope, ConversationEvent, Direction, DirectionFallback, FlatMessageEnvelope,
    TagField, WebhookEnvelope, DEFAULT_SECTOR,
};
use serde_json::Value;

use crate::classify::PatternTables;
use crate::digits_only;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnrecognizedEnvelope,
    NotAMessage,
    NotAChat,
    MissingContent,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::UnrecognizedEnvelope => "unrecognized_envelope",
            DropReason::NotAMessage => "not_a_message",
            DropReason::NotAChat => "not_a_chat",
            DropReason::MissingContent => "missing_content",
        }
    }
}

pub fn normalize(
    raw: &Value,
    tables: &PatternTables,
    fallback: DirectionFallback,
) -> Result<ConversationEvent, DropReason> {
    match WebhookEnvelope::from_value(raw) {
        Some(WebhookEnvelope::ChatSnapshot(env)) => from_chat_snapshot(env, tables, fallback),
        Some(WebhookEnvelope::FlatMessage(env)) => from_flat_message(env, tables, fallback),
        None => Err(DropReason::UnrecognizedEnvelope),
    }
}

pub fn infer_direction(fallback: DirectionFallback, agent_id: Option<&str>) -> Direction {
    match fallback {
        DirectionFallback::AgentPresence if agent_id.is_some() => Direction::Outbound,
        _ => Direction::Inbound,
    }
}

struct Extracted {
    conversation_id: Option<String>,
    phone: Option<String>,
    name: Option<String>,
    direction: Direction,
    agent_id: Option<String>,
    text: Option<String>,
    sector: Option<String>,
    is_private: bool,
    tags: Vec<String>,
    source_event_id: Option<String>,
    source_event_date: Option<String>,
}

fn from_chat_snapshot(
    env: ChatSnapshotEnvelope,
    tables: &PatternTables,
    fallback: DirectionFallback,
) -> Result<ConversationEvent, DropReason> {
    if env.event_type.as_deref() != Some("Message") {
        return Err(DropReason::NotAMessage);
    }
    let payload = env.payload.ok_or(DropReason::MissingContent)?;
    if payload.payload_type.as_deref() != Some("Chat") {
        return Err(DropReason::NotAChat);
    }
    let content = payload.content.ok_or(DropReason::MissingContent)?;
    let last = content.last_message.unwrap_or_default();

    let conversation_id = content
        .id
        .map(|v| v.to_text())
        .or_else(|| last.chat.as_ref().and_then(|c| c.id.as_ref()).map(|v| v.to_text()))
        .filter(|v| !v.trim().is_empty());

    let (phone, name) = match content.contact {
        Some(contact) => (
            contact
                .phone_number
                .or(contact.phone)
                .and_then(|p| digits_only(&p.to_text())),
            non_blank(contact.name),
        ),
        None => (None, None),
    };

    let member_id = last.sent_by_member.as_ref().and_then(|m| non_blank(m.id.clone()));
    let (direction, agent_id) = match last.source.as_deref().map(str::to_ascii_lowercase) {
        Some(src) if src == "contact" => (Direction::Inbound, None),
        Some(src) if src == "member" => (Direction::Outbound, member_id),
        Some(src) if src == "bot" => (
            Direction::Outbound,
            Some(tables.bot_sender_id().to_string()),
        ),
        _ => (infer_direction(fallback, member_id.as_deref()), member_id),
    };

    let text = text_of(last.content.as_ref()).or_else(|| text_of(last.text.as_ref()));
    let sector = content
        .sector
        .as_ref()
        .and_then(|s| s.name())
        .or_else(|| env.sector.as_ref().and_then(|s| s.name()))
        .map(str::to_string);

    Ok(finish(
        Extracted {
            conversation_id,
            phone,
            name,
            direction,
            agent_id,
            text,
            sector,
            is_private: last.is_private.unwrap_or(false),
            tags: tag_names(&content.tags),
            source_event_id: env.event_id,
            source_event_date: env.event_date,
        },
        tables,
    ))
}

fn from_flat_message(
    env: FlatMessageEnvelope,
    tables: &PatternTables,
    fallback: DirectionFallback,
) -> Result<ConversationEvent, DropReason> {
    if let Some(kind) = env.kind.as_deref() {
        if !kind.to_ascii_lowercase().starts_with("message") {
            return Err(DropReason::NotAMessage);
        }
    }
    let msg = env.message;
    let agent_id = non_blank(msg.attendant_id);

    let direction = msg
        .direction
        .as_deref()
        .and_then(Direction::parse)
        .or_else(|| env.direction.as_deref().and_then(Direction::parse))
        .or_else(|| env.kind.as_deref().and_then(Direction::parse))
        .unwrap_or_else(|| infer_direction(fallback, agent_id.as_deref()));

    let (phone, name) = match msg.from {
        Some(from) => (
            from.phone.and_then(|p| digits_only(&p.to_text())),
            non_blank(from.name),
        ),
        None => (None, None),
    };

    Ok(finish(
        Extracted {
            conversation_id: msg
                .conversation_id
                .map(|v| v.to_text())
                .filter(|v| !v.trim().is_empty()),
            phone,
            name,
            direction,
            agent_id,
            text: non_blank(msg.text),
            sector: msg.sector.as_ref().and_then(|s| s.name()).map(str::to_string),
            is_private: msg.is_private.unwrap_or(false),
            tags: tag_names(&msg.tags),
            source_event_id: env.event_id,
            source_event_date: env.event_date,
        },
        tables,
    ))
}

fn finish(x: Extracted, tables: &PatternTables) -> ConversationEvent {
    let sector = x.sector.unwrap_or_else(|| DEFAULT_SECTOR.to_string());
    let is_automated = tables.is_automated(x.agent_id.as_deref(), x.text.as_deref());
    let is_internal = tables.is_internal(&sector, x.name.as_deref(), &x.tags);
    ConversationEvent {
        conversation_id: x.conversation_id,
        phone: x.phone,
        name: x.name,
        direction: x.direction,
        agent_id: x.agent_id,
        text: x.text,
        sector,
        is_private: x.is_private,
        is_internal,
        is_automated,
        tags: x.tags,
        source_event_id: x.source_event_id,
        source_event_date: x.source_event_date,
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|v| !v.trim().is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn tag_names(tags: &[TagField]) -> Vec<String> {
    tags.iter()
        .map(|t| t.name().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
