pub mod alert;
pub mod business_hours;
pub mod classify;
pub mod normalize;
pub mod policy;
pub mod state;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub use alert::{format_alert_text, to_relay_alert, AlertPayload};
pub use business_hours::BusinessHours;
pub use classify::{ClassifierRules, PatternTables};
pub use normalize::{infer_direction, normalize, DropReason};
pub use policy::{evaluate, is_attended, AlertDecision, PolicyConfig, SkipReason};
pub use state::{ConversationMeta, ConversationState, ConversationStore, HistoryEntry};

pub const EXCERPT_CHARS: usize = 100;

pub fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|v| v.with_timezone(&Utc))
}

pub fn stable_alert_event_id(key: &str, waiting_since: DateTime<Utc>) -> String {
    hash_id(
        "ALERT",
        &[key, &waiting_since.timestamp_millis().to_string()],
    )
}

pub fn stable_index(key: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % len as u64) as usize
}

pub fn fallback_conversation_key() -> String {
    format!("UNKNOWN_{}", uuid::Uuid::new_v4().as_simple())
}

pub fn digits_only(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

pub fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn hash_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    let digest = hasher.finalize();
    let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}_{short}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_event_id_is_stable_per_waiting_period() {
        let t0 = parse_rfc3339("2026-10-19T10:00:00Z").unwrap();
        let t1 = parse_rfc3339("2026-10-19T10:20:00Z").unwrap();
        assert_eq!(
            stable_alert_event_id("chat-1", t0),
            stable_alert_event_id("chat-1", t0)
        );
        assert_ne!(
            stable_alert_event_id("chat-1", t0),
            stable_alert_event_id("chat-1", t1)
        );
        assert!(stable_alert_event_id("chat-1", t0).starts_with("ALERT_"));
    }

    #[test]
    fn stable_index_stays_in_range_and_repeats() {
        for key in ["a", "chat-1", "5548999990000", ""] {
            let idx = stable_index(key, 3);
            assert!(idx < 3);
            assert_eq!(idx, stable_index(key, 3));
        }
        assert_eq!(stable_index("anything", 0), 0);
    }

    #[test]
    fn digits_only_strips_formatting() {
        assert_eq!(
            digits_only("+55 (48) 99999-0000").as_deref(),
            Some("5548999990000")
        );
        assert_eq!(digits_only("n/a"), None);
    }

    #[test]
    fn excerpt_counts_characters_not_bytes() {
        assert_eq!(excerpt("ação rápida", 4), "ação");
    }

    #[test]
    fn fallback_keys_are_unique() {
        assert_ne!(fallback_conversation_key(), fallback_conversation_key());
    }
}
