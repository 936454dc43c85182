use attendwatch_contracts::AttendancePolicy;
use chrono::{DateTime, Duration, Utc};

use crate::business_hours::BusinessHours;
use crate::classify::PatternTables;
use crate::state::ConversationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyConfig {
    pub idle_threshold: Duration,
    pub max_alert_window: Duration,
    pub attendance: AttendancePolicy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::minutes(15),
            max_alert_window: Duration::minutes(60),
            attendance: AttendancePolicy::HumanReply,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoInbound,
    Attended,
    AlreadyAlerted,
    OutsideBusinessHours,
    NotOverdue,
    OverCap,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::NoInbound => "no_inbound",
            SkipReason::Attended => "attended",
            SkipReason::AlreadyAlerted => "already_alerted",
            SkipReason::OutsideBusinessHours => "outside_business_hours",
            SkipReason::NotOverdue => "not_overdue",
            SkipReason::OverCap => "over_cap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    // `based_on` is the `last_inbound_at` the decision was made against.
    Fire {
        elapsed: Duration,
        based_on: DateTime<Utc>,
    },
    Skip(SkipReason),
}

impl AlertDecision {
    pub fn fires(&self) -> bool {
        matches!(self, AlertDecision::Fire { .. })
    }
}

pub fn is_attended(
    state: &ConversationState,
    tables: &PatternTables,
    policy: AttendancePolicy,
) -> bool {
    match policy {
        AttendancePolicy::HumanReply => tables.has_human_reply(state.history()),
        AttendancePolicy::AnyReply => match (state.last_outbound_at, state.last_inbound_at) {
            (Some(out), Some(inb)) => out >= inb,
            _ => false,
        },
    }
}

pub fn evaluate(
    state: &ConversationState,
    now: DateTime<Utc>,
    hours: &BusinessHours,
    tables: &PatternTables,
    cfg: &PolicyConfig,
) -> AlertDecision {
    let Some(inbound) = state.last_inbound_at else {
        return AlertDecision::Skip(SkipReason::NoInbound);
    };
    if is_attended(state, tables, cfg.attendance) {
        return AlertDecision::Skip(SkipReason::Attended);
    }
    if state.already_alerted() {
        return AlertDecision::Skip(SkipReason::AlreadyAlerted);
    }
    if !hours.is_business_moment(now) {
        return AlertDecision::Skip(SkipReason::OutsideBusinessHours);
    }

    let elapsed = hours.business_elapsed(Some(inbound), Some(now));
    if elapsed < cfg.idle_threshold {
        return AlertDecision::Skip(SkipReason::NotOverdue);
    }
    if elapsed >= cfg.max_alert_window {
        return AlertDecision::Skip(SkipReason::OverCap);
    }
    AlertDecision::Fire {
        elapsed,
        based_on: inbound,
    }
}
