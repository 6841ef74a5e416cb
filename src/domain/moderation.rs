use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Longest message excerpt kept in the moderation audit trail.
pub const MESSAGE_PREVIEW_CHARS: usize = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Warning,
    Cooldown,
    TrustPenalty,
}

impl ModerationAction {
    /// Rung of the ladder reached by the given strike number.
    pub fn for_strike(strike_number: i64) -> Self {
        match strike_number {
            i64::MIN..=1 => Self::Warning,
            2 => Self::Cooldown,
            _ => Self::TrustPenalty,
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "warning" => Some(Self::Warning),
            "cooldown" => Some(Self::Cooldown),
            "trust_penalty" => Some(Self::TrustPenalty),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Cooldown => "cooldown",
            Self::TrustPenalty => "trust_penalty",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEvent {
    pub id: i64,
    pub user_id: i64,
    pub message_preview: String,
    pub action: ModerationAction,
    pub strike_number: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Outcome of screening one outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// The sender is still cooling down from an earlier strike; no new strike.
    Throttled { until: OffsetDateTime },
    /// Restricted content; the message is not delivered.
    Rejected {
        action: ModerationAction,
        strike_number: i64,
        cooldown_until: Option<OffsetDateTime>,
        report_id: Option<i64>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Confirmed,
    Resolved,
    Invalid,
}

impl ReportStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" | "valid" => Some(Self::Confirmed),
            "resolved" => Some(Self::Resolved),
            "invalid" => Some(Self::Invalid),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Resolved => "resolved",
            Self::Invalid => "invalid",
        }
    }

    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Confirmed | Self::Resolved | Self::Invalid) => true,
            (Self::Confirmed, Self::Resolved) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: i64,
    pub reporter_id: Option<i64>,
    pub reported_id: i64,
    pub context_type: String,
    pub context_id: Option<i64>,
    pub reason: String,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

pub fn message_preview(text: &str) -> String {
    text.chars().take(MESSAGE_PREVIEW_CHARS).collect()
}
