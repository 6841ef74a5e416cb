use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::streak::StreakState;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub body: String,
    pub has_media: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Cooldown,
    NotAllowed,
    ContentRejected,
}

impl RejectReason {
    /// Text shown to the sender. Never names the matched term.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Cooldown => "you are sending messages too quickly, please wait",
            Self::NotAllowed => "not allowed",
            Self::ContentRejected => "please keep it respectful",
        }
    }
}

/// Result of pushing one chat message through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Allowed {
        message_id: i64,
        plant_state: StreakState,
    },
    Rejected {
        reason: RejectReason,
        retry_after: Option<OffsetDateTime>,
    },
}

impl MessageOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
