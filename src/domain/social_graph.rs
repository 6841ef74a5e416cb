use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub blocker_id: i64,
    pub blocked_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Declined,
}

impl RequestStatus {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }

    /// Pending and accepted rows are live; a declined row ends the lineage.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

/// One row of a pair's request lineage. Rows are appended, never rewritten to
/// a different pair, and only the row with the highest id is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub status: RequestStatus,
    pub sender_seen: bool,
    pub receiver_seen: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// How one user sees their relationship with another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    #[serde(rename = "self")]
    Myself,
    Blocked,
    Friends,
    PendingSent,
    PendingReceived,
    #[serde(rename = "none")]
    Unconnected,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Myself => "self",
            Self::Blocked => "blocked",
            Self::Friends => "friends",
            Self::PendingSent => "pending_sent",
            Self::PendingReceived => "pending_received",
            Self::Unconnected => "none",
        }
    }

    /// Derive the label for `viewer_id` from the pair's latest request row.
    pub fn from_latest(viewer_id: i64, latest: Option<&ConnectionRequest>) -> Self {
        match latest {
            Some(row) => match row.status {
                RequestStatus::Accepted => Self::Friends,
                RequestStatus::Pending if row.sender_id == viewer_id => Self::PendingSent,
                RequestStatus::Pending => Self::PendingReceived,
                RequestStatus::Declined => Self::Unconnected,
            },
            None => Self::Unconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BlockStatus {
    pub is_blocking: bool,
    pub is_blocked_by: bool,
}
