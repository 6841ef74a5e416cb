use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

pub const MATCH_REQUEST: &str = "match_request";
pub const MATCH_ACCEPTED: &str = "match_accepted";
pub const MODERATION_STRIKE: &str = "moderation_strike";
pub const ACCOUNT_UNDER_REVIEW: &str = "account_under_review";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub notification_type: String,
    pub message: String,
    pub actor_id: Option<i64>,
    pub meta: Value,
    #[serde(with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
