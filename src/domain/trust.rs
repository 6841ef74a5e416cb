use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Baseline every user starts from before any ledger event.
pub const BASE_TRUST_SCORE: i64 = 50;
pub const MIN_TRUST_SCORE: i64 = 0;
pub const MAX_TRUST_SCORE: i64 = 100;
/// Largest magnitude accepted for a single ledger delta; keeps `SUM(points)`
/// far from overflow.
pub const MAX_EVENT_POINTS: i64 = MAX_TRUST_SCORE;
/// Score at which a user is considered trusted (green tier).
pub const TRUSTED_THRESHOLD: i64 = 80;
const YELLOW_THRESHOLD: i64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Green,
    Yellow,
    Red,
}

impl TrustTier {
    pub fn of(score: i64) -> Self {
        if score >= TRUSTED_THRESHOLD {
            Self::Green
        } else if score >= YELLOW_THRESHOLD {
            Self::Yellow
        } else {
            Self::Red
        }
    }
}

/// Derive the cached score from the sum of all ledger deltas.
pub fn score_from_total(total_points: i64) -> i64 {
    (BASE_TRUST_SCORE.saturating_add(total_points)).clamp(MIN_TRUST_SCORE, MAX_TRUST_SCORE)
}

/// Reputation-relevant events reported by the surrounding subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrustEventKind {
    PartnerCircleJoin,
    CircleJoin,
    MeetupCheckin,
    ReviewReceived { rating: i64 },
    MeetupNoShow,
    ReportConfirmed,
    ModerationStrike,
    AdminAdjustment { points: i64 },
}

impl TrustEventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PartnerCircleJoin => "partner_circle_join",
            Self::CircleJoin => "circle_join",
            Self::MeetupCheckin => "meetup_checkin",
            Self::ReviewReceived { .. } => "review_received",
            Self::MeetupNoShow => "meetup_no_show",
            Self::ReportConfirmed => "report_confirmed",
            Self::ModerationStrike => "moderation_strike",
            Self::AdminAdjustment { .. } => "admin_adjustment",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrustEvent {
    pub id: i64,
    pub user_id: i64,
    pub event_type: String,
    pub points: i64,
    pub ref_id: Option<i64>,
    pub details: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Read-only projection used by UIs and reputation-gated features.
#[derive(Debug, Clone, Serialize)]
pub struct TrustSnapshot {
    pub user_id: i64,
    pub score: i64,
    pub tier: TrustTier,
    pub trusted: bool,
    pub recent_events: Vec<TrustEvent>,
}
