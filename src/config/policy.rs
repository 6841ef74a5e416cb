use time::macros::offset;
use time::{Duration, UtcOffset};

use crate::domain::trust::TrustEventKind;

/// Point deltas applied to the trust ledger for each event source.
#[derive(Debug, Clone, Copy)]
pub struct TrustPoints {
    pub partner_circle_join: i64,
    pub circle_join: i64,
    pub meetup_checkin: i64,
    /// Multiplier applied to `rating - 3` for a received review.
    pub review_per_star: i64,
    pub meetup_no_show: i64,
    pub report_confirmed: i64,
    pub moderation_strike: i64,
}

impl Default for TrustPoints {
    fn default() -> Self {
        TrustPoints {
            partner_circle_join: 3,
            circle_join: 2,
            meetup_checkin: 2,
            review_per_star: 3,
            meetup_no_show: -10,
            report_confirmed: -15,
            moderation_strike: -3,
        }
    }
}

impl TrustPoints {
    pub fn for_event(&self, kind: &TrustEventKind) -> i64 {
        match kind {
            TrustEventKind::PartnerCircleJoin => self.partner_circle_join,
            TrustEventKind::CircleJoin => self.circle_join,
            TrustEventKind::MeetupCheckin => self.meetup_checkin,
            TrustEventKind::ReviewReceived { rating } => (rating - 3) * self.review_per_star,
            TrustEventKind::MeetupNoShow => self.meetup_no_show,
            TrustEventKind::ReportConfirmed => self.report_confirmed,
            TrustEventKind::ModerationStrike => self.moderation_strike,
            TrustEventKind::AdminAdjustment { points } => *points,
        }
    }
}

/// Tunables of the connection and trust engine.
#[derive(Debug, Clone)]
pub struct EnginePolicy {
    /// Civil timezone that defines streak day boundaries.
    pub streak_offset: UtcOffset,
    pub chat_cooldown: Duration,
    pub restricted_terms: Vec<String>,
    pub trust_points: TrustPoints,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        EnginePolicy {
            streak_offset: offset!(+8),
            chat_cooldown: Duration::minutes(10),
            restricted_terms: default_restricted_terms(),
            trust_points: TrustPoints::default(),
        }
    }
}

pub fn default_restricted_terms() -> Vec<String> {
    [
        "idiot",
        "stupid",
        "moron",
        "loser",
        "scum",
        "retard",
        "slut",
        "whore",
        "bitch",
        "bastard",
        "fuck",
        "fucking",
        "shit",
        "shut up",
        "kill yourself",
        "go die",
        "send me money",
        "give me your password",
        "bank account number",
    ]
    .iter()
    .map(|term| term.to_string())
    .collect()
}

/// Parse a comma separated term list, dropping blanks and normalizing case.
pub fn parse_restricted_terms(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|term| term.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase())
        .filter(|term| !term.is_empty())
        .collect()
}
