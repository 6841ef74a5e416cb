use serde::Serialize;
use time::OffsetDateTime;

/// The engine's view of a platform user: only the reputation fields it owns.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub trust_score: i64,
    pub avg_rating: f64,
    pub review_count: i64,
    pub strike_count: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub chat_cooldown_until: Option<OffsetDateTime>,
    pub connections_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn cooldown_active(&self, now: OffsetDateTime) -> bool {
        self.chat_cooldown_until
            .map(|until| now < until)
            .unwrap_or(false)
    }
}
