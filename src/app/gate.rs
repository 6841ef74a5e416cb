use sqlx::SqliteConnection;
use time::OffsetDateTime;

use crate::app::blocks::is_blocked_in;
use crate::app::connections::latest_request_in;
use crate::app::messaging::has_history_in;
use crate::app::users::UserService;
use crate::domain::error::Result;
use crate::domain::pair::PairKey;
use crate::domain::social_graph::RequestStatus;
use crate::infra::db::Db;

/// Read-only admission checks shared by messaging and other
/// reputation-sensitive features.
#[derive(Clone)]
pub struct ReputationGate {
    db: Db,
}

impl ReputationGate {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Two users may interact when neither blocks the other and they are
    /// either connected or already have a conversation.
    pub async fn can_interact(&self, viewer_id: i64, other_id: i64) -> Result<bool> {
        let mut conn = self.db.pool().acquire().await?;
        can_interact_in(&mut conn, viewer_id, other_id).await
    }

    /// Whether the user may send chat messages at `now`, and if not, when
    /// the cooldown lifts.
    pub async fn can_send(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> Result<(bool, Option<OffsetDateTime>)> {
        let until = self.cooldown_until(user_id, now).await?;
        Ok((until.is_none(), until))
    }

    /// End of the active chat cooldown, if any.
    pub async fn cooldown_until(
        &self,
        user_id: i64,
        now: OffsetDateTime,
    ) -> Result<Option<OffsetDateTime>> {
        let user = UserService::new(self.db.clone()).get_user(user_id).await?;
        Ok(user
            .filter(|user| user.cooldown_active(now))
            .and_then(|user| user.chat_cooldown_until))
    }
}

/// [`ReputationGate::can_interact`] on an existing connection, so a writer can
/// re-check it inside its own transaction.
pub async fn can_interact_in(
    conn: &mut SqliteConnection,
    viewer_id: i64,
    other_id: i64,
) -> Result<bool> {
    let pair = PairKey::normalize(viewer_id, other_id)?;
    if is_blocked_in(&mut *conn, viewer_id, other_id).await? {
        return Ok(false);
    }

    let latest = latest_request_in(&mut *conn, pair).await?;
    if latest.map(|row| row.status) == Some(RequestStatus::Accepted) {
        return Ok(true);
    }

    has_history_in(&mut *conn, pair).await
}
