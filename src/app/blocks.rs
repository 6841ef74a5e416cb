use sqlx::{Executor, Row, Sqlite};
use time::OffsetDateTime;

use crate::app::connections::latest_request_in;
use crate::app::messaging::purge_conversation_with_tx;
use crate::app::notifications::purge_match_requests_with_tx;
use crate::app::reports::snapshot_evidence_with_tx;
use crate::app::users::touch_users;
use crate::domain::error::{CoreError, Result};
use crate::domain::pair::PairKey;
use crate::domain::social_graph::{Block, BlockStatus, RequestStatus};
use crate::infra::db::Db;

/// Symmetric block relation. A block by either side suppresses every other
/// kind of interaction between the two users.
#[derive(Clone)]
pub struct BlockService {
    db: Db,
}

impl BlockService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Block `blocked_id`. Returns `false` when the block already existed.
    ///
    /// In the same transaction any live request lineage is closed with a
    /// `declined` row, and the pair's shortcuts, unread match requests and
    /// message history are purged. Pending reports filed by the blocker keep a
    /// snapshot of the conversation as evidence.
    pub async fn block(&self, blocker_id: i64, blocked_id: i64) -> Result<bool> {
        if blocker_id == blocked_id {
            return Err(CoreError::SelfBlock);
        }
        let pair = PairKey::normalize(blocker_id, blocked_id)?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[blocker_id, blocked_id], now).await?;

        let inserted = sqlx::query(
            "INSERT INTO blocks (blocker_id, blocked_id, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (blocker_id, blocked_id) DO NOTHING",
        )
        .bind(blocker_id)
        .bind(blocked_id)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        let latest = latest_request_in(&mut *tx, pair).await?;
        if latest.map(|row| row.status.is_live()).unwrap_or(false) {
            sqlx::query(
                "INSERT INTO connection_requests \
                 (sender_id, receiver_id, status, sender_seen, receiver_seen, created_at, updated_at) \
                 VALUES ($1, $2, $3, 1, 1, $4, $4)",
            )
            .bind(blocker_id)
            .bind(blocked_id)
            .bind(RequestStatus::Declined.as_db())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        snapshot_evidence_with_tx(&mut tx, blocker_id, blocked_id, now).await?;
        purge_conversation_with_tx(&mut tx, pair).await?;
        purge_match_requests_with_tx(&mut tx, blocker_id, blocked_id).await?;

        tx.commit().await?;

        if inserted {
            tracing::info!(blocker_id, blocked_id, "user blocked");
        }

        Ok(inserted)
    }

    /// Remove the caller's own block. Returns `false` when there was none.
    pub async fn unblock(&self, blocker_id: i64, blocked_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blocks WHERE blocker_id = $1 AND blocked_id = $2")
            .bind(blocker_id)
            .bind(blocked_id)
            .execute(self.db.pool())
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(blocker_id, blocked_id, "user unblocked");
        }
        Ok(removed)
    }

    pub async fn is_blocked(&self, a: i64, b: i64) -> Result<bool> {
        is_blocked_in(self.db.pool(), a, b).await
    }

    pub async fn block_status(&self, viewer_id: i64, other_id: i64) -> Result<BlockStatus> {
        let row = sqlx::query(
            "SELECT \
                EXISTS (SELECT 1 FROM blocks WHERE blocker_id = $1 AND blocked_id = $2) AS is_blocking, \
                EXISTS (SELECT 1 FROM blocks WHERE blocker_id = $2 AND blocked_id = $1) AS is_blocked_by",
        )
        .bind(viewer_id)
        .bind(other_id)
        .fetch_one(self.db.pool())
        .await?;

        Ok(BlockStatus {
            is_blocking: row.get("is_blocking"),
            is_blocked_by: row.get("is_blocked_by"),
        })
    }

    pub async fn list_blocked(&self, blocker_id: i64) -> Result<Vec<Block>> {
        let rows = sqlx::query(
            "SELECT blocker_id, blocked_id, created_at FROM blocks \
             WHERE blocker_id = $1 ORDER BY created_at DESC",
        )
        .bind(blocker_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Block {
                blocker_id: row.get("blocker_id"),
                blocked_id: row.get("blocked_id"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}

/// Whether a block exists in either direction.
pub async fn is_blocked_in<'e, E>(executor: E, a: i64, b: i64) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let blocked: bool = sqlx::query_scalar(
        "SELECT EXISTS ( \
             SELECT 1 FROM blocks \
             WHERE (blocker_id = $1 AND blocked_id = $2) \
                OR (blocker_id = $2 AND blocked_id = $1) \
         )",
    )
    .bind(a)
    .bind(b)
    .fetch_one(executor)
    .await?;

    Ok(blocked)
}
