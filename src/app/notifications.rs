use serde_json::Value;
use sqlx::Row;
use time::OffsetDateTime;

use crate::domain::error::Result;
use crate::domain::notification::{Notification, MATCH_REQUEST};
use crate::infra::db::{Db, Tx};

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
}

/// Payload handed to the delivery component.
#[derive(Debug, Clone)]
pub struct OutboundNotification<'a> {
    pub user_id: i64,
    pub notification_type: &'a str,
    pub message: &'a str,
    pub actor_id: Option<i64>,
    pub meta: Value,
}

impl NotificationService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Persist a notification inside the transaction that caused it, so it is
    /// only visible if the state change commits.
    pub async fn emit_with_tx(
        tx: &mut Tx<'_>,
        notification: OutboundNotification<'_>,
        now: OffsetDateTime,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO notifications (user_id, notification_type, message, actor_id, meta, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(notification.user_id)
        .bind(notification.notification_type)
        .bind(notification.message)
        .bind(notification.actor_id)
        .bind(notification.meta.to_string())
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        tracing::debug!(
            notification_id = id,
            user_id = notification.user_id,
            notification_type = notification.notification_type,
            "notification emitted"
        );

        Ok(id)
    }

    pub async fn list(
        &self,
        user_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, user_id, notification_type, message, actor_id, meta, read_at, created_at \
             FROM notifications \
             WHERE user_id = $1 AND ($2 IS NULL OR id < $2) \
             ORDER BY id DESC \
             LIMIT $3",
        )
        .bind(user_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let meta: String = row.get("meta");
            notifications.push(Notification {
                id: row.get("id"),
                user_id: row.get("user_id"),
                notification_type: row.get("notification_type"),
                message: row.get("message"),
                actor_id: row.get("actor_id"),
                meta: serde_json::from_str(&meta).unwrap_or(Value::Null),
                read_at: row.get("read_at"),
                created_at: row.get("created_at"),
            });
        }

        Ok(notifications)
    }

    pub async fn mark_read(&self, notification_id: i64, user_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE notifications \
             SET read_at = $3 \
             WHERE id = $1 AND user_id = $2 AND read_at IS NULL",
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(OffsetDateTime::now_utc())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Drop unread match-request notifications exchanged between two users.
pub async fn purge_match_requests_with_tx(tx: &mut Tx<'_>, a: i64, b: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM notifications \
         WHERE notification_type = $3 \
           AND read_at IS NULL \
           AND ((user_id = $1 AND actor_id = $2) OR (user_id = $2 AND actor_id = $1))",
    )
    .bind(a)
    .bind(b)
    .bind(MATCH_REQUEST)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}
