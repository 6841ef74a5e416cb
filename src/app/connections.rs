use serde_json::json;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use time::OffsetDateTime;

use crate::app::blocks::is_blocked_in;
use crate::app::messaging::purge_conversation_with_tx;
use crate::app::notifications::{NotificationService, OutboundNotification};
use crate::app::users::touch_users;
use crate::domain::error::{CoreError, Result};
use crate::domain::notification::{MATCH_ACCEPTED, MATCH_REQUEST};
use crate::domain::pair::PairKey;
use crate::domain::social_graph::{ConnectionRequest, Relationship, RequestStatus};
use crate::infra::db::{Db, Tx};

/// Request/accept/decline/cancel/unfriend workflow between two users.
///
/// History is append-only apart from cancelling a still-pending row: the
/// authoritative state of a pair is always the row with the highest id.
/// Repeating an operation on already-settled state is a no-op so clients can
/// retry freely.
#[derive(Clone)]
pub struct ConnectionService {
    db: Db,
}

impl ConnectionService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Ask `receiver_id` to connect.
    ///
    /// A reverse pending request is accepted instead of opening a second one,
    /// so two users requesting each other at once end up as friends.
    pub async fn request(&self, sender_id: i64, receiver_id: i64) -> Result<ConnectionRequest> {
        if sender_id == receiver_id {
            return Err(CoreError::SelfRequest);
        }
        let pair = PairKey::normalize(sender_id, receiver_id)?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[sender_id, receiver_id], now).await?;

        if is_blocked_in(&mut *tx, sender_id, receiver_id).await? {
            return Err(CoreError::Blocked);
        }

        let latest = latest_request_in(&mut *tx, pair).await?;
        let request = match latest {
            Some(row) if row.status == RequestStatus::Accepted => row,
            Some(row) if row.status == RequestStatus::Pending && row.sender_id == sender_id => row,
            Some(row) if row.status == RequestStatus::Pending => {
                let accepted = settle_with_tx(&mut tx, &row, RequestStatus::Accepted, now).await?;
                tracing::info!(
                    request_id = row.id,
                    sender_id,
                    receiver_id,
                    "mutual requests resolved as accepted"
                );
                accepted
            }
            _ => {
                let row = sqlx::query(
                    "INSERT INTO connection_requests \
                     (sender_id, receiver_id, status, sender_seen, receiver_seen, created_at, updated_at) \
                     VALUES ($1, $2, $3, 1, 0, $4, $4) \
                     RETURNING id, sender_id, receiver_id, status, sender_seen, receiver_seen, \
                               created_at, updated_at",
                )
                .bind(sender_id)
                .bind(receiver_id)
                .bind(RequestStatus::Pending.as_db())
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                let request = request_from_row(&row)?;

                NotificationService::emit_with_tx(
                    &mut tx,
                    OutboundNotification {
                        user_id: receiver_id,
                        notification_type: MATCH_REQUEST,
                        message: "You have a new connection request",
                        actor_id: Some(sender_id),
                        meta: json!({ "request_id": request.id }),
                    },
                    now,
                )
                .await?;

                request
            }
        };

        tx.commit().await?;
        Ok(request)
    }

    /// Accept a request addressed to `acting_user_id`.
    pub async fn accept(&self, acting_user_id: i64, request_id: i64) -> Result<ConnectionRequest> {
        self.respond(acting_user_id, request_id, RequestStatus::Accepted)
            .await
    }

    /// Decline a request addressed to `acting_user_id`.
    pub async fn decline(&self, acting_user_id: i64, request_id: i64) -> Result<ConnectionRequest> {
        self.respond(acting_user_id, request_id, RequestStatus::Declined)
            .await
    }

    async fn respond(
        &self,
        acting_user_id: i64,
        request_id: i64,
        outcome: RequestStatus,
    ) -> Result<ConnectionRequest> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[acting_user_id], now).await?;

        let row = request_by_id_with_tx(&mut tx, request_id)
            .await?
            .ok_or(CoreError::NotFound("connection request"))?;

        if row.receiver_id != acting_user_id {
            return Err(CoreError::NotAuthorized("connection request"));
        }
        if row.status != RequestStatus::Pending {
            return Ok(row);
        }

        let pair = PairKey::normalize(row.sender_id, row.receiver_id)?;
        // A newer row (a block or a later lineage) supersedes this one.
        let latest = latest_request_in(&mut *tx, pair).await?;
        if let Some(latest) = latest.filter(|latest| latest.id != row.id) {
            return Ok(latest);
        }

        if outcome == RequestStatus::Accepted
            && is_blocked_in(&mut *tx, row.sender_id, row.receiver_id).await?
        {
            return Err(CoreError::Blocked);
        }

        let settled = settle_with_tx(&mut tx, &row, outcome, now).await?;
        tx.commit().await?;

        tracing::info!(
            request_id,
            sender_id = settled.sender_id,
            receiver_id = settled.receiver_id,
            status = settled.status.as_db(),
            "connection request settled"
        );

        Ok(settled)
    }

    /// Withdraw a still-pending request. Returns `false` when it was already
    /// settled.
    pub async fn cancel(&self, acting_user_id: i64, request_id: i64) -> Result<bool> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[acting_user_id], now).await?;

        let row = request_by_id_with_tx(&mut tx, request_id)
            .await?
            .ok_or(CoreError::NotFound("connection request"))?;

        if row.sender_id != acting_user_id {
            return Err(CoreError::NotAuthorized("connection request"));
        }
        if row.status != RequestStatus::Pending {
            return Ok(false);
        }

        sqlx::query("DELETE FROM connection_requests WHERE id = $1 AND status = $2")
            .bind(request_id)
            .bind(RequestStatus::Pending.as_db())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "DELETE FROM notifications \
             WHERE user_id = $1 AND actor_id = $2 AND notification_type = $3 AND read_at IS NULL",
        )
        .bind(row.receiver_id)
        .bind(row.sender_id)
        .bind(MATCH_REQUEST)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// End a friendship. Appends a `declined` row and permanently deletes the
    /// pair's conversation. Returns `false` when they were not friends.
    pub async fn unfriend(&self, user_id: i64, other_user_id: i64) -> Result<bool> {
        let pair = PairKey::normalize(user_id, other_user_id)?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[user_id, other_user_id], now).await?;

        let latest = latest_request_in(&mut *tx, pair).await?;
        if latest.map(|row| row.status) != Some(RequestStatus::Accepted) {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO connection_requests \
             (sender_id, receiver_id, status, sender_seen, receiver_seen, created_at, updated_at) \
             VALUES ($1, $2, $3, 1, 1, $4, $4)",
        )
        .bind(user_id)
        .bind(other_user_id)
        .bind(RequestStatus::Declined.as_db())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let purged = purge_conversation_with_tx(&mut tx, pair).await?;
        tx.commit().await?;

        tracing::info!(user_id, other_user_id, purged_messages = purged, "connection removed");
        Ok(true)
    }

    /// Friends means the latest row is accepted and neither side blocks the
    /// other. Every user is trivially connected to themselves.
    pub async fn are_friends(&self, a: i64, b: i64) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let pair = PairKey::normalize(a, b)?;
        let latest = latest_request_in(self.db.pool(), pair).await?;
        if latest.map(|row| row.status) != Some(RequestStatus::Accepted) {
            return Ok(false);
        }
        Ok(!is_blocked_in(self.db.pool(), a, b).await?)
    }

    pub async fn relationship(&self, viewer_id: i64, other_id: i64) -> Result<Relationship> {
        if viewer_id == other_id {
            return Ok(Relationship::Myself);
        }
        let pair = PairKey::normalize(viewer_id, other_id)?;
        if is_blocked_in(self.db.pool(), viewer_id, other_id).await? {
            return Ok(Relationship::Blocked);
        }
        let latest = latest_request_in(self.db.pool(), pair).await?;
        Ok(Relationship::from_latest(viewer_id, latest.as_ref()))
    }

    pub async fn latest(&self, a: i64, b: i64) -> Result<Option<ConnectionRequest>> {
        let pair = PairKey::normalize(a, b)?;
        latest_request_in(self.db.pool(), pair).await
    }

    /// Pending requests waiting on `user_id`, oldest first. Listing them marks
    /// them as seen by the receiver.
    pub async fn incoming_pending(&self, user_id: i64) -> Result<Vec<ConnectionRequest>> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[user_id], now).await?;

        // Only rows that are still the latest of their lineage and not blocked.
        let rows = sqlx::query(
            "SELECT r.id, r.sender_id, r.receiver_id, r.status, r.sender_seen, r.receiver_seen, \
                    r.created_at, r.updated_at \
             FROM connection_requests r \
             WHERE r.receiver_id = $1 \
               AND r.status = $2 \
               AND r.id = ( \
                   SELECT MAX(l.id) FROM connection_requests l \
                   WHERE (l.sender_id = r.sender_id AND l.receiver_id = r.receiver_id) \
                      OR (l.sender_id = r.receiver_id AND l.receiver_id = r.sender_id) \
               ) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM blocks b \
                   WHERE (b.blocker_id = r.sender_id AND b.blocked_id = r.receiver_id) \
                      OR (b.blocker_id = r.receiver_id AND b.blocked_id = r.sender_id) \
               ) \
             ORDER BY r.id ASC",
        )
        .bind(user_id)
        .bind(RequestStatus::Pending.as_db())
        .fetch_all(&mut *tx)
        .await?;

        let requests = rows
            .iter()
            .map(request_from_row)
            .collect::<Result<Vec<_>>>()?;

        sqlx::query(
            "UPDATE connection_requests SET receiver_seen = 1 \
             WHERE receiver_id = $1 AND status = $2 AND receiver_seen = 0",
        )
        .bind(user_id)
        .bind(RequestStatus::Pending.as_db())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(requests)
    }
}

/// Authoritative row for a pair: the one with the highest id in either
/// direction.
pub async fn latest_request_in<'e, E>(executor: E, pair: PairKey) -> Result<Option<ConnectionRequest>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, sender_id, receiver_id, status, sender_seen, receiver_seen, created_at, updated_at \
         FROM connection_requests \
         WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1) \
         ORDER BY id DESC \
         LIMIT 1",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(request_from_row).transpose()
}

async fn request_by_id_with_tx(tx: &mut Tx<'_>, request_id: i64) -> Result<Option<ConnectionRequest>> {
    let row = sqlx::query(
        "SELECT id, sender_id, receiver_id, status, sender_seen, receiver_seen, created_at, updated_at \
         FROM connection_requests WHERE id = $1",
    )
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(request_from_row).transpose()
}

/// Move a pending row to its final status. Accepting also bumps both users'
/// connection counters and notifies both sides.
async fn settle_with_tx(
    tx: &mut Tx<'_>,
    row: &ConnectionRequest,
    outcome: RequestStatus,
    now: OffsetDateTime,
) -> Result<ConnectionRequest> {
    let updated = sqlx::query(
        "UPDATE connection_requests \
         SET status = $2, receiver_seen = 1, updated_at = $3 \
         WHERE id = $1 \
         RETURNING id, sender_id, receiver_id, status, sender_seen, receiver_seen, created_at, updated_at",
    )
    .bind(row.id)
    .bind(outcome.as_db())
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    let settled = request_from_row(&updated)?;

    if outcome == RequestStatus::Accepted {
        sqlx::query(
            "UPDATE users SET connections_count = connections_count + 1, updated_at = $3 \
             WHERE id IN ($1, $2)",
        )
        .bind(row.sender_id)
        .bind(row.receiver_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        for (user_id, actor_id) in [
            (row.sender_id, row.receiver_id),
            (row.receiver_id, row.sender_id),
        ] {
            NotificationService::emit_with_tx(
                tx,
                OutboundNotification {
                    user_id,
                    notification_type: MATCH_ACCEPTED,
                    message: "You are now connected",
                    actor_id: Some(actor_id),
                    meta: json!({ "request_id": row.id }),
                },
                now,
            )
            .await?;
        }
    }

    Ok(settled)
}

fn request_from_row(row: &SqliteRow) -> Result<ConnectionRequest> {
    let status: String = row.get("status");
    let status = RequestStatus::from_db(&status)
        .ok_or_else(|| CoreError::corrupt(format!("unknown request status: {}", status)))?;

    Ok(ConnectionRequest {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        status,
        sender_seen: row.get("sender_seen"),
        receiver_seen: row.get("receiver_seen"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
