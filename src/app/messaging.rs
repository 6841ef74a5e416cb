use sqlx::{Executor, Row, Sqlite};
use time::OffsetDateTime;

use crate::app::gate::{can_interact_in, ReputationGate};
use crate::app::moderation::ModerationService;
use crate::app::streaks::{advance_with_tx, streak_in};
use crate::app::users::{get_user_with_tx, touch_users};
use crate::config::policy::EnginePolicy;
use crate::domain::error::{CoreError, Result};
use crate::domain::message::{Message, MessageOutcome, RejectReason};
use crate::domain::moderation::Decision;
use crate::domain::pair::PairKey;
use crate::domain::streak::{civil_date, is_qualifying_message};
use crate::infra::db::{retry_on_conflict, Db, Tx};

/// Longest chat message accepted from a client.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Entry point for every outgoing chat message: gates it, screens it,
/// stores it and feeds the pair's streak.
#[derive(Clone)]
pub struct MessagingService {
    db: Db,
    policy: EnginePolicy,
}

impl MessagingService {
    pub fn new(db: Db, policy: EnginePolicy) -> Self {
        Self { db, policy }
    }

    pub async fn send(
        &self,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        has_media: bool,
    ) -> Result<MessageOutcome> {
        self.send_at(sender_id, receiver_id, text, has_media, OffsetDateTime::now_utc())
            .await
    }

    /// Same as [`send`](Self::send) with an explicit clock.
    pub async fn send_at(
        &self,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        has_media: bool,
        now: OffsetDateTime,
    ) -> Result<MessageOutcome> {
        let pair = PairKey::normalize(sender_id, receiver_id)?;
        if text.trim().is_empty() && !has_media {
            return Err(CoreError::invalid_input("message is empty"));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(CoreError::invalid_input(format!(
                "message must be at most {} characters",
                MAX_MESSAGE_CHARS
            )));
        }

        // Checked again in `deliver`; these keep refused sends out of moderation.
        let gate = ReputationGate::new(self.db.clone());
        if let Some(until) = gate.cooldown_until(sender_id, now).await? {
            return Ok(MessageOutcome::Rejected {
                reason: RejectReason::Cooldown,
                retry_after: Some(until),
            });
        }
        if !gate.can_interact(sender_id, receiver_id).await? {
            return Ok(MessageOutcome::Rejected {
                reason: RejectReason::NotAllowed,
                retry_after: None,
            });
        }

        let moderation = ModerationService::new(self.db.clone(), self.policy.clone());
        let decision =
            retry_on_conflict(|| moderation.evaluate_at(sender_id, text, now)).await?;
        match decision {
            Decision::Allow => {}
            Decision::Throttled { until } => {
                return Ok(MessageOutcome::Rejected {
                    reason: RejectReason::Cooldown,
                    retry_after: Some(until),
                });
            }
            Decision::Rejected { cooldown_until, .. } => {
                return Ok(MessageOutcome::Rejected {
                    reason: RejectReason::ContentRejected,
                    retry_after: cooldown_until,
                });
            }
        }

        let outcome = retry_on_conflict(|| {
            self.deliver(pair, sender_id, receiver_id, text, has_media, now)
        })
        .await?;

        if let MessageOutcome::Allowed {
            message_id,
            plant_state,
        } = &outcome
        {
            tracing::debug!(
                message_id,
                sender_id,
                receiver_id,
                streak = plant_state.streak,
                "message delivered"
            );
        }

        Ok(outcome)
    }

    /// Store the message and feed the streak in one transaction. Cooldown and
    /// the interaction gate are checked again under the write lock, so a block
    /// or unfriend that commits first always wins over the send.
    async fn deliver(
        &self,
        pair: PairKey,
        sender_id: i64,
        receiver_id: i64,
        text: &str,
        has_media: bool,
        now: OffsetDateTime,
    ) -> Result<MessageOutcome> {
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[pair.lo(), pair.hi()], now).await?;

        let cooldown = get_user_with_tx(&mut tx, sender_id)
            .await?
            .filter(|user| user.cooldown_active(now))
            .and_then(|user| user.chat_cooldown_until);
        if let Some(until) = cooldown {
            return Ok(MessageOutcome::Rejected {
                reason: RejectReason::Cooldown,
                retry_after: Some(until),
            });
        }
        if !can_interact_in(&mut tx, sender_id, receiver_id).await? {
            return Ok(MessageOutcome::Rejected {
                reason: RejectReason::NotAllowed,
                retry_after: None,
            });
        }

        let message_id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (sender_id, receiver_id, body, has_media, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(text)
        .bind(has_media)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        for (owner_id, peer_id) in [(sender_id, receiver_id), (receiver_id, sender_id)] {
            sqlx::query(
                "INSERT INTO conversation_shortcuts (owner_id, peer_id, last_message_at) \
                 VALUES ($1, $2, $3) \
                 ON CONFLICT (owner_id, peer_id) DO UPDATE SET last_message_at = excluded.last_message_at",
            )
            .bind(owner_id)
            .bind(peer_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let plant_state = if is_qualifying_message(text, has_media) {
            let today = civil_date(now, self.policy.streak_offset);
            advance_with_tx(&mut tx, pair, today, now).await?
        } else {
            streak_in(&mut *tx, pair)
                .await?
                .map(|streak| streak.state())
                .unwrap_or_default()
        };

        tx.commit().await?;

        Ok(MessageOutcome::Allowed {
            message_id,
            plant_state,
        })
    }

    /// Conversation between two users, newest first.
    pub async fn conversation(
        &self,
        viewer_id: i64,
        other_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let pair = PairKey::normalize(viewer_id, other_id)?;
        conversation_in(self.db.pool(), pair, before_id, limit).await
    }
}

pub async fn has_history_in<'e, E>(executor: E, pair: PairKey) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS ( \
             SELECT 1 FROM messages \
             WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1) \
         )",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .fetch_one(executor)
    .await?;

    Ok(exists)
}

pub async fn conversation_in<'e, E>(
    executor: E,
    pair: PairKey,
    before_id: Option<i64>,
    limit: i64,
) -> Result<Vec<Message>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT id, sender_id, receiver_id, body, has_media, created_at \
         FROM messages \
         WHERE ((sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1)) \
           AND ($3 IS NULL OR id < $3) \
         ORDER BY id DESC \
         LIMIT $4",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .bind(before_id)
    .bind(limit)
    .fetch_all(executor)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| Message {
            id: row.get("id"),
            sender_id: row.get("sender_id"),
            receiver_id: row.get("receiver_id"),
            body: row.get("body"),
            has_media: row.get("has_media"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Delete the pair's message history and both conversation shortcuts.
/// Returns the number of messages removed.
pub async fn purge_conversation_with_tx(tx: &mut Tx<'_>, pair: PairKey) -> Result<u64> {
    let purged = sqlx::query(
        "DELETE FROM messages \
         WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1)",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .execute(&mut **tx)
    .await?
    .rows_affected();

    sqlx::query(
        "DELETE FROM conversation_shortcuts \
         WHERE (owner_id = $1 AND peer_id = $2) OR (owner_id = $2 AND peer_id = $1)",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .execute(&mut **tx)
    .await?;

    Ok(purged)
}
