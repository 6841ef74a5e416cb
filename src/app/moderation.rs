use serde_json::json;
use sqlx::Row;
use time::OffsetDateTime;

use crate::app::notifications::{NotificationService, OutboundNotification};
use crate::app::reports::{insert_report_with_tx, NewReport};
use crate::app::trust::{append_event_with_tx, NewTrustEvent};
use crate::app::users::{get_user_with_tx, touch_users, UserService};
use crate::config::policy::EnginePolicy;
use crate::domain::error::{CoreError, Result};
use crate::domain::moderation::{message_preview, Decision, ModerationAction, ModerationEvent};
use crate::domain::notification::{ACCOUNT_UNDER_REVIEW, MODERATION_STRIKE};
use crate::domain::trust::TrustEventKind;
use crate::infra::db::Db;

pub const CHAT_REPORT_CONTEXT: &str = "chat";

/// Escalating response to restricted chat content: warning, then a chat
/// cooldown, then a trust penalty with an automatic report on every further
/// strike.
#[derive(Clone)]
pub struct ModerationService {
    db: Db,
    policy: EnginePolicy,
}

impl ModerationService {
    pub fn new(db: Db, policy: EnginePolicy) -> Self {
        Self { db, policy }
    }

    /// Whether `text` contains a restricted term. Single words must match a
    /// whole word; phrases match anywhere once case and whitespace are
    /// normalized.
    pub fn matches_restricted(&self, text: &str) -> bool {
        let normalized = text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let words: Vec<&str> = normalized
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|word| !word.is_empty())
            .collect();

        self.policy.restricted_terms.iter().any(|term| {
            let term = term.trim().to_lowercase();
            if term.is_empty() {
                false
            } else if term.contains(' ') {
                normalized.contains(&term)
            } else {
                words.iter().any(|word| *word == term)
            }
        })
    }

    pub async fn evaluate(&self, user_id: i64, text: &str) -> Result<Decision> {
        self.evaluate_at(user_id, text, OffsetDateTime::now_utc()).await
    }

    /// Screen one outgoing message and apply the next strike on a match.
    ///
    /// Storage errors are returned to the caller; there is no path that
    /// allows a message when the ladder could not be read or written.
    pub async fn evaluate_at(
        &self,
        user_id: i64,
        text: &str,
        now: OffsetDateTime,
    ) -> Result<Decision> {
        if user_id <= 0 {
            return Err(CoreError::invalid_input("user_id must be positive"));
        }

        if !self.matches_restricted(text) {
            let user = UserService::new(self.db.clone()).get_user(user_id).await?;
            let until = user
                .and_then(|user| user.chat_cooldown_until)
                .filter(|until| now < *until);
            return Ok(match until {
                Some(until) => Decision::Throttled { until },
                None => Decision::Allow,
            });
        }

        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[user_id], now).await?;
        let user = get_user_with_tx(&mut tx, user_id)
            .await?
            .ok_or(CoreError::NotFound("user"))?;

        if let Some(until) = user.chat_cooldown_until.filter(|until| now < *until) {
            tx.rollback().await?;
            return Ok(Decision::Throttled { until });
        }

        let strike_number = user.strike_count + 1;
        let action = ModerationAction::for_strike(strike_number);
        let cooldown_until = match action {
            ModerationAction::Cooldown => Some(now + self.policy.chat_cooldown),
            _ => None,
        };

        sqlx::query(
            "UPDATE users \
             SET strike_count = $2, \
                 chat_cooldown_until = COALESCE($3, chat_cooldown_until), \
                 updated_at = $4 \
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(strike_number)
        .bind(cooldown_until)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let event_id: i64 = sqlx::query_scalar(
            "INSERT INTO moderation_events (user_id, message_preview, action, strike_number, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id",
        )
        .bind(user_id)
        .bind(message_preview(text))
        .bind(action.as_db())
        .bind(strike_number)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let mut report_id = None;
        if action == ModerationAction::TrustPenalty {
            let kind = TrustEventKind::ModerationStrike;
            let details = format!("chat strike {strike_number}");
            append_event_with_tx(
                &mut tx,
                NewTrustEvent {
                    user_id,
                    event_type: kind.event_type(),
                    points: self.policy.trust_points.for_event(&kind),
                    details: &details,
                    ref_id: Some(event_id),
                },
                now,
            )
            .await?;

            let reason = format!("automatic: restricted chat content, strike {strike_number}");
            let id = insert_report_with_tx(
                &mut tx,
                NewReport {
                    reporter_id: None,
                    reported_id: user_id,
                    context_type: CHAT_REPORT_CONTEXT,
                    context_id: Some(event_id),
                    reason: &reason,
                },
                now,
            )
            .await?;
            report_id = Some(id);

            NotificationService::emit_with_tx(
                &mut tx,
                OutboundNotification {
                    user_id,
                    notification_type: ACCOUNT_UNDER_REVIEW,
                    message: "Your account is under review after repeated chat violations.",
                    actor_id: None,
                    meta: json!({ "report_id": id }),
                },
                now,
            )
            .await?;
        }

        let message = match action {
            ModerationAction::Warning => {
                "Please keep conversations respectful. Further violations will pause your chat."
                    .to_string()
            }
            ModerationAction::Cooldown => format!(
                "Your chat is paused for {} minutes.",
                self.policy.chat_cooldown.whole_minutes()
            ),
            ModerationAction::TrustPenalty => {
                "Repeated violations have lowered your trust score.".to_string()
            }
        };
        NotificationService::emit_with_tx(
            &mut tx,
            OutboundNotification {
                user_id,
                notification_type: MODERATION_STRIKE,
                message: &message,
                actor_id: None,
                meta: json!({
                    "strike_number": strike_number,
                    "action": action.as_db(),
                    "cooldown_until": cooldown_until.map(|until| until.unix_timestamp()),
                }),
            },
            now,
        )
        .await?;

        tx.commit().await?;

        tracing::warn!(
            user_id,
            strike_number,
            action = action.as_db(),
            report_id,
            "restricted content rejected"
        );

        Ok(Decision::Rejected {
            action,
            strike_number,
            cooldown_until,
            report_id,
        })
    }

    /// Moderation events for review, newest first.
    pub async fn audit(&self, before_id: Option<i64>, limit: i64) -> Result<Vec<ModerationEvent>> {
        let rows = sqlx::query(
            "SELECT id, user_id, message_preview, action, strike_number, created_at \
             FROM moderation_events \
             WHERE ($1 IS NULL OR id < $1) \
             ORDER BY id DESC \
             LIMIT $2",
        )
        .bind(before_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let action: String = row.get("action");
            let action = ModerationAction::from_db(&action)
                .ok_or_else(|| CoreError::corrupt(format!("unknown moderation action {action}")))?;
            events.push(ModerationEvent {
                id: row.get("id"),
                user_id: row.get("user_id"),
                message_preview: row.get("message_preview"),
                action,
                strike_number: row.get("strike_number"),
                created_at: row.get("created_at"),
            });
        }

        Ok(events)
    }
}
