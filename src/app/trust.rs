use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::OffsetDateTime;

use crate::app::users::touch_users;
use crate::config::policy::TrustPoints;
use crate::domain::error::{CoreError, Result};
use crate::domain::trust::{
    score_from_total, TrustEvent, TrustEventKind, TrustSnapshot, TrustTier, BASE_TRUST_SCORE,
    MAX_EVENT_POINTS, TRUSTED_THRESHOLD,
};
use crate::infra::db::{Db, Tx};

const SNAPSHOT_RECENT_EVENTS: i64 = 5;

/// Append-only trust ledger. The `trust_score` column on `users` is a cache of
/// `clamp(50 + sum(points))` and is rewritten in the same transaction as every
/// insert; nothing else writes it.
#[derive(Clone)]
pub struct TrustService {
    db: Db,
    points: TrustPoints,
}

/// Fields of a ledger row that are supplied by the caller.
#[derive(Debug, Clone)]
pub struct NewTrustEvent<'a> {
    pub user_id: i64,
    pub event_type: &'a str,
    pub points: i64,
    pub details: &'a str,
    pub ref_id: Option<i64>,
}

impl TrustService {
    pub fn new(db: Db, points: TrustPoints) -> Self {
        Self { db, points }
    }

    /// Append one event and return the user's recomputed score.
    pub async fn append_event(
        &self,
        user_id: i64,
        event_type: &str,
        points: i64,
        details: &str,
        ref_id: Option<i64>,
    ) -> Result<i64> {
        let mut tx = self.db.pool().begin().await?;
        let score = append_event_with_tx(
            &mut tx,
            NewTrustEvent {
                user_id,
                event_type,
                points,
                details,
                ref_id,
            },
            OffsetDateTime::now_utc(),
        )
        .await?;
        tx.commit().await?;
        Ok(score)
    }

    /// Record an event reported by another subsystem, using the configured
    /// point table for its delta.
    pub async fn record(
        &self,
        user_id: i64,
        kind: &TrustEventKind,
        details: &str,
        ref_id: Option<i64>,
    ) -> Result<i64> {
        if user_id <= 0 {
            return Err(CoreError::invalid_input("user_id must be positive"));
        }
        if let TrustEventKind::ReviewReceived { rating } = kind {
            if !(1..=5).contains(rating) {
                return Err(CoreError::invalid_input("rating must be between 1 and 5"));
            }
        }
        if let TrustEventKind::AdminAdjustment { .. } = kind {
            if details.trim().is_empty() {
                return Err(CoreError::invalid_input(
                    "admin adjustments require a reason",
                ));
            }
        }

        let now = OffsetDateTime::now_utc();
        let points = self.points.for_event(kind);

        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[user_id], now).await?;

        if let TrustEventKind::ReviewReceived { rating } = kind {
            sqlx::query(
                "UPDATE users \
                 SET avg_rating = (avg_rating * review_count + $2) / (review_count + 1), \
                     review_count = review_count + 1, \
                     updated_at = $3 \
                 WHERE id = $1",
            )
            .bind(user_id)
            .bind(*rating as f64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let score = append_event_with_tx(
            &mut tx,
            NewTrustEvent {
                user_id,
                event_type: kind.event_type(),
                points,
                details,
                ref_id,
            },
            now,
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id,
            event_type = kind.event_type(),
            points,
            score,
            "trust event recorded"
        );

        Ok(score)
    }

    /// Rebuild the cached score from the ledger.
    pub async fn recompute(&self, user_id: i64) -> Result<i64> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[user_id], now).await?;
        let score = recompute_with_tx(&mut tx, user_id, now).await?;
        tx.commit().await?;
        Ok(score)
    }

    pub async fn score(&self, user_id: i64) -> Result<i64> {
        let score: Option<i64> = sqlx::query_scalar("SELECT trust_score FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(score.unwrap_or(BASE_TRUST_SCORE))
    }

    pub async fn snapshot(&self, user_id: i64) -> Result<TrustSnapshot> {
        let score = self.score(user_id).await?;
        let recent_events = self.history(user_id, None, SNAPSHOT_RECENT_EVENTS).await?;

        Ok(TrustSnapshot {
            user_id,
            score,
            tier: TrustTier::of(score),
            trusted: score >= TRUSTED_THRESHOLD,
            recent_events,
        })
    }

    /// Ledger rows for a user, newest first.
    pub async fn history(
        &self,
        user_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<TrustEvent>> {
        let rows = sqlx::query(
            "SELECT id, user_id, event_type, points, ref_id, details, created_at \
             FROM trust_events \
             WHERE user_id = $1 AND ($2 IS NULL OR id < $2) \
             ORDER BY id DESC \
             LIMIT $3",
        )
        .bind(user_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(event_from_row).collect())
    }
}

/// Insert a ledger row and refresh the cached score, within the caller's
/// transaction.
pub async fn append_event_with_tx(
    tx: &mut Tx<'_>,
    event: NewTrustEvent<'_>,
    now: OffsetDateTime,
) -> Result<i64> {
    if !(-MAX_EVENT_POINTS..=MAX_EVENT_POINTS).contains(&event.points) {
        return Err(CoreError::invalid_input(format!(
            "points must be between -{MAX_EVENT_POINTS} and {MAX_EVENT_POINTS}"
        )));
    }
    touch_users(tx, &[event.user_id], now).await?;

    sqlx::query(
        "INSERT INTO trust_events (user_id, event_type, points, ref_id, details, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(event.user_id)
    .bind(event.event_type)
    .bind(event.points)
    .bind(event.ref_id)
    .bind(event.details)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    recompute_with_tx(tx, event.user_id, now).await
}

async fn recompute_with_tx(tx: &mut Tx<'_>, user_id: i64, now: OffsetDateTime) -> Result<i64> {
    let total: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(points), 0) FROM trust_events WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut **tx)
            .await?;

    let score = score_from_total(total);

    sqlx::query("UPDATE users SET trust_score = $2, updated_at = $3 WHERE id = $1")
        .bind(user_id)
        .bind(score)
        .bind(now)
        .execute(&mut **tx)
        .await?;

    Ok(score)
}

fn event_from_row(row: &SqliteRow) -> TrustEvent {
    TrustEvent {
        id: row.get("id"),
        user_id: row.get("user_id"),
        event_type: row.get("event_type"),
        points: row.get("points"),
        ref_id: row.get("ref_id"),
        details: row.get("details"),
        created_at: row.get("created_at"),
    }
}
