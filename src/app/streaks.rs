use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};
use time::{Date, OffsetDateTime, UtcOffset};

use crate::app::users::touch_users;
use crate::domain::error::{CoreError, Result};
use crate::domain::pair::PairKey;
use crate::domain::streak::{civil_date, GrowthStage, PairStreak, StreakState};
use crate::infra::db::{Db, Tx};

/// Daily streak per unordered pair. Both members share one row keyed by
/// `(lo, hi)`, and either of them can advance it.
#[derive(Clone)]
pub struct StreakService {
    db: Db,
    offset: UtcOffset,
}

impl StreakService {
    pub fn new(db: Db, offset: UtcOffset) -> Self {
        Self { db, offset }
    }

    /// Civil date used for streak bookkeeping.
    pub fn today(&self, now: OffsetDateTime) -> Date {
        civil_date(now, self.offset)
    }

    /// Record a qualifying interaction for `pair` on `on_date`.
    pub async fn advance(&self, pair: PairKey, on_date: Date) -> Result<StreakState> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.db.pool().begin().await?;
        touch_users(&mut tx, &[pair.lo(), pair.hi()], now).await?;
        let next = advance_with_tx(&mut tx, pair, on_date, now).await?;
        tx.commit().await?;
        Ok(next)
    }

    /// Stored state, or the all-zero `seed` state for a pair that has never
    /// had a qualifying interaction.
    pub async fn current_state(&self, pair: PairKey) -> Result<StreakState> {
        Ok(self
            .get(pair)
            .await?
            .map(|streak| streak.state())
            .unwrap_or_default())
    }

    pub async fn get(&self, pair: PairKey) -> Result<Option<PairStreak>> {
        streak_in(self.db.pool(), pair).await
    }
}

/// Advance the pair's streak inside a caller's transaction.
///
/// The caller must already hold the write lock (see `touch_users`). The row is
/// created before it is read, so two calls for the same day serialize and the
/// second one sees the first one's date and is a no-op.
pub async fn advance_with_tx(
    tx: &mut Tx<'_>,
    pair: PairKey,
    on_date: Date,
    now: OffsetDateTime,
) -> Result<StreakState> {
    sqlx::query(
        "INSERT INTO pair_streaks (user_a_id, user_b_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $3) \
         ON CONFLICT (user_a_id, user_b_id) DO NOTHING",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let current = streak_in(&mut **tx, pair)
        .await?
        .map(|streak| streak.state())
        .unwrap_or_default();

    let next = current.advanced(on_date);
    if next != current {
        sqlx::query(
            "UPDATE pair_streaks \
             SET streak_count = $3, longest_streak = $4, last_streak_date = $5, stage = $6, \
                 updated_at = $7 \
             WHERE user_a_id = $1 AND user_b_id = $2",
        )
        .bind(pair.lo())
        .bind(pair.hi())
        .bind(next.streak)
        .bind(next.longest)
        .bind(next.last_streak_date)
        .bind(next.stage.as_db())
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }

    if next.streak != current.streak {
        tracing::debug!(
            user_a_id = pair.lo(),
            user_b_id = pair.hi(),
            streak = next.streak,
            stage = next.stage.as_db(),
            "streak advanced"
        );
    }

    Ok(next)
}

pub async fn streak_in<'e, E>(executor: E, pair: PairKey) -> Result<Option<PairStreak>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT user_a_id, user_b_id, streak_count, longest_streak, last_streak_date, stage, \
                created_at, updated_at \
         FROM pair_streaks WHERE user_a_id = $1 AND user_b_id = $2",
    )
    .bind(pair.lo())
    .bind(pair.hi())
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(streak_from_row).transpose()
}

fn streak_from_row(row: &SqliteRow) -> Result<PairStreak> {
    let stage: String = row.get("stage");
    let stage = GrowthStage::from_db(&stage)
        .ok_or_else(|| CoreError::corrupt(format!("unknown growth stage {stage}")))?;

    Ok(PairStreak {
        user_a_id: row.get("user_a_id"),
        user_b_id: row.get("user_b_id"),
        streak_count: row.get("streak_count"),
        longest_streak: row.get("longest_streak"),
        last_streak_date: row.get("last_streak_date"),
        stage,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
