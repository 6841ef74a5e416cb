use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use time::OffsetDateTime;

use crate::domain::error::Result;
use crate::domain::user::User;
use crate::infra::db::{Db, Tx};

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, trust_score, avg_rating, review_count, strike_count, \
                    chat_cooldown_until, connections_count, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|row| user_from_row(&row)))
    }
}

/// Materialize the engine's rows for `user_ids` and take the database write
/// lock.
///
/// Every read-modify-write transaction calls this first: a write as the
/// opening statement makes SQLite grant the single writer lock before any
/// read, so nothing can interleave between what the transaction reads and what
/// it writes.
pub async fn touch_users(tx: &mut Tx<'_>, user_ids: &[i64], now: OffsetDateTime) -> Result<()> {
    for &user_id in user_ids {
        sqlx::query(
            "INSERT INTO users (id, created_at, updated_at) VALUES ($1, $2, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn get_user_with_tx(tx: &mut Tx<'_>, user_id: i64) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT id, trust_score, avg_rating, review_count, strike_count, \
                chat_cooldown_until, connections_count, created_at \
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|row| user_from_row(&row)))
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        id: row.get("id"),
        trust_score: row.get("trust_score"),
        avg_rating: row.get("avg_rating"),
        review_count: row.get("review_count"),
        strike_count: row.get("strike_count"),
        chat_cooldown_until: row.get("chat_cooldown_until"),
        connections_count: row.get("connections_count"),
        created_at: row.get("created_at"),
    }
}
