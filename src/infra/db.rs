use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use crate::config::AppConfig;
use crate::domain::error::CoreError;

pub type Tx<'c> = Transaction<'c, Sqlite>;

/// Attempts made by [`retry_on_conflict`] before a conflict is surfaced.
const MAX_CONFLICT_ATTEMPTS: u32 = 3;
const CONFLICT_BACKOFF_MS: u64 = 25;

#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.db_busy_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_connect_timeout_seconds))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Re-run a whole transactional operation when it lost the write lock race.
///
/// Only safe for operations that commit all-or-nothing, which every engine
/// mutation does.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < MAX_CONFLICT_ATTEMPTS => {
                tracing::warn!(attempt, error = %err, "retrying after write conflict");
                tokio::time::sleep(Duration::from_millis(CONFLICT_BACKOFF_MS * attempt as u64)).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
