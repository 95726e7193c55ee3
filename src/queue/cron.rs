//! Cron metadata: one row per singleton key.
//!
//! The row's `FOR UPDATE` lock is the system-wide mutex for singleton
//! execution; while one worker holds it inside a transaction, no other
//! worker can enter the handler body for the same key.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CronMetadata {
    pub id: String,
    pub last_completed: DateTime<Utc>,
    pub next_scheduled: DateTime<Utc>,
}

impl CronMetadata {
    /// Read and lock the metadata row for the lifetime of the transaction.
    pub async fn lock(key: &str, conn: &mut PgConnection) -> Result<Option<Self>> {
        let row = sqlx::query_as::<_, Self>(
            "SELECT id, last_completed, next_scheduled FROM cron_metadata WHERE id = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row)
    }

    /// Insert the row with EPOCH defaults on first sighting of a key.
    pub async fn insert_default(key: &str, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("INSERT INTO cron_metadata (id) VALUES ($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Record a completed run and the time of the next occurrence.
    pub async fn mark_completed(
        key: &str,
        last_completed: DateTime<Utc>,
        next_scheduled: DateTime<Utc>,
        conn: &mut PgConnection,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE cron_metadata SET last_completed = $1, next_scheduled = $2 WHERE id = $3",
        )
        .bind(last_completed)
        .bind(next_scheduled)
        .bind(key)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
