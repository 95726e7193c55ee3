//! The registry of CT logs this instance watches.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;

/// Whether a log is still polled. Once a log is ignored no further STH
/// or fetch jobs are enqueued for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[repr(i32)]
pub enum LogState {
    Active = 0,
    Ignore = 1,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MonitoredLog {
    pub url: String,
    /// Exclusive upper bound of leaf indices already handed to a fetch
    /// job. Monotonically non-decreasing.
    pub processed: i64,
    pub state: LogState,
    pub connect_url: Option<String>,
}

impl MonitoredLog {
    /// The URL to actually contact, which may carry the insecure sentinel
    /// prefix. Falls back to the log's registry URL when unset.
    pub fn connect_url(&self) -> &str {
        match self.connect_url.as_deref() {
            Some(url) if !url.is_empty() => url,
            _ => &self.url,
        }
    }

    /// Read and lock the full row for the transaction's lifetime.
    pub async fn lock(url: &str, conn: &mut PgConnection) -> Result<Option<Self>> {
        let log = sqlx::query_as::<_, Self>(
            "SELECT url, processed, state, connect_url FROM monitored_logs WHERE url = $1 FOR UPDATE",
        )
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(log)
    }

    /// Read and lock just the state.
    pub async fn lock_state(url: &str, conn: &mut PgConnection) -> Result<Option<LogState>> {
        let state = sqlx::query_scalar::<_, LogState>(
            "SELECT state FROM monitored_logs WHERE url = $1 FOR UPDATE",
        )
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(state)
    }

    /// Register a newly sighted log with default state and watermark.
    pub async fn insert(url: &str, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("INSERT INTO monitored_logs (url) VALUES ($1)")
            .bind(url)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    pub async fn set_state(url: &str, state: LogState, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("UPDATE monitored_logs SET state = $1 WHERE url = $2")
            .bind(state)
            .bind(url)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Advance the processed watermark. Callers only move it forward; the
    /// caller holds the row lock, so no concurrent writer can interleave.
    pub async fn advance_watermark(
        url: &str,
        processed: i64,
        conn: &mut PgConnection,
    ) -> Result<()> {
        sqlx::query("UPDATE monitored_logs SET processed = $1 WHERE url = $2")
            .bind(processed)
            .bind(url)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(connect_url: Option<&str>) -> MonitoredLog {
        MonitoredLog {
            url: "ct.example.com/log".to_string(),
            processed: 0,
            state: LogState::Active,
            connect_url: connect_url.map(String::from),
        }
    }

    #[test]
    fn connect_url_falls_back_to_registry_url() {
        assert_eq!(log(None).connect_url(), "ct.example.com/log");
        assert_eq!(log(Some("")).connect_url(), "ct.example.com/log");
    }

    #[test]
    fn connect_url_prefers_override() {
        assert_eq!(
            log(Some("insecure-skip-verify-old.example.com")).connect_url(),
            "insecure-skip-verify-old.example.com"
        );
    }
}
