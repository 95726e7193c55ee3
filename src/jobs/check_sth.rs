//! Per-log STH polling.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use tracing::info;

use crate::ct::client::LogClient;
use crate::jobs::get_entries::GetEntriesArgs;
use crate::models::{LogState, MonitoredLog};
use crate::queue::{Job, JobHandler, NewJob, Outcome};
use crate::WatchContext;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSthArgs {
    pub url: String,
}

/// Compares a log's current tree size against the processed watermark and
/// enqueues one bounded fetch range for the gap. Singleton cron per log
/// url, every five minutes.
///
/// The watermark advances to `tree_size` in the same transaction that
/// enqueues the fetch: the fetch job is durable and the split semantics
/// guarantee the whole range is eventually fetched, so the watermark can
/// safely run ahead of actual ingestion.
pub struct CheckLogSth;

#[async_trait]
impl JobHandler for CheckLogSth {
    async fn run(
        &self,
        _ctx: &WatchContext,
        job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        let args: CheckSthArgs = job.decode()?;

        let log = MonitoredLog::lock(&args.url, tx)
            .await?
            .ok_or_else(|| anyhow!("monitored log not found: {}", args.url))?;

        if log.state != LogState::Active {
            // The log was retired; drop this cron entirely.
            return Ok(Outcome::DoNotReschedule);
        }

        let connect_url = log.connect_url();
        let client = LogClient::for_connect_url(connect_url)?;
        let sth = client.get_sth().await?;

        if sth.tree_size > log.processed as u64 {
            info!(
                url = %args.url,
                processed = log.processed,
                tree_size = sth.tree_size,
                "tree grew, scheduling fetch"
            );
            NewJob::new(
                super::GET_ENTRIES,
                &GetEntriesArgs {
                    url: connect_url.to_string(),
                    start: log.processed as u64,
                    end: sth.tree_size,
                },
            )?
            .enqueue(tx)
            .await?;
            MonitoredLog::advance_watermark(&args.url, sth.tree_size as i64, tx).await?;
        }

        Ok(Outcome::Done)
    }
}
