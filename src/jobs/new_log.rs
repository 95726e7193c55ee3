//! Registration of a single log from the published list.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::info;

use crate::ct::client::LogListEntry;
use crate::jobs::check_sth::CheckSthArgs;
use crate::models::{LogState, MonitoredLog};
use crate::queue::{Job, JobHandler, NewJob, Outcome};
use crate::WatchContext;

/// Upserts a log into `monitored_logs` and, while the log is active,
/// enqueues its STH check. A log that has published a final STH or been
/// disqualified is transitioned to ignore and never polled again.
pub struct RegisterLogMetadata;

#[async_trait]
impl JobHandler for RegisterLogMetadata {
    async fn run(
        &self,
        _ctx: &WatchContext,
        job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        let entry: LogListEntry = job.decode()?;

        let Some(mut state) = MonitoredLog::lock_state(&entry.url, tx).await? else {
            // First sighting: create the row, then re-enter so the next
            // iteration observes it under the lock.
            MonitoredLog::insert(&entry.url, tx).await?;
            info!(url = %entry.url, "registered new monitored log");
            return Ok(Outcome::RunAgainNow);
        };

        let retired = entry.final_sth.is_some() || entry.disqualified_at != 0;
        if retired && state == LogState::Active {
            MonitoredLog::set_state(&entry.url, LogState::Ignore, tx).await?;
            info!(url = %entry.url, "log retired, ignoring from now on");
            state = LogState::Ignore;
        }

        if state == LogState::Active {
            NewJob::new(super::CHECK_STH, &CheckSthArgs { url: entry.url })?
                .enqueue(tx)
                .await?;
        }

        Ok(Outcome::Done)
    }
}
