//! Daily refresh of the published CT log list.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::info;

use crate::ct::client::fetch_log_list;
use crate::queue::{Job, JobHandler, NewJob, Outcome};
use crate::WatchContext;

/// Fetches the known-logs list and fans out one registration job per
/// entry. Singleton cron, daily.
pub struct UpdateCtLogList;

#[async_trait]
impl JobHandler for UpdateCtLogList {
    async fn run(
        &self,
        ctx: &WatchContext,
        _job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome> {
        let logs = fetch_log_list(&ctx.http, &ctx.config.log_list_url).await?;
        let count = logs.len();

        for log in logs {
            NewJob::new(super::NEW_LOG_METADATA, &log)?.enqueue(tx).await?;
        }

        info!(count, "queued log registrations");
        Ok(Outcome::Done)
    }
}
