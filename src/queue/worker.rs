//! Worker pool: a fixed set of parallel workers, each claiming one job at
//! a time on its own dedicated database connection.
//!
//! The dedicated connection matters: the claim's advisory lock is
//! session-level, and the handler's transactions must run on the same
//! session so the lock outlives each commit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::job::Job;
use super::registry::JobRegistry;
use super::wrapper::JobWrapper;
use crate::WatchContext;

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of parallel workers.
    pub workers: usize,
    /// How long to wait when no jobs are ready.
    pub poll_interval: Duration,
    /// Queue name to serve.
    pub queue: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            poll_interval: Duration::from_secs(5),
            queue: String::new(),
        }
    }
}

pub struct WorkerPool {
    registry: Arc<JobRegistry>,
    ctx: Arc<WatchContext>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(registry: Arc<JobRegistry>, ctx: Arc<WatchContext>) -> Self {
        Self::with_config(registry, ctx, WorkerPoolConfig::default())
    }

    pub fn with_config(
        registry: Arc<JobRegistry>,
        ctx: Arc<WatchContext>,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            registry,
            ctx,
            config,
        }
    }

    /// Run all workers until the token is cancelled. In-flight jobs finish;
    /// no new claims are issued after cancellation.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(workers = self.config.workers, "worker pool starting");

        let mut handles = Vec::with_capacity(self.config.workers);
        for _ in 0..self.config.workers {
            let conn = self.ctx.pool.acquire().await?;
            handles.push(tokio::spawn(worker_loop(
                format!("worker-{}", Uuid::new_v4()),
                conn,
                self.registry.clone(),
                self.ctx.clone(),
                self.config.clone(),
                shutdown.clone(),
            )));
        }

        for result in futures::future::try_join_all(handles).await? {
            result?;
        }

        info!("worker pool stopped");
        Ok(())
    }
}

async fn worker_loop(
    worker_id: String,
    mut conn: PoolConnection<Postgres>,
    registry: Arc<JobRegistry>,
    ctx: Arc<WatchContext>,
    config: WorkerPoolConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(worker_id = %worker_id, "worker starting");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let claimed = match Job::claim_one(&mut conn, &config.queue).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "failed to claim job");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                continue;
            }
        };

        let Some(job) = claimed else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
            continue;
        };

        let result = match registry.get(&job.job_class) {
            Some(reg) => {
                JobWrapper::new(reg.handler.clone(), reg.schedule, ctx.clone())
                    .run(&mut conn, &job)
                    .await
            }
            None => Err(anyhow!("unknown job class: {}", job.job_class)),
        };

        match result {
            Ok(()) => {
                if let Err(e) = job.complete(&mut conn).await {
                    error!(job_id = job.job_id, error = %e, "failed to release finished job");
                }
            }
            Err(e) => {
                warn!(
                    job_id = job.job_id,
                    job_class = %job.job_class,
                    error = %e,
                    "job failed, leaving for queue backoff"
                );
                if let Err(e) = job.fail(&mut conn, &e.to_string()).await {
                    error!(job_id = job.job_id, error = %e, "failed to record job failure");
                }
            }
        }
    }

    info!(worker_id = %worker_id, "worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.workers, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.queue, "");
    }
}
