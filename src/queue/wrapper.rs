//! The job wrapper: transaction management and singleton cron policy.
//!
//! Every claimed job runs through [`JobWrapper::run`]. The wrapper opens a
//! transaction, applies the cron gate for singleton jobs, invokes the
//! handler, and interprets the handler's [`Outcome`]:
//!
//! | Outcome            | Action                                                     |
//! |--------------------|------------------------------------------------------------|
//! | `Done`             | Schedule next cron occurrence (if any), commit              |
//! | `RunAgainNow`      | Commit, then re-run the same job with a fresh transaction   |
//! | `DoNotReschedule`  | Roll back; the job is dropped without a future cron         |
//! | `Err(_)`           | Roll back; the queue's retry backoff owns redelivery        |

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Connection, PgConnection};
use std::sync::Arc;
use tracing::debug;

use super::cron::CronMetadata;
use super::job::{Job, NewJob};
use super::registry::Schedule;
use crate::WatchContext;

/// What a handler asks the wrapper to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Commit; if this is a cron job, schedule the next occurrence.
    Done,
    /// Commit, then run the handler again immediately. Handlers use this
    /// to page through batches with one transaction per batch.
    RunAgainNow,
    /// Roll back and retire the job without scheduling a future cron.
    DoNotReschedule,
}

/// A job handler. Receives the shared context, the claimed job, and the
/// wrapper's open transaction; all database effects and enqueues must go
/// through that transaction so they commit or vanish atomically.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &WatchContext,
        job: &Job,
        tx: &mut PgConnection,
    ) -> Result<Outcome>;
}

/// Verdict of the cron gate for a singleton job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateVerdict {
    /// The schedule is due; run the handler body.
    CarryOn,
    /// Another instance is (now) queued for the future; commit and retire.
    Skip,
    /// Metadata was just created; commit and re-enter to honor it.
    TryAgain,
}

/// Pure decision table for a singleton whose metadata row exists.
///
/// `future_duplicates` counts queued jobs with the same class and args,
/// a `run_at` at or past the schedule, and a different job id. Excluding
/// our own id matters: a job whose `run_at` slid under clock skew would
/// otherwise see itself as the future instance and starve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateAction {
    Proceed,
    SkipExisting,
    ScheduleAt(DateTime<Utc>),
}

pub(crate) fn gate_action(
    now: DateTime<Utc>,
    next_scheduled: DateTime<Utc>,
    future_duplicates: i64,
) -> GateAction {
    if now >= next_scheduled {
        GateAction::Proceed
    } else if future_duplicates > 0 {
        GateAction::SkipExisting
    } else {
        GateAction::ScheduleAt(next_scheduled)
    }
}

enum Pass {
    Finished,
    RunAgain,
}

/// Envelope around a single handler invocation. One wrapper instance
/// serves one claimed job; the worker constructs it per claim.
pub struct JobWrapper {
    handler: Arc<dyn JobHandler>,
    schedule: Schedule,
    ctx: Arc<WatchContext>,
}

impl JobWrapper {
    pub fn new(handler: Arc<dyn JobHandler>, schedule: Schedule, ctx: Arc<WatchContext>) -> Self {
        Self {
            handler,
            schedule,
            ctx,
        }
    }

    /// Run the job to completion, re-entering on `RunAgainNow` and the
    /// gate's `TryAgain`. Each iteration gets a fresh transaction; the loop
    /// is bounded by handler progress.
    pub async fn run(&self, conn: &mut PgConnection, job: &Job) -> Result<()> {
        loop {
            match self.try_run(conn, job).await? {
                Pass::Finished => return Ok(()),
                Pass::RunAgain => {
                    debug!(
                        job_id = job.job_id,
                        job_class = %job.job_class,
                        "immediate reschedule requested, running again"
                    );
                }
            }
        }
    }

    /// One iteration: a single transaction, committed or rolled back here.
    async fn try_run(&self, conn: &mut PgConnection, job: &Job) -> Result<Pass> {
        debug!(job_id = job.job_id, job_class = %job.job_class, "job starting");

        let mut tx = conn.begin().await?;
        let key = job.singleton_key();

        if self.schedule.singleton {
            match self.gate(&mut *tx, job, &key).await? {
                GateVerdict::CarryOn => {}
                GateVerdict::Skip => {
                    tx.commit().await?;
                    return Ok(Pass::Finished);
                }
                GateVerdict::TryAgain => {
                    tx.commit().await?;
                    return Ok(Pass::RunAgain);
                }
            }
        }

        match self.handler.run(&self.ctx, job, &mut *tx).await {
            Ok(Outcome::Done) => {
                if self.schedule.singleton {
                    if let Some(every) = self.schedule.every {
                        self.schedule_next(&mut *tx, job, &key, every).await?;
                    }
                }
                tx.commit().await?;
                debug!(job_id = job.job_id, job_class = %job.job_class, "job finished");
                Ok(Pass::Finished)
            }
            Ok(Outcome::RunAgainNow) => {
                tx.commit().await?;
                Ok(Pass::RunAgain)
            }
            Ok(Outcome::DoNotReschedule) => {
                tx.rollback().await?;
                debug!(
                    job_id = job.job_id,
                    job_class = %job.job_class,
                    "job requested no reschedule, retiring"
                );
                Ok(Pass::Finished)
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e)
            }
        }
    }

    /// The cron gate. Holds the metadata row's lock for the rest of the
    /// transaction, which is what makes singleton execution exclusive.
    async fn gate(
        &self,
        tx: &mut PgConnection,
        job: &Job,
        key: &str,
    ) -> Result<GateVerdict> {
        let Some(meta) = CronMetadata::lock(key, tx).await? else {
            CronMetadata::insert_default(key, tx).await?;
            return Ok(GateVerdict::TryAgain);
        };

        let now = Utc::now();
        let future = if now < meta.next_scheduled {
            self.count_future_duplicates(tx, job, meta.next_scheduled)
                .await?
        } else {
            0
        };

        match gate_action(now, meta.next_scheduled, future) {
            GateAction::Proceed => Ok(GateVerdict::CarryOn),
            GateAction::SkipExisting => Ok(GateVerdict::Skip),
            GateAction::ScheduleAt(at) => {
                NewJob::raw(job.job_class.clone(), job.args.clone())
                    .at(at)
                    .enqueue(tx)
                    .await?;
                Ok(GateVerdict::Skip)
            }
        }
    }

    async fn count_future_duplicates(
        &self,
        tx: &mut PgConnection,
        job: &Job,
        next_scheduled: DateTime<Utc>,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM que_jobs
            WHERE job_class = $1
              AND args::jsonb = $2::jsonb
              AND run_at >= $3
              AND job_id != $4
            "#,
        )
        .bind(&job.job_class)
        .bind(&job.args)
        .bind(next_scheduled)
        .bind(job.job_id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(count)
    }

    /// Record completion and enqueue the next occurrence, all inside the
    /// handler's transaction.
    async fn schedule_next(
        &self,
        tx: &mut PgConnection,
        job: &Job,
        key: &str,
        every: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let next = now + every;

        CronMetadata::mark_completed(key, now, next, tx).await?;
        NewJob::raw(job.job_class.clone(), job.args.clone())
            .at(next)
            .enqueue(tx)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn due_schedule_proceeds() {
        assert_eq!(gate_action(at(100), at(100), 0), GateAction::Proceed);
        assert_eq!(gate_action(at(101), at(100), 0), GateAction::Proceed);
    }

    #[test]
    fn ahead_of_schedule_with_future_duplicate_skips() {
        assert_eq!(gate_action(at(50), at(100), 1), GateAction::SkipExisting);
    }

    #[test]
    fn ahead_of_schedule_without_duplicate_schedules_replacement() {
        assert_eq!(
            gate_action(at(50), at(100), 0),
            GateAction::ScheduleAt(at(100))
        );
    }

    #[test]
    fn duplicates_are_irrelevant_once_due() {
        // A stale count must never block a due schedule.
        assert_eq!(gate_action(at(200), at(100), 3), GateAction::Proceed);
    }
}
