//! Job model and claim/release operations for the `que_jobs` table.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgConnection;

/// How many ready jobs to consider per claim attempt. A candidate is
/// skipped when another worker already holds its advisory lock.
const CLAIM_CANDIDATES: i64 = 8;

/// A claimed row from `que_jobs`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub priority: i16,
    pub run_at: DateTime<Utc>,
    pub job_id: i64,
    pub job_class: String,
    pub args: serde_json::Value,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub queue: String,
}

impl Job {
    /// Deserialize the job's JSON args.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.args.clone())
            .map_err(|e| anyhow!("failed to deserialize args for {}: {}", self.job_class, e))
    }

    /// The singleton identity of this job: class plus compact args JSON.
    ///
    /// Two jobs with the same class and args share one cron_metadata row.
    pub fn singleton_key(&self) -> String {
        format!("{}{}", self.job_class, self.args)
    }

    /// Claim the next ready job on this connection.
    ///
    /// Scans the head of the queue in `(priority, run_at, job_id)` order and
    /// takes the first job whose advisory lock is free. The row is re-read
    /// after locking because another worker may have completed and deleted
    /// it between the candidate scan and the lock.
    pub async fn claim_one(conn: &mut PgConnection, queue: &str) -> Result<Option<Job>> {
        let candidates: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT job_id FROM que_jobs
            WHERE queue = $1 AND run_at <= now()
            ORDER BY priority, run_at, job_id
            LIMIT $2
            "#,
        )
        .bind(queue)
        .bind(CLAIM_CANDIDATES)
        .fetch_all(&mut *conn)
        .await?;

        for job_id in candidates {
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(job_id)
                .fetch_one(&mut *conn)
                .await?;
            if !locked {
                continue;
            }

            let job = sqlx::query_as::<_, Job>(
                r#"
                SELECT priority, run_at, job_id, job_class, args, error_count, last_error, queue
                FROM que_jobs
                WHERE job_id = $1 AND run_at <= now()
                "#,
            )
            .bind(job_id)
            .fetch_optional(&mut *conn)
            .await?;

            match job {
                Some(job) => return Ok(Some(job)),
                None => Self::unlock(conn, job_id).await?,
            }
        }

        Ok(None)
    }

    /// Release a finished job: delete the row and drop the advisory lock.
    pub async fn complete(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query("DELETE FROM que_jobs WHERE job_id = $1")
            .bind(self.job_id)
            .execute(&mut *conn)
            .await?;

        Self::unlock(conn, self.job_id).await
    }

    /// Release a failed job: record the error and push `run_at` into the
    /// future so the queue redelivers it after a backoff.
    pub async fn fail(&self, conn: &mut PgConnection, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE que_jobs
            SET error_count = error_count + 1,
                last_error = $2,
                run_at = now() + make_interval(secs => $3)
            WHERE job_id = $1
            "#,
        )
        .bind(self.job_id)
        .bind(error)
        .bind(retry_delay_secs(self.error_count) as f64)
        .execute(&mut *conn)
        .await?;

        Self::unlock(conn, self.job_id).await
    }

    async fn unlock(conn: &mut PgConnection, job_id: i64) -> Result<()> {
        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(job_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(())
    }
}

/// Retry delay after the n-th failure (quartic curve, que-compatible).
pub(crate) fn retry_delay_secs(prior_failures: i32) -> i64 {
    let failures = i64::from(prior_failures) + 1;
    failures.pow(4) + 3
}

/// A job to be inserted. Enqueues run inside the producer's transaction,
/// so a rolled-back handler leaves no orphan jobs behind.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_class: String,
    pub args: serde_json::Value,
    pub run_at: Option<DateTime<Utc>>,
    pub priority: i16,
    pub queue: String,
}

impl NewJob {
    pub fn new<A: Serialize>(job_class: impl Into<String>, args: &A) -> Result<Self> {
        Ok(Self::raw(job_class, serde_json::to_value(args)?))
    }

    /// Build a job from an already-serialized args value, e.g. when
    /// re-enqueueing the job currently being worked.
    pub fn raw(job_class: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            job_class: job_class.into(),
            args,
            run_at: None,
            priority: 100,
            queue: String::new(),
        }
    }

    /// Schedule the job for a future time instead of now.
    pub fn at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub async fn enqueue(self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO que_jobs (queue, priority, run_at, job_class, args)
            VALUES ($1, $2, COALESCE($3, now()), $4, $5)
            "#,
        )
        .bind(&self.queue)
        .bind(self.priority)
        .bind(self.run_at)
        .bind(&self.job_class)
        .bind(&self.args)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
