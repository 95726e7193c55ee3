//! Postgres-backed durable job queue.
//!
//! Jobs live in the `que_jobs` table, ordered by
//! `(queue, priority, run_at, job_id)`. A worker claims a job by taking a
//! session-level advisory lock on its `job_id` over the worker's dedicated
//! connection, so the claim survives across the handler's transactions and
//! two workers can never hold the same job.

pub mod cron;
pub mod job;
pub mod registry;
pub mod worker;
pub mod wrapper;

pub use job::{Job, NewJob};
pub use registry::{JobRegistry, Schedule};
pub use worker::{WorkerPool, WorkerPoolConfig};
pub use wrapper::{JobHandler, Outcome};
