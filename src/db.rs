//! Database connection and schema bootstrap.
//!
//! The schema is applied once at process start, before any worker claims
//! a job. Every statement is `CREATE TABLE IF NOT EXISTS`, so restarts
//! and multiple instances racing the bootstrap are harmless.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::Config;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS que_jobs (
    priority    smallint    NOT NULL DEFAULT 100,
    run_at      timestamptz NOT NULL DEFAULT now(),
    job_id      bigserial   NOT NULL,
    job_class   text        NOT NULL,
    args        json        NOT NULL DEFAULT '[]'::json,
    error_count integer     NOT NULL DEFAULT 0,
    last_error  text,
    queue       text        NOT NULL DEFAULT '',

    CONSTRAINT que_jobs_pkey PRIMARY KEY (queue, priority, run_at, job_id)
);

COMMENT ON TABLE que_jobs IS '3';

CREATE TABLE IF NOT EXISTS cron_metadata (
    id             text                     PRIMARY KEY,
    last_completed timestamp with time zone NOT NULL DEFAULT TIMESTAMP 'EPOCH',
    next_scheduled timestamp with time zone NOT NULL DEFAULT TIMESTAMP 'EPOCH'
);

CREATE TABLE IF NOT EXISTS monitored_logs (
    url         text    PRIMARY KEY,
    processed   bigint  NOT NULL DEFAULT 0,
    state       integer NOT NULL DEFAULT 0,
    connect_url text
);

CREATE TABLE IF NOT EXISTS cert_store (
    key                 bytea       PRIMARY KEY,
    leaf                bytea       NOT NULL,
    not_valid_before    timestamptz,
    not_valid_after     timestamptz,
    issuer_cn           text,
    jurisdiction        text,
    cdn                 text,
    needs_update        boolean,
    discovered          timestamptz NOT NULL DEFAULT now(),
    needs_ckan_backfill boolean
);

CREATE TABLE IF NOT EXISTS cert_index (
    key    bytea NOT NULL,
    domain text  NOT NULL,

    CONSTRAINT cert_index_pkey PRIMARY KEY (key, domain)
);

CREATE TABLE IF NOT EXISTS error_log (
    discovered timestamptz NOT NULL DEFAULT now(),
    error      text        NOT NULL
);
"#;

/// Connect to Postgres with a pool sized for the worker fleet.
///
/// Each worker holds one connection for the duration of a job; producers
/// and the health endpoint need headroom on top of that.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections((config.worker_count * 2).max(4) as u32)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

/// Apply the schema. Runs once at startup, not per connection.
pub async fn bootstrap(pool: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("Failed to bootstrap database schema")?;

    tracing::info!("database schema bootstrapped");
    Ok(())
}
