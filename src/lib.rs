// certwatch - Certificate Transparency monitor
//
// Watches the public network of CT logs for freshly issued certificates
// under a monitored domain suffix, persists them, and fans out downstream
// notifications. Work is driven by a transactional Postgres-backed job
// queue; every handler runs inside its own database transaction.

pub mod config;
pub mod ct;
pub mod db;
pub mod jobs;
pub mod models;
pub mod queue;
pub mod server;

pub use config::Config;

use anyhow::{Context as _, Result};
use sqlx::PgPool;

/// Shared dependencies handed to every job handler.
///
/// Handlers receive this alongside the claimed job and the open
/// transaction; there is no other ambient state.
pub struct WatchContext {
    pub pool: PgPool,
    pub http: reqwest::Client,
    pub config: Config,
}

impl WatchContext {
    pub fn new(pool: PgPool, config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { pool, http, config })
    }
}
