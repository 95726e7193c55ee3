//! Health endpoint for the worker process.
//!
//! Exposes liveness plus the queue counters that the external metrics
//! exporter scrapes; nothing else is served from this process.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: String,
    queued_jobs: i64,
    errored_jobs: i64,
}

pub fn router(pool: PgPool) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(health_handler))
        .with_state(pool)
}

async fn index_handler() -> &'static str {
    "Up and away."
}

/// Health check endpoint
async fn health_handler(State(pool): State<PgPool>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database, status_code, (queued_jobs, errored_jobs)) =
        match queue_stats(&pool).await {
            Ok(counts) => ("healthy", "ok", StatusCode::OK, counts),
            Err(_) => ("unhealthy", "error", StatusCode::SERVICE_UNAVAILABLE, (0, 0)),
        };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            database: database.to_string(),
            queued_jobs,
            errored_jobs,
        }),
    )
}

async fn queue_stats(pool: &PgPool) -> Result<(i64, i64), sqlx::Error> {
    let queued: i64 = sqlx::query_scalar("SELECT count(*) FROM que_jobs")
        .fetch_one(pool)
        .await?;
    let errored: i64 = sqlx::query_scalar("SELECT count(*) FROM que_jobs WHERE error_count > 0")
        .fetch_one(pool)
        .await?;

    Ok((queued, errored))
}
