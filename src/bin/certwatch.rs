// Main entry point for the certwatch worker process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use certwatch::queue::{NewJob, WorkerPool, WorkerPoolConfig};
use certwatch::{db, jobs, server, Config, WatchContext};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,certwatch=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("Starting certwatch");

    let config = Config::from_env().context("Failed to load configuration")?;
    let worker_count = config.worker_count;
    let port = config.port;

    let pool = db::connect(&config).await?;
    db::bootstrap(&pool).await?;

    let ctx = Arc::new(WatchContext::new(pool.clone(), config)?);
    let registry = Arc::new(jobs::build_registry());

    // Seed the recurring jobs. Every boot enqueues them again; the cron
    // gate collapses the extras.
    {
        let mut conn = pool.acquire().await?;
        for class in jobs::SEED_CRONS {
            NewJob::raw(class, serde_json::json!({}))
                .enqueue(&mut conn)
                .await
                .with_context(|| format!("Failed to seed {class}"))?;
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone())?;

    let workers = WorkerPool::with_config(
        registry,
        ctx,
        WorkerPoolConfig {
            workers: worker_count,
            ..Default::default()
        },
    );
    let worker_handle = tokio::spawn(workers.run(shutdown.clone()));

    let app = server::router(pool.clone());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind health endpoint")?;
    tracing::info!("Health endpoint listening on {addr}");

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
            .context("Health server error")
    });

    let (workers, server) = tokio::try_join!(worker_handle, server_handle)?;
    workers?;
    server?;

    pool.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Cancel the token on ctrl-c or SIGTERM so workers drain gracefully.
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        #[cfg(not(unix))]
        let _ = tokio::signal::ctrl_c().await;

        tracing::info!("Shutdown signal received, draining workers");
        shutdown.cancel();
    });

    Ok(())
}
