//! Poller (C12): cursor-based backfill sweep for repositories whose
//! webhooks may have been missed, per design doc §4.12.

use anyhow::{Context, Result};
use host_client::{AppCredentials, GitHubHostClient, HostClient};
use shared::{db, Config};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

mod dedup;
mod error;
mod sweep;

/// How often the sweep loop wakes up to check for due repositories. Kept
/// short relative to `poll_interval_minutes` so a repo is picked up close
/// to its due time rather than only at coarse multiples of the tick.
const TICK_INTERVAL_SECS: u64 = 60;
/// Maximum due repositories considered per tick.
const DUE_REPOS_PER_TICK: i64 = 100;

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing();
    tracing::info!("starting poller");

    let config = Config::from_env().context("failed to load configuration")?;

    let db_pool = db::create_pool(&config.database)
        .await
        .context("failed to create database pool")?;
    db::check_health(&db_pool)
        .await
        .context("database health check failed")?;

    let mut redis_conn = shared::redis::create_client(&config.redis.connection_url())
        .await
        .context("failed to connect to redis")?;

    let app_credentials = AppCredentials {
        app_id: env::var("HOST_APP_ID").context("HOST_APP_ID must be set")?,
        private_key_pem: env::var("HOST_APP_PRIVATE_KEY").context("HOST_APP_PRIVATE_KEY must be set")?,
    };
    let host: Arc<dyn HostClient> = Arc::new(GitHubHostClient::new(config.host.api_base_url.clone(), app_credentials));

    let interval = chrono::Duration::minutes(config.scoring.poll_interval_minutes);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let tick_task = tokio::spawn({
        let db_pool = db_pool.clone();
        let host = host.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }

                match sweep::run_sweep(&db_pool, &mut redis_conn, host.as_ref(), interval, DUE_REPOS_PER_TICK).await {
                    Ok(outcome) if outcome.runs_enqueued > 0 || outcome.repositories_swept > 0 => {
                        tracing::info!(
                            repositories_swept = outcome.repositories_swept,
                            runs_enqueued = outcome.runs_enqueued,
                            repositories_deferred = outcome.repositories_deferred,
                            "sweep tick complete"
                        );
                    }
                    Ok(_) => tracing::debug!("sweep tick found nothing due"),
                    Err(e) => tracing::error!(error = %e, "sweep tick failed"),
                }

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(TICK_INTERVAL_SECS)) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    });

    tracing::info!(interval_minutes = config.scoring.poll_interval_minutes, "poller ready");

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, finishing current sweep");
    let _ = shutdown_tx.send(true);
    let _ = tick_task.await;

    tracing::info!("poller stopped");
    Ok(())
}
