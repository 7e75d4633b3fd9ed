//! Ingest worker (C11): the job orchestrator that drains the `events`,
//! `ingest`, `analyze`, `recompute` and `poll` queues, per design doc §4.11.

use anyhow::{Context, Result};
use host_client::{AppCredentials, GitHubHostClient, HostClient};
use shared::jobs::JobKind;
use shared::{db, Config};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

mod error;
mod pipeline;
mod queue;
mod retry;
mod watchdog;
mod worker;

use queue::{JobQueue, RedisJobQueue};
use retry::RetryPolicy;
use watchdog::LeaseTable;

const DRAIN_DEADLINE_SECS: u64 = 30;
const WATCHDOG_SCAN_INTERVAL_SECS: u64 = 10;

fn concurrency_for(kind: JobKind) -> usize {
    match kind {
        JobKind::Events => 10,
        JobKind::Ingest => 3,
        JobKind::Analyze => 5,
        JobKind::Recompute => 2,
        JobKind::Poll => 1,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing();
    tracing::info!("starting ingest worker");

    let config = Config::from_env().context("failed to load configuration")?;

    let db_pool = db::create_pool(&config.database)
        .await
        .context("failed to create database pool")?;
    db::check_health(&db_pool)
        .await
        .context("database health check failed")?;

    let redis_conn = shared::redis::create_client(&config.redis.connection_url())
        .await
        .context("failed to connect to redis")?;

    let app_credentials = AppCredentials {
        app_id: env::var("HOST_APP_ID").context("HOST_APP_ID must be set")?,
        private_key_pem: env::var("HOST_APP_PRIVATE_KEY").context("HOST_APP_PRIVATE_KEY must be set")?,
    };
    let host: Arc<dyn HostClient> = Arc::new(GitHubHostClient::new(config.host.api_base_url.clone(), app_credentials));

    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(redis_conn));
    let leases = LeaseTable::new();
    let retry_policy = RetryPolicy::default();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    for kind in [
        JobKind::Events,
        JobKind::Ingest,
        JobKind::Analyze,
        JobKind::Recompute,
        JobKind::Poll,
    ] {
        for _ in 0..concurrency_for(kind) {
            let pool = db_pool.clone();
            let host = host.clone();
            let scoring = config.scoring.clone();
            let queue = queue.clone();
            let leases = leases.clone();
            let retry_policy = retry_policy.clone();
            let rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                worker::run(kind, pool, host, scoring, queue, leases, retry_policy, rx).await;
            }));
        }
    }

    let watchdog_handle = tokio::spawn(watchdog::run(
        leases.clone(),
        queue.clone(),
        watchdog::DEFAULT_HEARTBEAT_TIMEOUT_SECS,
        Duration::from_secs(WATCHDOG_SCAN_INTERVAL_SECS),
        shutdown_rx.clone(),
    ));

    tracing::info!(workers = handles.len(), "ingest worker ready");

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining in-flight jobs");
    let _ = shutdown_tx.send(true);

    drain_workers(handles, Duration::from_secs(DRAIN_DEADLINE_SECS)).await;
    let _ = watchdog_handle.await;

    tracing::info!("ingest worker stopped");
    Ok(())
}

/// Waits for every worker task to finish, up to `deadline`. Anything still
/// in flight past the deadline is abandoned here; its lease will be
/// reclaimed and requeued by the watchdog.
async fn drain_workers(handles: Vec<tokio::task::JoinHandle<()>>, deadline: Duration) {
    let join_all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(deadline, join_all).await.is_err() {
        tracing::warn!("drain deadline exceeded, remaining jobs will be requeued by the watchdog");
    }
}
