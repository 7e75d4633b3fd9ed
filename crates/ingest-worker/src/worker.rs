//! Generic per-queue worker loop (design doc §4.11): consume, dispatch to
//! the job's handler, then ack/retry/dead-letter based on the outcome.

use crate::error::OrchError;
use crate::pipeline;
use crate::queue::JobQueue;
use crate::retry::{disposition, Disposition, RetryPolicy};
use crate::watchdog::LeaseTable;
use host_client::HostClient;
use shared::config::ScoringConfig;
use shared::db::DbPool;
use shared::jobs::{AnalyzePayload, EventDeliveryPayload, IngestPayload, Job, JobKind};
use std::sync::Arc;

const BRPOP_TIMEOUT_SECS: u64 = 5;

async fn dispatch(
    pool: &DbPool,
    host: &dyn HostClient,
    config: &ScoringConfig,
    queue: &Arc<dyn JobQueue>,
    job: &Job,
) -> Result<(), OrchError> {
    match job.kind {
        JobKind::Ingest => {
            let payload: IngestPayload = serde_json::from_value(job.payload.clone())?;
            let started = std::time::Instant::now();
            let outcome = pipeline::run_ingest(pool, host, &payload).await?;
            store::AuditStore::record(
                pool,
                payload.repository_id,
                outcome.workflow_run_id,
                "ok",
                outcome.occurrences_inserted,
                outcome.warnings,
                started.elapsed().as_millis() as i64,
            )
            .await?;

            let analyze_payload = AnalyzePayload {
                repository_id: payload.repository_id,
                workflow_run_id: Some(outcome.workflow_run_id),
                test_case_id: None,
            };
            let analyze_job = Job::new(
                JobKind::Analyze,
                Job::repo_run_key(&payload.repository_id.to_string(), &payload.external_run_id),
                serde_json::to_value(&analyze_payload)?,
            );
            tracing::info!(repository_id = %payload.repository_id, "ingest complete, enqueuing analyze");
            queue.enqueue(analyze_job).await?;
            Ok(())
        }
        JobKind::Analyze => {
            let payload: AnalyzePayload = serde_json::from_value(job.payload.clone())?;
            pipeline::run_analyze(pool, host, &payload, config).await
        }
        JobKind::Recompute => {
            tracing::warn!(job_id = %job.id, "recompute scope handling not yet implemented, dropping");
            Ok(())
        }
        JobKind::Poll => {
            tracing::warn!(job_id = %job.id, "poll queue is consumed by the poller binary, dropping");
            Ok(())
        }
        JobKind::Events => {
            let payload: EventDeliveryPayload = serde_json::from_value(job.payload.clone())?;
            handle_event(pool, queue, &payload).await
        }
    }
}

/// Resolves the stored repository for a webhook body's `repository` object.
/// The installation ref comes from our own record rather than the payload,
/// since the stored value is what was verified at install time.
async fn repository_for_event(pool: &DbPool, body: &serde_json::Value) -> Result<Option<shared::models::Repository>, OrchError> {
    let owner = body
        .get("repository")
        .and_then(|r| r.get("owner"))
        .and_then(|o| o.get("login"))
        .and_then(|v| v.as_str());
    let name = body.get("repository").and_then(|r| r.get("name")).and_then(|v| v.as_str());
    let (owner, name) = match (owner, name) {
        (Some(o), Some(n)) => (o, n),
        _ => return Ok(None),
    };
    Ok(store::RepositoryStore::find_by_natural_key(pool, "github", owner, name).await?)
}

async fn handle_event(pool: &DbPool, queue: &Arc<dyn JobQueue>, payload: &EventDeliveryPayload) -> Result<(), OrchError> {
    match payload.event_type.as_str() {
        "workflow_run" => {
            let action = payload.body.get("action").and_then(|v| v.as_str()).unwrap_or("");
            if action != "completed" {
                return Ok(());
            }
            let Some(repo) = repository_for_event(pool, &payload.body).await? else {
                tracing::warn!(delivery_id = %payload.delivery_id, "workflow_run for unknown repository, dropping");
                return Ok(());
            };
            let Some(external_run_id) = payload
                .body
                .get("workflow_run")
                .and_then(|r| r.get("id"))
                .map(|v| v.to_string())
            else {
                tracing::warn!(delivery_id = %payload.delivery_id, "workflow_run event missing run id, dropping");
                return Ok(());
            };

            let ingest_payload = IngestPayload {
                repository_id: repo.id,
                installation_ref: repo.installation_ref.clone(),
                external_run_id: external_run_id.clone(),
            };
            let job = Job::new(
                JobKind::Ingest,
                Job::repo_run_key(&repo.id.to_string(), &external_run_id),
                serde_json::to_value(&ingest_payload)?,
            );
            tracing::info!(delivery_id = %payload.delivery_id, repository_id = %repo.id, "workflow_run completed, enqueuing ingest");
            queue.enqueue(job).await?;
            Ok(())
        }
        "check_run" => {
            let action = payload.body.get("action").and_then(|v| v.as_str()).unwrap_or("");
            if action == "requested_action" {
                let identifier = payload
                    .body
                    .get("requested_action")
                    .and_then(|v| v.get("identifier"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                tracing::info!(delivery_id = %payload.delivery_id, identifier, "check_run action requested");
            }
            Ok(())
        }
        other => {
            tracing::debug!(delivery_id = %payload.delivery_id, event_type = other, "event acknowledged, no handler");
            Ok(())
        }
    }
}

/// Runs one queue's worker loop until `shutdown` fires. `concurrency`
/// independent copies of this loop are spawned per queue at startup.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    kind: JobKind,
    pool: DbPool,
    host: Arc<dyn HostClient>,
    config: ScoringConfig,
    queue: Arc<dyn JobQueue>,
    leases: LeaseTable,
    retry_policy: RetryPolicy,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = tokio::select! {
            result = queue.consume(kind, BRPOP_TIMEOUT_SECS) => result,
            _ = shutdown.changed() => continue,
        };

        let job = match job {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(queue = kind.queue_name(), error = %e, "queue consume failed");
                continue;
            }
        };

        leases.acquire(job.clone());
        let outcome = dispatch(&pool, host.as_ref(), &config, &queue, &job).await;
        leases.release(&job.id);

        match outcome {
            Ok(()) => {
                if let Err(e) = queue.release(&job).await {
                    tracing::error!(job_id = %job.id, error = %e, "failed to release inflight marker");
                }
            }
            Err(err) => {
                tracing::warn!(job_id = %job.id, attempt = job.attempt, error = %err, "job failed");
                match disposition(&err, job.attempt + 1, &retry_policy) {
                    Disposition::RetryAfter(delay) => {
                        let mut retried = job.clone();
                        retried.attempt += 1;
                        tokio::time::sleep(delay).await;
                        if let Err(e) = queue.retry(retried).await {
                            tracing::error!(job_id = %job.id, error = %e, "failed to requeue job for retry");
                        }
                    }
                    Disposition::Dead => {
                        if let Err(e) = queue.send_to_dead(job.clone(), &err.to_string()).await {
                            tracing::error!(job_id = %job.id, error = %e, "failed to move job to dead queue");
                        }
                    }
                }
            }
        }
    }
}
