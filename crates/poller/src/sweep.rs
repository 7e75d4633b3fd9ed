//! Per-repository backfill sweep (design doc §4.12): finds workflow runs a
//! repository's webhooks missed and turns them into `ingest` jobs.

use crate::dedup;
use crate::error::PollResult;
use host_client::{HostClient, RepoRef};
use redis::aio::ConnectionManager;
use shared::db::DbPool;
use shared::jobs::{IngestPayload, Job, JobKind};
use shared::models::Repository;
use store::{RepositoryStore, WorkflowRunStore};

/// Below this fraction of rate budget remaining, a repository's installation
/// is skipped entirely this tick.
const HALT_FRACTION: f64 = 0.10;
/// Below this fraction, only the `K` oldest due repositories are swept.
const RESERVE_FRACTION: f64 = 0.25;
const RESERVE_OLDEST_K: usize = 5;
/// Safety cap on cursor pages per repository per tick; remaining pages are
/// picked up on the next tick rather than looping indefinitely.
const MAX_PAGES_PER_REPO: usize = 20;

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub repositories_swept: usize,
    pub runs_enqueued: usize,
    pub repositories_deferred: usize,
}

/// Sweeps every repository due for a poll, per design doc §4.12. Repos whose
/// installation rate budget is below [`HALT_FRACTION`] are skipped outright;
/// below [`RESERVE_FRACTION`], only the oldest [`RESERVE_OLDEST_K`] due
/// repositories (by `due_for_poll`'s ordering) are swept.
pub async fn run_sweep(
    pool: &DbPool,
    redis: &mut ConnectionManager,
    host: &dyn HostClient,
    interval: chrono::Duration,
    limit: i64,
) -> PollResult<SweepOutcome> {
    let due = RepositoryStore::due_for_poll(pool, interval, limit).await?;
    let mut outcome = SweepOutcome::default();

    for (idx, repo) in due.iter().enumerate() {
        let budget = host.rate_budget(&repo.installation_ref).await;
        if budget.below_reserve(HALT_FRACTION) {
            tracing::warn!(
                repository_id = %repo.id,
                remaining_fraction = budget.remaining_fraction(),
                "rate budget below halt threshold, skipping repository this sweep"
            );
            outcome.repositories_deferred += 1;
            continue;
        }
        if budget.below_reserve(RESERVE_FRACTION) && idx >= RESERVE_OLDEST_K {
            tracing::debug!(repository_id = %repo.id, "rate budget below reserve, deferring to next sweep");
            outcome.repositories_deferred += 1;
            continue;
        }

        let enqueued = sweep_repository(pool, redis, host, repo).await?;
        RepositoryStore::mark_polled(pool, repo.id, chrono::Utc::now()).await?;
        outcome.repositories_swept += 1;
        outcome.runs_enqueued += enqueued;
    }

    Ok(outcome)
}

async fn sweep_repository(
    pool: &DbPool,
    redis: &mut ConnectionManager,
    host: &dyn HostClient,
    repo: &Repository,
) -> PollResult<usize> {
    let repo_ref = RepoRef {
        owner: repo.owner.clone(),
        name: repo.name.clone(),
    };
    let since = repo.last_polled_at;
    let mut cursor = None;
    let mut enqueued = 0usize;

    for page_n in 0..MAX_PAGES_PER_REPO {
        let page = host
            .list_workflow_runs(&repo_ref, &repo.installation_ref, since, cursor.clone())
            .await?;

        for run in &page.runs {
            if run.status != "completed" {
                continue;
            }
            if WorkflowRunStore::find_by_external_id(pool, repo.id, &run.external_run_id)
                .await?
                .is_some()
            {
                continue;
            }
            if !dedup::mark_if_new(redis, repo.id, &run.external_run_id).await? {
                continue;
            }

            let payload = IngestPayload {
                repository_id: repo.id,
                installation_ref: repo.installation_ref.clone(),
                external_run_id: run.external_run_id.clone(),
            };
            let body = serde_json::to_value(&payload).map_err(|e| shared::error::Error::internal(e.to_string()))?;
            let job = Job::new(
                JobKind::Ingest,
                Job::repo_run_key(&repo.id.to_string(), &run.external_run_id),
                body,
            );
            if shared::jobs::enqueue(redis, &job).await? {
                enqueued += 1;
            }
        }

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
        if page_n + 1 == MAX_PAGES_PER_REPO {
            tracing::warn!(
                repository_id = %repo.id,
                "hit pagination cap for this repository's backfill sweep, remaining runs deferred to next tick"
            );
        }
    }

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_fraction_is_stricter_than_reserve_fraction() {
        assert!(HALT_FRACTION < RESERVE_FRACTION);
    }
}
