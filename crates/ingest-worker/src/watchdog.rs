//! Stalled-job watchdog (design doc §4.11a): a heartbeat-timeout lease
//! table, scanned periodically to return jobs whose worker died back to
//! `waiting`.

use crate::queue::JobQueue;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shared::jobs::Job;
use std::sync::Arc;
use std::time::Duration;

/// Default heartbeat timeout: a lease not renewed within this window is
/// considered abandoned.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: i64 = 30;

struct Lease {
    job: Job,
    leased_at: DateTime<Utc>,
}

/// Tracks in-flight jobs by id. Workers register a lease on consume and
/// clear it once the job reaches a terminal outcome; the watchdog scans
/// for leases that outlived the timeout without being cleared.
#[derive(Clone, Default)]
pub struct LeaseTable {
    leases: Arc<DashMap<String, Lease>>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, job: Job) {
        self.leases.insert(
            job.id.clone(),
            Lease {
                job,
                leased_at: Utc::now(),
            },
        );
    }

    /// Renews a lease's timestamp; call from the in-flight worker on
    /// progress heartbeats for long-running jobs.
    pub fn heartbeat(&self, job_id: &str) {
        if let Some(mut lease) = self.leases.get_mut(job_id) {
            lease.leased_at = Utc::now();
        }
    }

    pub fn release(&self, job_id: &str) {
        self.leases.remove(job_id);
    }

    fn stalled(&self, timeout_secs: i64) -> Vec<Job> {
        let cutoff = Utc::now() - chrono::Duration::seconds(timeout_secs);
        self.leases
            .iter()
            .filter(|entry| entry.leased_at < cutoff)
            .map(|entry| entry.job.clone())
            .collect()
    }
}

/// Runs until `shutdown` fires, scanning `leases` every `scan_interval` and
/// requeuing anything stalled longer than `timeout_secs`.
pub async fn run(
    leases: LeaseTable,
    queue: Arc<dyn JobQueue>,
    timeout_secs: i64,
    scan_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(scan_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for job in leases.stalled(timeout_secs) {
                    tracing::warn!(job_id = %job.id, "lease stalled, returning job to waiting");
                    leases.release(&job.id);
                    if let Err(e) = queue.retry(job.clone()).await {
                        tracing::error!(job_id = %job.id, error = %e, "failed to requeue stalled job");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::jobs::JobKind;

    #[test]
    fn fresh_lease_is_not_stalled() {
        let table = LeaseTable::new();
        table.acquire(Job::new(JobKind::Ingest, "k1", serde_json::json!({})));
        assert!(table.stalled(30).is_empty());
    }

    #[test]
    fn released_lease_drops_out_of_scan() {
        let table = LeaseTable::new();
        let job = Job::new(JobKind::Ingest, "k1", serde_json::json!({}));
        table.acquire(job.clone());
        table.release(&job.id);
        assert!(table.stalled(0).is_empty());
    }
}
