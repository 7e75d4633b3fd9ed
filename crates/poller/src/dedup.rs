//! Short-lived "already enqueued" cache (design doc §4.12): a run that has
//! already been turned into an `ingest` job is marked here so a repeated
//! sweep within the TTL window does not enqueue it again.

use crate::error::PollResult;
use redis::aio::ConnectionManager;

const SEEN_RUN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

fn seen_run_key(repository_id: uuid::Uuid, external_run_id: &str) -> String {
    format!("flakeguard:poller:seen:{}:{}", repository_id, external_run_id)
}

/// Marks `(repository_id, external_run_id)` as processed, returning `true`
/// if this call is the one that set it (i.e. it was not already marked).
pub async fn mark_if_new(
    conn: &mut ConnectionManager,
    repository_id: uuid::Uuid,
    external_run_id: &str,
) -> PollResult<bool> {
    let key = seen_run_key(repository_id, external_run_id);
    let set: Option<String> = redis::cmd("SET")
        .arg(&key)
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(SEEN_RUN_TTL_SECS)
        .query_async(conn)
        .await?;
    Ok(set.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_run_key_is_namespaced_per_repo_and_run() {
        let repo = uuid::Uuid::new_v4();
        assert_ne!(seen_run_key(repo, "1"), seen_run_key(repo, "2"));
    }
}
