//! Idempotent actions invoked from check-run buttons and scheduled
//! recommendations (design doc §4.10): each drives one host call and
//! reports back an honest per-sub-step result rather than a bare bool.

use crate::types::{ActionOutcome, SubStep};
use host_client::{HostClient, RepoRef};
use shared::db::DbPool;
use shared::models::QuarantineState;
use store::{IssueLinkStore, QuarantineStore};

const ISSUE_PROVIDER: &str = "github";
const QUARANTINE_DURATION_DAYS: i64 = 30;

/// `quarantine(test)`: creates/updates an active quarantine decision and
/// opens a tracking issue if none exists yet. Re-invoking for a test that
/// is already actively quarantined is a no-op.
pub async fn quarantine<H: HostClient>(
    pool: &DbPool,
    host: &H,
    repo: &RepoRef,
    installation_ref: &str,
    test_case_id: uuid::Uuid,
    test_name: &str,
    rationale: &str,
    by_user: &str,
) -> ActionOutcome {
    match QuarantineStore::current_quarantine(pool, test_case_id).await {
        Ok(Some(existing)) if existing.state == QuarantineState::Active => {
            return ActionOutcome::noop("quarantine", "already quarantined, no-op");
        }
        Err(e) => {
            return ActionOutcome::from_sub_steps(
                "quarantine",
                vec![SubStep {
                    name: "record_decision",
                    ok: false,
                    detail: Some(e.to_string()),
                }],
            );
        }
        _ => {}
    }

    let until = chrono::Utc::now() + chrono::Duration::days(QUARANTINE_DURATION_DAYS);
    let decision_step = match QuarantineStore::record(pool, test_case_id, QuarantineState::Active, rationale, by_user, Some(until)).await {
        Ok(_) => SubStep {
            name: "record_decision",
            ok: true,
            detail: None,
        },
        Err(e) => SubStep {
            name: "record_decision",
            ok: false,
            detail: Some(e.to_string()),
        },
    };

    let issue_step = ensure_tracking_issue(pool, host, repo, installation_ref, test_case_id, test_name).await;

    ActionOutcome::from_sub_steps("quarantine", vec![decision_step, issue_step])
}

async fn ensure_tracking_issue<H: HostClient>(
    pool: &DbPool,
    host: &H,
    repo: &RepoRef,
    installation_ref: &str,
    test_case_id: uuid::Uuid,
    test_name: &str,
) -> SubStep {
    match IssueLinkStore::find(pool, test_case_id, ISSUE_PROVIDER).await {
        Ok(Some(_)) => SubStep {
            name: "ensure_issue",
            ok: true,
            detail: Some("tracking issue already exists".to_string()),
        },
        Ok(None) => {
            let title = format!("Flaky test: {test_name}");
            let body = format!("FlakeGuard quarantined `{test_name}` for flakiness.");
            match host.create_issue(repo, installation_ref, &title, &body, &["flaky-test".to_string()]).await {
                Ok(url) => match IssueLinkStore::insert(pool, test_case_id, ISSUE_PROVIDER, &url).await {
                    Ok(_) => SubStep {
                        name: "ensure_issue",
                        ok: true,
                        detail: Some(url),
                    },
                    Err(e) => SubStep {
                        name: "ensure_issue",
                        ok: false,
                        detail: Some(e.to_string()),
                    },
                },
                Err(e) => SubStep {
                    name: "ensure_issue",
                    ok: false,
                    detail: Some(e.safe_message()),
                },
            }
        }
        Err(e) => SubStep {
            name: "ensure_issue",
            ok: false,
            detail: Some(e.to_string()),
        },
    }
}

/// `rerun_failed(run_id, debug?)`: re-runs failed jobs on the host, and
/// best-effort posts a PR comment. A comment failure does not fail the
/// overall action; the outcome reports both sub-steps honestly.
pub async fn rerun_failed<H: HostClient>(
    host: &H,
    repo: &RepoRef,
    installation_ref: &str,
    external_run_id: &str,
    debug: bool,
    pr_number: Option<&str>,
) -> ActionOutcome {
    let rerun_step = match host.rerun_failed_jobs(repo, installation_ref, external_run_id, debug).await {
        Ok(()) => SubStep {
            name: "rerun_failed_jobs",
            ok: true,
            detail: None,
        },
        Err(e) => SubStep {
            name: "rerun_failed_jobs",
            ok: false,
            detail: Some(e.safe_message()),
        },
    };

    let mut sub_steps = vec![rerun_step];

    if let Some(pr) = pr_number {
        let body = format!("FlakeGuard re-ran failed jobs for run `{external_run_id}`.");
        let comment_step = match host.create_issue_comment(repo, installation_ref, pr, &body).await {
            Ok(()) => SubStep {
                name: "post_pr_comment",
                ok: true,
                detail: None,
            },
            Err(e) => SubStep {
                name: "post_pr_comment",
                ok: false,
                detail: Some(e.safe_message()),
            },
        };
        sub_steps.push(comment_step);
    }

    ActionOutcome::from_sub_steps("rerun_failed", sub_steps)
}

/// A minimal test identity, enough to render an issue title/body.
pub struct TestRef {
    pub test_case_id: uuid::Uuid,
    pub name: String,
}

/// `open_issue(tests[])`: a single test gets a per-test issue; multiple
/// tests get one summary issue. Skipped if a tracking issue already
/// exists for the (first) test.
pub async fn open_issue<H: HostClient>(
    pool: &DbPool,
    host: &H,
    repo: &RepoRef,
    installation_ref: &str,
    tests: &[TestRef],
) -> ActionOutcome {
    let Some(first) = tests.first() else {
        return ActionOutcome::noop("open_issue", "no tests given, no-op");
    };

    match IssueLinkStore::find(pool, first.test_case_id, ISSUE_PROVIDER).await {
        Ok(Some(_)) => return ActionOutcome::noop("open_issue", "tracking issue already exists, no-op"),
        Err(e) => {
            return ActionOutcome::from_sub_steps(
                "open_issue",
                vec![SubStep {
                    name: "check_existing",
                    ok: false,
                    detail: Some(e.to_string()),
                }],
            );
        }
        Ok(None) => {}
    }

    let (title, body) = if tests.len() == 1 {
        (format!("Flaky test: {}", first.name), format!("FlakeGuard flagged `{}` as flaky.", first.name))
    } else {
        let names: Vec<&str> = tests.iter().map(|t| t.name.as_str()).collect();
        (
            format!("Flaky tests summary ({} tests)", tests.len()),
            format!("FlakeGuard flagged the following tests as flaky:\n\n{}", names.iter().map(|n| format!("- `{n}`")).collect::<Vec<_>>().join("\n")),
        )
    };

    let create_step = match host.create_issue(repo, installation_ref, &title, &body, &["flaky-test".to_string()]).await {
        Ok(url) => {
            let mut ok = true;
            for t in tests {
                if let Err(e) = IssueLinkStore::insert(pool, t.test_case_id, ISSUE_PROVIDER, &url).await {
                    tracing::warn!(error = %e, test_case_id = %t.test_case_id, "failed to persist issue link");
                    ok = false;
                }
            }
            SubStep {
                name: "create_issue",
                ok,
                detail: Some(url),
            }
        }
        Err(e) => SubStep {
            name: "create_issue",
            ok: false,
            detail: Some(e.safe_message()),
        },
    };

    ActionOutcome::from_sub_steps("open_issue", vec![create_step])
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use host_client::{ArtifactMeta, CheckRunAction, CheckRunOutput, CheckRunRef, HostClientError, HostResult, RateBudget, RunsPage};

    struct FakeHostClient {
        rerun_ok: bool,
        comment_ok: bool,
    }

    #[async_trait]
    impl HostClient for FakeHostClient {
        async fn installation_token(&self, _installation_ref: &str) -> HostResult<(String, chrono::DateTime<chrono::Utc>)> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn list_workflow_runs(
            &self,
            _repo: &RepoRef,
            _installation_ref: &str,
            _since: Option<chrono::DateTime<chrono::Utc>>,
            _cursor: Option<String>,
        ) -> HostResult<RunsPage> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn list_artifacts(&self, _repo: &RepoRef, _installation_ref: &str, _external_run_id: &str) -> HostResult<Vec<ArtifactMeta>> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn download_artifact(&self, _installation_ref: &str, _artifact: &ArtifactMeta) -> HostResult<reqwest::Response> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn create_check_run(
            &self,
            _repo: &RepoRef,
            _installation_ref: &str,
            _head_sha: &str,
            _output: &CheckRunOutput,
            _actions: &[CheckRunAction],
        ) -> HostResult<CheckRunRef> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn update_check_run(
            &self,
            _repo: &RepoRef,
            _installation_ref: &str,
            _check_run: &CheckRunRef,
            _output: &CheckRunOutput,
            _conclusion: Option<&str>,
            _actions: &[CheckRunAction],
        ) -> HostResult<()> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn create_issue(&self, _repo: &RepoRef, _installation_ref: &str, _title: &str, _body: &str, _labels: &[String]) -> HostResult<String> {
            unimplemented!("not exercised by action-handler tests")
        }

        async fn create_issue_comment(&self, _repo: &RepoRef, _installation_ref: &str, _issue_number: &str, _body: &str) -> HostResult<()> {
            if self.comment_ok {
                Ok(())
            } else {
                Err(HostClientError::UpstreamUnavailable("comment failed".to_string()))
            }
        }

        async fn rerun_failed_jobs(&self, _repo: &RepoRef, _installation_ref: &str, _external_run_id: &str, _debug: bool) -> HostResult<()> {
            if self.rerun_ok {
                Ok(())
            } else {
                Err(HostClientError::UpstreamUnavailable("rerun failed".to_string()))
            }
        }

        async fn rate_budget(&self, _installation_ref: &str) -> RateBudget {
            unimplemented!("not exercised by action-handler tests")
        }
    }

    fn repo() -> RepoRef {
        RepoRef {
            owner: "acme".into(),
            name: "widgets".into(),
        }
    }

    #[tokio::test]
    async fn rerun_without_pr_reports_single_step() {
        let host = FakeHostClient {
            rerun_ok: true,
            comment_ok: true,
        };
        let outcome = rerun_failed(&host, &repo(), "install-1", "run-1", false, None).await;
        assert!(outcome.success);
        assert_eq!(outcome.sub_steps.len(), 1);
    }

    #[tokio::test]
    async fn rerun_ok_but_comment_fails_is_partial_success() {
        let host = FakeHostClient {
            rerun_ok: true,
            comment_ok: false,
        };
        let outcome = rerun_failed(&host, &repo(), "install-1", "run-1", false, Some("42")).await;
        assert!(!outcome.success);
        assert_eq!(outcome.summary, "1/2 sub-steps succeeded");
    }

    #[tokio::test]
    async fn rerun_failure_fails_overall_action() {
        let host = FakeHostClient {
            rerun_ok: false,
            comment_ok: true,
        };
        let outcome = rerun_failed(&host, &repo(), "install-1", "run-1", false, None).await;
        assert!(!outcome.success);
    }
}
