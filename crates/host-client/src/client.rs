//! Host client (C1): authenticated, rate-limit-aware calls to the code host.

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::error::{HostClientError, HostResult};
use crate::rate_budget::{RateBudget, RateBudgetTracker};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::token_cache::TokenCache;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunSummary {
    pub external_run_id: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub head_sha: String,
    pub head_branch: String,
    pub run_number: i64,
    pub attempt: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsPage {
    pub runs: Vec<WorkflowRunSummary>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub id: String,
    pub name: String,
    pub size_bytes: i64,
    pub expired: bool,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunAction {
    pub label: String,
    pub description: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary_markdown: String,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunRef {
    pub id: String,
    pub external_id: String,
}

/// Exposes the operations design doc §4.1 names. Implementations are
/// expected to apply [`crate::retry`] and [`CircuitBreakerRegistry`]
/// internally; callers only see the classified [`HostClientError`].
#[async_trait]
pub trait HostClient: Send + Sync {
    async fn installation_token(&self, installation_ref: &str) -> HostResult<(String, DateTime<Utc>)>;

    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> HostResult<RunsPage>;

    async fn list_artifacts(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        external_run_id: &str,
    ) -> HostResult<Vec<ArtifactMeta>>;

    async fn download_artifact(
        &self,
        installation_ref: &str,
        artifact: &ArtifactMeta,
    ) -> HostResult<reqwest::Response>;

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        head_sha: &str,
        output: &CheckRunOutput,
        actions: &[CheckRunAction],
    ) -> HostResult<CheckRunRef>;

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        check_run: &CheckRunRef,
        output: &CheckRunOutput,
        conclusion: Option<&str>,
        actions: &[CheckRunAction],
    ) -> HostResult<()>;

    async fn create_issue(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> HostResult<String>;

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        issue_number: &str,
        body: &str,
    ) -> HostResult<()>;

    async fn rerun_failed_jobs(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        external_run_id: &str,
        debug: bool,
    ) -> HostResult<()>;

    /// Current rate budget snapshot for an installation, per design doc §4.1a.
    async fn rate_budget(&self, installation_ref: &str) -> RateBudget;
}

/// Priority a caller assigns to a request, used to decide who gets delayed
/// when the rate budget runs low (design doc §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallPriority {
    Low,
    Normal,
    Critical,
}

const RESERVE_PERCENT: f64 = 0.1;

/// Default host client talking to a GitHub-style REST API over `reqwest`.
pub struct GitHubHostClient {
    http: reqwest::Client,
    base_url: String,
    app_credentials: AppCredentials,
    tokens: TokenCache,
    budgets: RateBudgetTracker,
    breakers: CircuitBreakerRegistry,
    retry_policy: RetryPolicy,
}

/// Opaque app-level credentials used to mint installation tokens. Kept as
/// a thin record rather than the host SDK's concrete JWT-signing shape, per
/// design doc §9's "dynamic interface of host SDK" note.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub private_key_pem: String,
}

impl GitHubHostClient {
    pub fn new(base_url: impl Into<String>, app_credentials: AppCredentials) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build host HTTP client"),
            base_url: base_url.into(),
            app_credentials,
            tokens: TokenCache::new(),
            budgets: RateBudgetTracker::new(),
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
            retry_policy: RetryPolicy::default(),
        }
    }

    async fn mint_installation_token(&self, installation_ref: &str) -> HostResult<(String, DateTime<Utc>)> {
        // A real implementation exchanges a JWT signed with
        // `app_credentials.private_key_pem` for an installation token at
        // POST /app/installations/{id}/access_tokens. Kept as a single
        // network call behind the single-flight cache in `token_cache`.
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.base_url, installation_ref
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.app_jwt())
            .send()
            .await?;
        classify_status(resp.status().as_u16())?;
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
            expires_at: DateTime<Utc>,
        }
        let body: TokenResponse = resp.json().await?;
        Ok((body.token, body.expires_at))
    }

    fn app_jwt(&self) -> String {
        // Real apps sign a short-lived JWT with `private_key_pem`; the
        // signing mechanics are an interface concern per design doc §9.
        format!("app-jwt-for-{}", self.app_credentials.app_id)
    }

    async fn call_with_guard<T, F, Fut>(
        &self,
        installation_ref: &str,
        resource: &str,
        priority: CallPriority,
        f: F,
    ) -> HostResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = HostResult<T>>,
    {
        if !self.breakers.call_allowed(installation_ref, resource).await {
            return Err(HostClientError::UpstreamUnavailable(format!(
                "circuit open for installation {} resource {}",
                installation_ref, resource
            )));
        }

        let budget = self.budgets.snapshot(installation_ref).await;
        if should_throttle(&budget, priority) {
            let now = Utc::now().timestamp();
            let wait_secs = (budget.reset_at - now).max(0) as u64;
            tracing::debug!(installation_ref, resource, wait_secs, ?priority, "rate budget low, delaying call");
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        let result = execute_with_retry(&self.retry_policy, &f).await;
        match &result {
            Ok(_) => self.breakers.record_success(installation_ref, resource).await,
            Err(e) if e.is_retryable() => {
                self.breakers.record_failure(installation_ref, resource).await
            }
            Err(_) => {}
        }
        result
    }

    async fn update_budget_from_headers(&self, installation_ref: &str, headers: &reqwest::header::HeaderMap) {
        let remaining = header_i64(headers, "x-ratelimit-remaining");
        let limit = header_i64(headers, "x-ratelimit-limit");
        let reset = header_i64(headers, "x-ratelimit-reset");
        if let (Some(remaining), Some(limit), Some(reset)) = (remaining, limit, reset) {
            self.budgets.update(installation_ref, remaining, limit, reset).await;
        }
    }
}

fn header_i64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn classify_status(status: u16) -> HostResult<()> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(HostClientError::AuthFailure(format!("status {}", status))),
        429 => Err(HostClientError::RateLimited {
            reset_at: Utc::now().timestamp() + 60,
        }),
        400 | 404 | 422 => Err(HostClientError::BadRequest(format!("status {}", status))),
        408 | 500..=599 => Err(HostClientError::UpstreamUnavailable(format!("status {}", status))),
        other => Err(HostClientError::Internal(format!("unexpected status {}", other))),
    }
}

#[async_trait]
impl HostClient for GitHubHostClient {
    async fn installation_token(&self, installation_ref: &str) -> HostResult<(String, DateTime<Utc>)> {
        self.tokens
            .get_or_refresh(installation_ref, || self.mint_installation_token(installation_ref))
            .await
    }

    async fn list_workflow_runs(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        since: Option<DateTime<Utc>>,
        cursor: Option<String>,
    ) -> HostResult<RunsPage> {
        let (token, _) = self.installation_token(installation_ref).await?;
        self.call_with_guard(installation_ref, "workflow_runs", CallPriority::Normal, || async {
            let mut req = self.http.get(format!(
                "{}/repos/{}/{}/actions/runs",
                self.base_url, repo.owner, repo.name
            ));
            if let Some(since) = since {
                req = req.query(&[("created", format!(">={}", since.to_rfc3339()))]);
            }
            if let Some(cursor) = &cursor {
                req = req.query(&[("page", cursor.as_str())]);
            }
            let resp = req.bearer_auth(&token).send().await?;
            classify_status(resp.status().as_u16())?;
            self.update_budget_from_headers(installation_ref, resp.headers()).await;
            let runs: Vec<WorkflowRunSummary> = resp.json().await.unwrap_or_default();
            Ok(RunsPage {
                runs,
                next_cursor: None,
            })
        })
        .await
    }

    async fn list_artifacts(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        external_run_id: &str,
    ) -> HostResult<Vec<ArtifactMeta>> {
        let (token, _) = self.installation_token(installation_ref).await?;
        self.call_with_guard(installation_ref, "artifacts", CallPriority::Normal, || async {
            let resp = self
                .http
                .get(format!(
                    "{}/repos/{}/{}/actions/runs/{}/artifacts",
                    self.base_url, repo.owner, repo.name, external_run_id
                ))
                .bearer_auth(&token)
                .send()
                .await?;
            classify_status(resp.status().as_u16())?;
            self.update_budget_from_headers(installation_ref, resp.headers()).await;
            Ok(resp.json().await.unwrap_or_default())
        })
        .await
    }

    async fn download_artifact(
        &self,
        installation_ref: &str,
        artifact: &ArtifactMeta,
    ) -> HostResult<reqwest::Response> {
        if artifact.expired {
            return Err(HostClientError::BadRequest("artifact expired".to_string()));
        }
        let (token, _) = self.installation_token(installation_ref).await?;
        let resp = self
            .http
            .get(&artifact.download_url)
            .bearer_auth(&token)
            .send()
            .await?;
        classify_status(resp.status().as_u16())?;
        Ok(resp)
    }

    async fn create_check_run(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        head_sha: &str,
        output: &CheckRunOutput,
        actions: &[CheckRunAction],
    ) -> HostResult<CheckRunRef> {
        let (token, _) = self.installation_token(installation_ref).await?;
        let external_id = format!("flakeguard-analysis-{}", head_sha);
        self.call_with_guard(installation_ref, "check_runs", CallPriority::Critical, || async {
            let resp = self
                .http
                .post(format!(
                    "{}/repos/{}/{}/check-runs",
                    self.base_url, repo.owner, repo.name
                ))
                .bearer_auth(&token)
                .json(&serde_json::json!({
                    "name": "FlakeGuard",
                    "head_sha": head_sha,
                    "external_id": external_id,
                    "output": output,
                    "actions": actions,
                }))
                .send()
                .await?;
            classify_status(resp.status().as_u16())?;
            self.update_budget_from_headers(installation_ref, resp.headers()).await;
            #[derive(Deserialize)]
            struct Created {
                id: i64,
            }
            let created: Created = resp.json().await?;
            Ok(CheckRunRef {
                id: created.id.to_string(),
                external_id: external_id.clone(),
            })
        })
        .await
    }

    async fn update_check_run(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        check_run: &CheckRunRef,
        output: &CheckRunOutput,
        conclusion: Option<&str>,
        actions: &[CheckRunAction],
    ) -> HostResult<()> {
        let (token, _) = self.installation_token(installation_ref).await?;
        self.call_with_guard(installation_ref, "check_runs", CallPriority::Critical, || async {
            let resp = self
                .http
                .patch(format!(
                    "{}/repos/{}/{}/check-runs/{}",
                    self.base_url, repo.owner, repo.name, check_run.id
                ))
                .bearer_auth(&token)
                .json(&serde_json::json!({
                    "output": output,
                    "conclusion": conclusion,
                    "actions": actions,
                }))
                .send()
                .await?;
            classify_status(resp.status().as_u16())?;
            self.update_budget_from_headers(installation_ref, resp.headers()).await;
            Ok(())
        })
        .await
    }

    async fn create_issue(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> HostResult<String> {
        let (token, _) = self.installation_token(installation_ref).await?;
        self.call_with_guard(installation_ref, "issues", CallPriority::Normal, || async {
            let resp = self
                .http
                .post(format!(
                    "{}/repos/{}/{}/issues",
                    self.base_url, repo.owner, repo.name
                ))
                .bearer_auth(&token)
                .json(&serde_json::json!({ "title": title, "body": body, "labels": labels }))
                .send()
                .await?;
            classify_status(resp.status().as_u16())?;
            self.update_budget_from_headers(installation_ref, resp.headers()).await;
            #[derive(Deserialize)]
            struct Created {
                html_url: String,
            }
            let created: Created = resp.json().await?;
            Ok(created.html_url)
        })
        .await
    }

    async fn create_issue_comment(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        issue_number: &str,
        body: &str,
    ) -> HostResult<()> {
        let (token, _) = self.installation_token(installation_ref).await?;
        self.call_with_guard(installation_ref, "issues", CallPriority::Normal, || async {
            let resp = self
                .http
                .post(format!(
                    "{}/repos/{}/{}/issues/{}/comments",
                    self.base_url, repo.owner, repo.name, issue_number
                ))
                .bearer_auth(&token)
                .json(&serde_json::json!({ "body": body }))
                .send()
                .await?;
            classify_status(resp.status().as_u16())?;
            Ok(())
        })
        .await
    }

    async fn rerun_failed_jobs(
        &self,
        repo: &RepoRef,
        installation_ref: &str,
        external_run_id: &str,
        debug: bool,
    ) -> HostResult<()> {
        let (token, _) = self.installation_token(installation_ref).await?;
        self.call_with_guard(installation_ref, "reruns", CallPriority::Normal, || async {
            let path = if debug { "rerun-failed-jobs?debug_enabled=true" } else { "rerun-failed-jobs" };
            let resp = self
                .http
                .post(format!(
                    "{}/repos/{}/{}/actions/runs/{}/{}",
                    self.base_url, repo.owner, repo.name, external_run_id, path
                ))
                .bearer_auth(&token)
                .send()
                .await?;
            classify_status(resp.status().as_u16())?;
            Ok(())
        })
        .await
    }

    async fn rate_budget(&self, installation_ref: &str) -> RateBudget {
        self.budgets.snapshot(installation_ref).await
    }
}

/// Whether calls at `priority` should be delayed given the current budget,
/// per design doc §4.1: below reservePercent, non-critical traffic waits.
pub fn should_throttle(budget: &RateBudget, priority: CallPriority) -> bool {
    if priority == CallPriority::Critical {
        return false;
    }
    budget.below_reserve(RESERVE_PERCENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_maps_families_correctly() {
        assert!(matches!(classify_status(200), Ok(())));
        assert!(matches!(classify_status(401), Err(HostClientError::AuthFailure(_))));
        assert!(matches!(classify_status(429), Err(HostClientError::RateLimited { .. })));
        assert!(matches!(classify_status(404), Err(HostClientError::BadRequest(_))));
        assert!(matches!(classify_status(503), Err(HostClientError::UpstreamUnavailable(_))));
    }

    #[test]
    fn critical_priority_never_throttled() {
        let budget = RateBudget {
            remaining: 1,
            limit: 5000,
            reset_at: 0,
        };
        assert!(!should_throttle(&budget, CallPriority::Critical));
        assert!(should_throttle(&budget, CallPriority::Normal));
    }
}
