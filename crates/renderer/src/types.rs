//! Renderer input/output types (design doc §4.9).

use analytics::{Priority, Recommendation};

/// One analyzed test, the renderer's unit of input. Built by the job
/// orchestrator from a scorer + detection engine pass.
#[derive(Debug, Clone)]
pub struct AnalyzedTest {
    pub test_case_id: uuid::Uuid,
    pub name: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub score: f64,
    pub confidence: f64,
    pub fail_count: u32,
    pub recent_failures: u32,
    pub recommendation: Recommendation,
    pub priority: Priority,
}

#[derive(Debug, Clone)]
pub struct RepoInfo {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Quarantine,
    RerunFailed,
    OpenIssue,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub kind: ActionKind,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub title: String,
    pub summary_markdown: String,
    pub actions: Vec<Action>,
}
