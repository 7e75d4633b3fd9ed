//! Deterministic Markdown rendering (design doc §4.9).

use crate::types::{Action, ActionKind, AnalyzedTest, RenderedReport, RepoInfo};
use analytics::{Priority, Recommendation};

const MAX_ROWS: usize = 20;
const MAX_NAME_CHARS: usize = 50;
const MAX_SUMMARY_BYTES: usize = 60 * 1024;

/// Markdown metacharacters escaped in free-form table cells.
fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '{' | '}' | '[' | ']' | '(' | ')' | '#' | '+' | '-' | '.' | '!' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn truncate_name(name: &str) -> String {
    let escaped = escape_markdown(name);
    let chars: Vec<char> = escaped.chars().collect();
    if chars.len() <= MAX_NAME_CHARS {
        escaped
    } else {
        let mut truncated: String = chars[..MAX_NAME_CHARS.saturating_sub(1)].iter().collect();
        truncated.push('…');
        truncated
    }
}

fn severity(score: f64) -> (&'static str, &'static str) {
    let clamped = score.clamp(0.0, 1.0);
    if clamped >= 0.8 {
        ("🔴", "critical")
    } else if clamped >= 0.5 {
        ("🟡", "warning")
    } else {
        ("🟢", "stable")
    }
}

fn name_cell(test: &AnalyzedTest, repo: &RepoInfo) -> String {
    let truncated = truncate_name(&test.name);
    match (&test.file, test.line) {
        (Some(file), Some(line)) => format!(
            "[{}](https://{}/{}/{}/blob/{}/{}#L{})",
            truncated, repo.host, repo.owner, repo.repo, repo.default_branch, file, line
        ),
        _ => format!("`{}`", truncated),
    }
}

fn pluralize(count: u32, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

fn build_actions(tests: &[AnalyzedTest]) -> Vec<Action> {
    let critical_count = tests.iter().filter(|t| t.recommendation == Recommendation::Quarantine).count() as u32;
    let recent_failure_count: u32 = tests.iter().map(|t| t.recent_failures).sum();
    let persistent_count = tests
        .iter()
        .filter(|t| t.recommendation != Recommendation::None && t.fail_count >= 3)
        .count() as u32;

    let mut actions = Vec::new();
    if critical_count > 0 {
        actions.push(Action {
            kind: ActionKind::Quarantine,
            label: format!("Quarantine {}", pluralize(critical_count, "test", "tests")),
        });
    }
    if recent_failure_count > 0 {
        actions.push(Action {
            kind: ActionKind::RerunFailed,
            label: format!("Re-run {}", pluralize(recent_failure_count, "failed run", "failed runs")),
        });
    }
    if persistent_count > 0 {
        actions.push(Action {
            kind: ActionKind::OpenIssue,
            label: format!("Open {} for persistent failures", pluralize(persistent_count, "issue", "issues")),
        });
    }
    actions.truncate(3);
    actions
}

/// Renders the flakiness summary for a commit. Deterministic: same input
/// always produces the same output.
pub fn render(tests: &[AnalyzedTest], repo: &RepoInfo) -> RenderedReport {
    if tests.is_empty() {
        return RenderedReport {
            title: "FlakeGuard: no flaky test candidates".to_string(),
            summary_markdown: "No flaky test candidates were found for this run.".to_string(),
            actions: Vec::new(),
        };
    }

    let mut sorted: Vec<&AnalyzedTest> = tests.iter().collect();
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap()
            .then(b.score.partial_cmp(&a.score).unwrap())
            .then(b.fail_count.cmp(&a.fail_count))
    });

    let total = sorted.len();
    let shown = sorted.iter().take(MAX_ROWS);

    let mut body = String::new();
    body.push_str("| Severity | Test | Score | Confidence | Priority |\n");
    body.push_str("|---|---|---|---|---|\n");
    for test in shown {
        let (emoji, _) = severity(test.score);
        body.push_str(&format!(
            "| {} | {} | {:.2} | {:.2} | {} |\n",
            emoji,
            name_cell(test, repo),
            test.score.clamp(0.0, 1.0),
            test.confidence.clamp(0.0, 1.0),
            priority_label(test.priority),
        ));
    }

    if total > MAX_ROWS {
        body.push_str(&format!("\n*Showing top {MAX_ROWS} of {total} total candidates.*\n"));
    }

    let summary_markdown = trim_to_row_boundary(body, MAX_SUMMARY_BYTES);
    let actions = build_actions(tests);

    RenderedReport {
        title: format!("FlakeGuard: {total} flaky test candidate(s) found"),
        summary_markdown,
        actions,
    }
}

fn priority_label(p: Priority) -> &'static str {
    match p {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
        Priority::Critical => "critical",
    }
}

/// Trims `s` to at most `limit` bytes, cutting only at a line boundary so
/// no partial table row survives.
fn trim_to_row_boundary(s: String, limit: usize) -> String {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    match s[..end].rfind('\n') {
        Some(idx) => s[..idx + 1].to_string(),
        None => s[..end].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepoInfo {
        RepoInfo {
            host: "github.com".into(),
            owner: "acme".into(),
            repo: "widgets".into(),
            default_branch: "main".into(),
        }
    }

    fn test_with(score: f64, confidence: f64, recommendation: Recommendation) -> AnalyzedTest {
        AnalyzedTest {
            test_case_id: uuid::Uuid::new_v4(),
            name: "tests::flaky_case".into(),
            file: Some("src/lib.rs".into()),
            line: Some(42),
            score,
            confidence,
            fail_count: 6,
            recent_failures: 2,
            recommendation,
            priority: Priority::High,
        }
    }

    #[test]
    fn empty_input_yields_no_candidates_summary() {
        let report = render(&[], &repo());
        assert!(report.summary_markdown.contains("No flaky test candidates"));
        assert!(report.actions.is_empty());
    }

    #[test]
    fn file_and_line_known_renders_link() {
        let tests = vec![test_with(0.9, 0.9, Recommendation::Quarantine)];
        let report = render(&tests, &repo());
        assert!(report.summary_markdown.contains("https://github.com/acme/widgets/blob/main/src/lib.rs#L42"));
    }

    #[test]
    fn more_than_twenty_rows_shows_overflow_note() {
        let tests: Vec<AnalyzedTest> = (0..25).map(|_| test_with(0.6, 0.6, Recommendation::Warn)).collect();
        let report = render(&tests, &repo());
        assert!(report.summary_markdown.contains("Showing top 20 of 25 total candidates"));
    }

    #[test]
    fn quarantine_recommendation_adds_quarantine_action() {
        let tests = vec![test_with(0.9, 0.9, Recommendation::Quarantine)];
        let report = render(&tests, &repo());
        assert!(report.actions.iter().any(|a| a.kind == ActionKind::Quarantine));
    }

    #[test]
    fn persistent_threshold_is_three_not_five() {
        let tests = vec![
            AnalyzedTest {
                fail_count: 3,
                recent_failures: 1,
                ..test_with(0.9, 0.9, Recommendation::Quarantine)
            },
            AnalyzedTest {
                fail_count: 3,
                recent_failures: 1,
                ..test_with(0.9, 0.9, Recommendation::Quarantine)
            },
            AnalyzedTest {
                fail_count: 3,
                recent_failures: 1,
                ..test_with(0.6, 0.6, Recommendation::Warn)
            },
            AnalyzedTest {
                fail_count: 3,
                recent_failures: 1,
                ..test_with(0.6, 0.6, Recommendation::Warn)
            },
            AnalyzedTest {
                fail_count: 3,
                recent_failures: 0,
                ..test_with(0.6, 0.6, Recommendation::Warn)
            },
        ];

        let actions = build_actions(&tests);

        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].kind, ActionKind::Quarantine);
        assert_eq!(actions[0].label, "Quarantine 2 tests");
        assert_eq!(actions[1].kind, ActionKind::RerunFailed);
        assert_eq!(actions[1].label, "Re-run 4 failed runs");
        assert_eq!(actions[2].kind, ActionKind::OpenIssue);
        assert_eq!(actions[2].label, "Open 5 issues for persistent failures");
    }

    #[test]
    fn no_file_known_renders_backticks() {
        let mut t = test_with(0.9, 0.9, Recommendation::Quarantine);
        t.file = None;
        t.line = None;
        let report = render(&[t], &repo());
        assert!(report.summary_markdown.contains("`tests::flaky_case`"));
    }
}
