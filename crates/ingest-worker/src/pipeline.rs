//! The two durable pipeline stages (design doc §4.11): `ingest` turns one
//! workflow run's artifacts into stored occurrences, `analyze` turns stored
//! occurrences into scores, clusters, detections and a rendered check run.

use crate::error::{OrchError, OrchResult};
use analytics::{combine, detect_patterns, environmental_factors, score_test, signature_clusters, time_cluster};
use artifact_reader::{ensure_available, read_entries, ArtifactReaderError, SizeCaps};
use chrono::Utc;
use host_client::{ArtifactMeta, CheckRunAction, CheckRunOutput, HostClient, RepoRef};
use renderer::{render, AnalyzedTest, RepoInfo};
use report_parser::{parse_junit_xml, CaseStatus, ParserConfig};
use shared::config::ScoringConfig;
use shared::db::DbPool;
use shared::jobs::{AnalyzePayload, IngestPayload};
use shared::models::OccurrenceStatus;
use std::collections::HashMap;
use std::io::Cursor;
use store::{
    ClusterStore, NewOccurrence, NewTestCase, OccurrenceStore, RepositoryStore, ScoreStore, TestCaseStore,
    WorkflowRunStore,
};

fn map_status(status: &CaseStatus) -> OccurrenceStatus {
    match status {
        CaseStatus::Passed => OccurrenceStatus::Passed,
        CaseStatus::Failed => OccurrenceStatus::Failed,
        CaseStatus::Errored => OccurrenceStatus::Error,
        CaseStatus::Skipped => OccurrenceStatus::Skipped,
    }
}

/// Outcome of one `ingest` job, enough for the caller to write an audit
/// row and enqueue the follow-on `analyze` job. `warnings` counts
/// artifacts/entries that were skipped (too large, expired, or
/// unparseable) rather than aborting the whole run.
pub struct IngestOutcome {
    pub workflow_run_id: uuid::Uuid,
    pub occurrences_inserted: i64,
    pub warnings: i32,
}

/// Walks one downloaded artifact archive's entries, appending every case it
/// finds to `new_cases`/`case_occurrences` and returning the count of
/// entries (or the whole archive) it had to skip. A too-large or malformed
/// archive abandons its own remaining entries but never touches what's
/// already been collected from earlier artifacts, so a sibling artifact's
/// cases survive. Only I/O failures, which are a job-level retry signal
/// rather than a property of this particular archive, propagate out.
fn ingest_artifact_archive(
    bytes: &[u8],
    artifact_id: &str,
    workflow_run_id: uuid::Uuid,
    attempt: i32,
    new_cases: &mut Vec<NewTestCase>,
    case_occurrences: &mut Vec<(String, NewOccurrence)>,
) -> OrchResult<i32> {
    let mut warnings = 0;

    for entry in read_entries(Cursor::new(bytes.to_vec()), SizeCaps::default()) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(ArtifactReaderError::Io(e)) => return Err(ArtifactReaderError::Io(e).into()),
            Err(e) => {
                // Too-large or malformed archives are terminal for this
                // artifact, not the whole run: the rest of this archive's
                // entries are abandoned, but sibling artifacts still get a
                // chance.
                tracing::warn!(artifact_id = %artifact_id, error = %e, "artifact archive rejected, skipping");
                warnings += 1;
                break;
            }
        };

        let suites = match parse_junit_xml(Cursor::new(entry.data.as_slice()), &ParserConfig::default()) {
            Ok(suites) => suites,
            Err(e) => {
                tracing::warn!(artifact_id = %artifact_id, entry = %entry.path, error = %e, "unparseable report, skipping entry");
                warnings += 1;
                continue;
            }
        };

        for suite in suites {
            for case in suite.cases {
                let key = format!("{}\u{1}{}\u{1}{}", suite.name, case.class_name, case.name);
                new_cases.push(NewTestCase {
                    suite: suite.name.clone(),
                    class_name: case.class_name.clone(),
                    name: case.name.clone(),
                    file: None,
                });

                let detail = case.error.as_ref().or(case.failure.as_ref());
                let raw_message = detail.and_then(|d| d.message.clone());
                let raw_stack = detail.and_then(|d| d.stack.clone());
                let (message_signature, stack_digest) = match &raw_message {
                    Some(m) => {
                        let canonical = analytics::normalize_message(m);
                        (Some(analytics::signature(&canonical)), raw_stack.as_deref().map(analytics::stack_digest))
                    }
                    None => (None, None),
                };

                case_occurrences.push((
                    key,
                    NewOccurrence {
                        test_case_id: uuid::Uuid::nil(),
                        workflow_run_id,
                        job_id: None,
                        status: map_status(&case.status),
                        duration_ms: (case.time_seconds.unwrap_or(0.0) * 1000.0) as i64,
                        attempt,
                        message: raw_message,
                        stack: raw_stack,
                        message_signature,
                        stack_digest,
                    },
                ));
            }
        }
    }

    Ok(warnings)
}

/// Runs the `ingest` stage for one `(repo, workflow_run_id)`: downloads
/// artifacts, parses JUnit-family reports, and persists test cases and
/// occurrences.
pub async fn run_ingest(pool: &DbPool, host: &dyn HostClient, payload: &IngestPayload) -> OrchResult<IngestOutcome> {
    let repo_row = RepositoryStore::find_by_id(pool, payload.repository_id)
        .await?
        .ok_or_else(|| OrchError::RunNotFound {
            repository_id: payload.repository_id,
            external_run_id: payload.external_run_id.clone(),
        })?;
    let repo_ref = RepoRef {
        owner: repo_row.owner.clone(),
        name: repo_row.name.clone(),
    };

    let runs = host
        .list_workflow_runs(&repo_ref, &payload.installation_ref, None, None)
        .await?;
    let summary = runs
        .runs
        .into_iter()
        .find(|r| r.external_run_id == payload.external_run_id)
        .ok_or_else(|| OrchError::RunNotFound {
            repository_id: payload.repository_id,
            external_run_id: payload.external_run_id.clone(),
        })?;

    let workflow_run = WorkflowRunStore::upsert(
        pool,
        payload.repository_id,
        &summary.external_run_id,
        &summary.status,
        summary.conclusion.as_deref(),
        &summary.head_sha,
        &summary.head_branch,
        summary.run_number,
        summary.attempt,
    )
    .await?;

    let artifacts: Vec<ArtifactMeta> = host
        .list_artifacts(&repo_ref, &payload.installation_ref, &payload.external_run_id)
        .await?;

    let mut new_cases: Vec<NewTestCase> = Vec::new();
    let mut case_occurrences: Vec<(String, NewOccurrence)> = Vec::new();
    let mut warnings: i32 = 0;

    for artifact in &artifacts {
        if let Err(e) = ensure_available(artifact.expired) {
            tracing::warn!(artifact_id = %artifact.id, error = %e, "artifact unavailable, skipping");
            warnings += 1;
            continue;
        }
        let response = host.download_artifact(&payload.installation_ref, artifact).await?;
        let bytes = response.bytes().await.map_err(host_client::error::HostClientError::Transport)?;

        warnings += ingest_artifact_archive(
            &bytes,
            &artifact.id,
            workflow_run.id,
            workflow_run.attempt,
            &mut new_cases,
            &mut case_occurrences,
        )?;
    }

    if new_cases.is_empty() {
        return Ok(IngestOutcome {
            workflow_run_id: workflow_run.id,
            occurrences_inserted: 0,
            warnings,
        });
    }

    new_cases.sort_by(|a, b| (&a.suite, &a.class_name, &a.name).cmp(&(&b.suite, &b.class_name, &b.name)));
    new_cases.dedup_by(|a, b| a.suite == b.suite && a.class_name == b.class_name && a.name == b.name);

    let stored_cases = TestCaseStore::upsert_batch(pool, payload.repository_id, &new_cases).await?;
    let mut id_by_key: HashMap<String, uuid::Uuid> = HashMap::new();
    for case in &stored_cases {
        let key = format!("{}\u{1}{}\u{1}{}", case.suite, case.class_name, case.name);
        id_by_key.insert(key, case.id);
    }

    let occurrences: Vec<NewOccurrence> = case_occurrences
        .into_iter()
        .filter_map(|(key, mut occ)| {
            let id = id_by_key.get(&key)?;
            occ.test_case_id = *id;
            Some(occ)
        })
        .collect();

    let inserted = OccurrenceStore::insert_batch(pool, &occurrences).await?;
    Ok(IngestOutcome {
        workflow_run_id: workflow_run.id,
        occurrences_inserted: inserted.len() as i64,
        warnings,
    })
}

/// Runs the `analyze` stage: recomputes scores, cluster features and
/// pattern detection for either one test case or every test case in the
/// repository, then rebuilds and posts the check run.
pub async fn run_analyze(
    pool: &DbPool,
    host: &dyn HostClient,
    payload: &AnalyzePayload,
    config: &ScoringConfig,
) -> OrchResult<()> {
    let now = Utc::now();
    let since = now - chrono::Duration::days(config.lookback_days);

    let test_cases = match payload.test_case_id {
        Some(id) => TestCaseStore::find_by_id(pool, id)
            .await?
            .into_iter()
            .collect::<Vec<_>>(),
        None => TestCaseStore::for_repository(pool, payload.repository_id).await?,
    };
    if test_cases.is_empty() {
        return Ok(());
    }

    let failures = OccurrenceStore::failed_occurrences_for_repo(pool, payload.repository_id, since).await?;
    let failure_times: Vec<_> = failures.iter().map(|o| o.created_at).collect();
    let cluster_analysis = time_cluster(failure_times, chrono::Duration::minutes(config.cluster_threshold_minutes));

    let messages: HashMap<uuid::Uuid, (String, Option<String>)> = failures
        .iter()
        .filter_map(|o| {
            let sig = o.message_signature.clone()?;
            Some((o.test_case_id, (sig, o.stack_digest.clone())))
        })
        .collect();
    for group in signature_clusters(&failures, &messages) {
        let ids: Vec<uuid::Uuid> = group.test_case_ids.into_iter().collect();
        if ids.is_empty() {
            continue;
        }
        let window_start = group.window_start;
        let window_end = group.window_end;
        ClusterStore::upsert(
            pool,
            payload.repository_id,
            &group.message_signature,
            group.stack_digest.as_deref(),
            &group.example_message,
            group.example_stack.as_deref(),
            &ids,
            group.occurrence_count,
            window_start,
            window_end,
        )
        .await?;
    }

    let mut analyzed = Vec::with_capacity(test_cases.len());
    for test_case in &test_cases {
        let occurrences = OccurrenceStore::recent_runs_for_test(pool, test_case.id, config.window_size as i64).await?;
        if occurrences.is_empty() {
            continue;
        }
        let first_seen = occurrences.iter().map(|o| o.created_at).min().unwrap_or(now);
        let scored = score_test(&occurrences, first_seen, now, config);

        let failed_messages: Vec<&str> = occurrences
            .iter()
            .filter(|o| o.status.is_failure())
            .filter_map(|o| o.message.as_deref())
            .collect();
        let patterns = detect_patterns(&failed_messages);
        let environmental = environmental_factors(&occurrences);
        let detection = combine(&scored, &cluster_analysis, patterns, environmental);

        let features_json = serde_json::to_value(&scored.features).unwrap_or(serde_json::Value::Null);
        ScoreStore::upsert(pool, test_case.id, scored.score, detection.overall_confidence, features_json, scored.window_n).await?;

        let recent_failures = occurrences.iter().filter(|o| o.status.is_failure()).count() as u32;
        analyzed.push(AnalyzedTest {
            test_case_id: test_case.id,
            name: format!("{}.{}", test_case.class_name, test_case.name),
            file: test_case.file.clone(),
            line: None,
            score: scored.score,
            confidence: detection.overall_confidence,
            fail_count: recent_failures,
            recent_failures,
            recommendation: detection.recommendation,
            priority: detection.priority,
        });
    }

    if analyzed.is_empty() {
        return Ok(());
    }

    let repo_row = RepositoryStore::find_by_id(pool, payload.repository_id)
        .await?
        .ok_or_else(|| OrchError::RunNotFound {
            repository_id: payload.repository_id,
            external_run_id: payload.workflow_run_id.map(|u| u.to_string()).unwrap_or_default(),
        })?;

    // No specific run to annotate (e.g. a single-test recompute): scores
    // and clusters are still persisted above, but there is nothing to post
    // a check run against.
    let Some(workflow_run_id) = payload.workflow_run_id else {
        return Ok(());
    };
    let workflow_run = WorkflowRunStore::find_by_id(pool, workflow_run_id).await?;
    let Some(workflow_run) = workflow_run else {
        return Ok(());
    };

    let repo_info = RepoInfo {
        host: "github".to_string(),
        owner: repo_row.owner.clone(),
        repo: repo_row.name.clone(),
        default_branch: repo_row.default_branch.clone(),
    };
    let report = render(&analyzed, &repo_info);

    let repo_ref = RepoRef {
        owner: repo_row.owner,
        name: repo_row.name,
    };
    let actions: Vec<CheckRunAction> = report
        .actions
        .iter()
        .map(|a| CheckRunAction {
            label: a.label.clone(),
            description: a.label.clone(),
            identifier: format!("{:?}", a.kind).to_lowercase(),
        })
        .collect();
    let output = CheckRunOutput {
        title: report.title,
        summary_markdown: report.summary_markdown,
        text: None,
    };

    host.create_check_run(&repo_ref, &repo_row.installation_ref, &workflow_run.head_sha, &output, &actions)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = std::io::Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                std::io::Write::write_all(&mut writer, data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    const PASSING_SUITE: &[u8] = br#"<testsuite name="pkg.SuiteA" tests="1">
        <testcase classname="pkg.SuiteA" name="ok" time="0.1"/>
    </testsuite>"#;

    #[test]
    fn per_entry_cap_still_rejects_an_oversized_archive() {
        // ingest_artifact_archive hardcodes the real default caps, which
        // are too large to exercise affordably in a unit test. This checks
        // the cap enforcement itself, on the same read_entries path
        // ingest_artifact_archive calls, with caps small enough to trigger.
        let oversized = build_zip(&[("TEST-Huge.xml", &[0u8; 4096])]);
        let caps = SizeCaps {
            per_entry_bytes: 16,
            per_archive_bytes: 1_000_000,
        };
        let result: Result<Vec<_>, _> = read_entries(Cursor::new(oversized), caps).collect();
        assert!(matches!(result, Err(ArtifactReaderError::TooLarge(_))));
    }

    #[test]
    fn sibling_artifact_is_ingested_after_a_rejected_one() {
        let mut new_cases = Vec::new();
        let mut case_occurrences = Vec::new();
        let mut total_warnings = 0;

        // Not oversized but hits the same rejection path inside
        // ingest_artifact_archive as an oversized archive would: both are
        // terminal for this artifact only, never the whole run.
        let junk = vec![0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4];
        total_warnings += ingest_artifact_archive(
            &junk,
            "artifact-bad",
            uuid::Uuid::nil(),
            1,
            &mut new_cases,
            &mut case_occurrences,
        )
        .unwrap();

        let good = build_zip(&[("TEST-Good.xml", PASSING_SUITE)]);
        total_warnings += ingest_artifact_archive(
            &good,
            "artifact-good",
            uuid::Uuid::nil(),
            1,
            &mut new_cases,
            &mut case_occurrences,
        )
        .unwrap();

        assert_eq!(total_warnings, 1);
        assert_eq!(new_cases.len(), 1);
        assert_eq!(new_cases[0].name, "ok");
        assert_eq!(case_occurrences.len(), 1);
    }

    #[test]
    fn unparseable_entry_is_skipped_but_siblings_in_same_archive_still_parse() {
        let archive = build_zip(&[("TEST-Bad.xml", b"<testsuite name=\"Unterminated\""), ("TEST-Good.xml", PASSING_SUITE)]);

        let mut new_cases = Vec::new();
        let mut case_occurrences = Vec::new();
        let warnings = ingest_artifact_archive(&archive, "artifact-mixed", uuid::Uuid::nil(), 1, &mut new_cases, &mut case_occurrences).unwrap();

        assert_eq!(warnings, 1);
        assert_eq!(new_cases.len(), 1);
        assert_eq!(new_cases[0].name, "ok");
    }
}
