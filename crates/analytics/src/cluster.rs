//! Cluster analysis (design doc §4.7): time clustering of one test's
//! failures, and signature clustering across a repository's test cases.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::models::Occurrence;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct TimeCluster {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub failure_count: usize,
    pub density: f64,
    pub avg_gap_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeClusterAnalysis {
    pub clusters: Vec<TimeCluster>,
    pub burstiness: f64,
    pub periodicity: f64,
}

/// Groups ascending failure timestamps into clusters, merging any gap no
/// larger than `threshold` into the prior cluster.
pub fn time_cluster(mut failure_times: Vec<DateTime<Utc>>, threshold: chrono::Duration) -> TimeClusterAnalysis {
    failure_times.sort();

    let mut clusters: Vec<Vec<DateTime<Utc>>> = Vec::new();
    for t in failure_times {
        match clusters.last_mut() {
            Some(current) if t - *current.last().unwrap() <= threshold => current.push(t),
            _ => clusters.push(vec![t]),
        }
    }

    let time_clusters: Vec<TimeCluster> = clusters
        .iter()
        .map(|members| {
            let start = *members.first().unwrap();
            let end = *members.last().unwrap();
            let duration_minutes = (end - start).num_seconds() as f64 / 60.0;
            let density = members.len() as f64 / duration_minutes.max(1.0);
            let avg_gap_seconds = if members.len() >= 2 {
                (end - start).num_seconds() as f64 / (members.len() - 1) as f64
            } else {
                0.0
            };
            TimeCluster {
                start,
                end,
                failure_count: members.len(),
                density,
                avg_gap_seconds,
            }
        })
        .collect();

    let burstiness = normalized_variance(&time_clusters.iter().map(|c| c.density).collect::<Vec<_>>());
    let periodicity = autocorrelation_lag1(&time_clusters.iter().map(|c| c.avg_gap_seconds).collect::<Vec<_>>());

    TimeClusterAnalysis {
        clusters: time_clusters,
        burstiness,
        periodicity,
    }
}

/// Normalized variance (coefficient of variation squashed into `[0,1]`).
/// A single cluster has no variance to speak of; treated as 0, not NaN.
fn normalized_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let cv = variance.sqrt() / mean;
    let v = cv / (cv + 1.0);
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Lag-1 autocorrelation of the inter-cluster gap sequence, a stand-in for
/// "periodicity": high when gaps repeat at a near-constant interval.
fn autocorrelation_lag1(values: &[f64]) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let denom: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    if denom <= 0.0 {
        return 0.0;
    }
    let numer: f64 = values.windows(2).map(|w| (w[0] - mean) * (w[1] - mean)).sum();
    let r = numer / denom;
    if r.is_finite() {
        r.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// A group of failures sharing a normalized message signature, keyed by
/// `(repository_id, message_signature)`; only materialized when the
/// signature spans more than one occurrence (design doc §4.7).
#[derive(Debug, Clone)]
pub struct SignatureGroup {
    pub message_signature: String,
    pub stack_digest: Option<String>,
    pub example_message: String,
    pub example_stack: Option<String>,
    pub test_case_ids: Vec<uuid::Uuid>,
    pub occurrence_count: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Groups failed occurrences by `message_signature`, returning only
/// signatures observed more than once.
pub fn signature_clusters(occurrences: &[Occurrence], messages: &HashMap<uuid::Uuid, (String, Option<String>)>) -> Vec<SignatureGroup> {
    let mut groups: HashMap<String, SignatureGroup> = HashMap::new();

    for occ in occurrences.iter().filter(|o| o.status.is_failure()) {
        let Some(sig) = occ.message_signature.as_deref() else {
            continue;
        };
        let (example_message, example_stack) = messages
            .get(&occ.id)
            .cloned()
            .unwrap_or_else(|| (String::new(), None));

        let entry = groups.entry(sig.to_string()).or_insert_with(|| SignatureGroup {
            message_signature: sig.to_string(),
            stack_digest: occ.stack_digest.clone(),
            example_message: example_message.clone(),
            example_stack: example_stack.clone(),
            test_case_ids: Vec::new(),
            occurrence_count: 0,
            window_start: occ.created_at,
            window_end: occ.created_at,
        });

        if !entry.test_case_ids.contains(&occ.test_case_id) {
            entry.test_case_ids.push(occ.test_case_id);
        }
        entry.occurrence_count += 1;
        entry.window_start = entry.window_start.min(occ.created_at);
        entry.window_end = entry.window_end.max(occ.created_at);
    }

    groups
        .into_values()
        .filter(|g| g.occurrence_count > 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_has_no_burstiness() {
        let times = vec![Utc::now()];
        let analysis = time_cluster(times, chrono::Duration::hours(2));
        assert_eq!(analysis.clusters.len(), 1);
        assert_eq!(analysis.burstiness, 0.0);
    }

    #[test]
    fn nearby_failures_merge_into_one_cluster() {
        let base = Utc::now();
        let times = vec![base, base + chrono::Duration::minutes(30), base + chrono::Duration::minutes(90)];
        let analysis = time_cluster(times, chrono::Duration::hours(2));
        assert_eq!(analysis.clusters.len(), 1);
        assert_eq!(analysis.clusters[0].failure_count, 3);
    }

    #[test]
    fn distant_failures_form_separate_clusters() {
        let base = Utc::now();
        let times = vec![base, base + chrono::Duration::hours(5)];
        let analysis = time_cluster(times, chrono::Duration::hours(2));
        assert_eq!(analysis.clusters.len(), 2);
    }

    #[test]
    fn signature_seen_once_is_not_materialized() {
        let occ = Occurrence {
            id: uuid::Uuid::new_v4(),
            test_case_id: uuid::Uuid::new_v4(),
            workflow_run_id: uuid::Uuid::new_v4(),
            job_id: None,
            status: shared::models::OccurrenceStatus::Failed,
            duration_ms: 1,
            attempt: 1,
            message: None,
            stack: None,
            message_signature: Some("sig".into()),
            stack_digest: None,
            created_at: Utc::now(),
        };
        let groups = signature_clusters(&[occ], &HashMap::new());
        assert!(groups.is_empty());
    }
}
