//! Flake scoring (design doc §4.6): feature extraction, the composite
//! score, confidence, and the quarantine/warn recommendation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::config::ScoringConfig;
use shared::models::Occurrence;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    None,
    Warn,
    Quarantine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Extracted features feeding the composite score, persisted verbatim in
/// `flake_scores.features` for later inspection.
#[derive(Debug, Clone, Serialize)]
pub struct Features {
    pub fail_success_ratio: f64,
    pub rerun_pass_rate: f64,
    pub intermittency: f64,
    pub failure_clustering: f64,
    pub message_variance: f64,
    pub consecutive_failures: u32,
    pub max_consecutive_failures: u32,
    pub recent_failures: u32,
    pub days_since_first_seen: f64,
    pub avg_time_between_failures_hours: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredTest {
    pub score: f64,
    pub confidence: f64,
    pub features: Features,
    pub window_n: i64,
    pub recommendation: Recommendation,
    pub priority: Priority,
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// `occurrences` must be the window to score; order is not assumed, the
/// function sorts ascending by `created_at` internally.
pub fn extract_features(
    occurrences: &[Occurrence],
    first_seen: DateTime<Utc>,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> Features {
    let mut ordered: Vec<&Occurrence> = occurrences.iter().collect();
    ordered.sort_by_key(|o| o.created_at);

    let total = ordered.len() as f64;
    let failures = ordered.iter().filter(|o| o.status.is_failure()).count() as f64;
    let fail_success_ratio = if total > 0.0 { failures / total } else { 0.0 };

    let rerun_pass_rate = {
        let reruns: Vec<&&Occurrence> = ordered.iter().filter(|o| o.attempt > 1).collect();
        if reruns.is_empty() {
            0.0
        } else {
            let passed = reruns
                .iter()
                .filter(|o| o.status == shared::models::OccurrenceStatus::Passed)
                .count() as f64;
            passed / reruns.len() as f64
        }
    };

    let non_skipped: Vec<&&Occurrence> = ordered
        .iter()
        .filter(|o| o.status != shared::models::OccurrenceStatus::Skipped)
        .collect();
    let intermittency = if non_skipped.len() >= 2 {
        let mut transitions = 0u32;
        for pair in non_skipped.windows(2) {
            if pair[0].status.is_failure() != pair[1].status.is_failure() {
                transitions += 1;
            }
        }
        transitions as f64 / (non_skipped.len() - 1) as f64
    } else {
        0.0
    };

    let failure_times: Vec<DateTime<Utc>> = ordered
        .iter()
        .filter(|o| o.status.is_failure())
        .map(|o| o.created_at)
        .collect();
    let failure_clustering = time_scatter(&failure_times);

    let message_variance = {
        let failed_with_message: Vec<&str> = ordered
            .iter()
            .filter(|o| o.status.is_failure())
            .filter_map(|o| o.message_signature.as_deref())
            .collect();
        if failed_with_message.is_empty() {
            0.0
        } else {
            let unique: HashSet<&str> = failed_with_message.iter().copied().collect();
            unique.len() as f64 / failed_with_message.len() as f64
        }
    };

    let mut consecutive_failures = 0u32;
    for o in ordered.iter().rev() {
        if o.status.is_failure() {
            consecutive_failures += 1;
        } else if o.status != shared::models::OccurrenceStatus::Skipped {
            break;
        }
    }

    let mut max_consecutive_failures = 0u32;
    let mut run = 0u32;
    for o in ordered.iter() {
        if o.status.is_failure() {
            run += 1;
            max_consecutive_failures = max_consecutive_failures.max(run);
        } else if o.status != shared::models::OccurrenceStatus::Skipped {
            run = 0;
        }
    }

    let lookback_cutoff = now - chrono::Duration::days(lookback_days);
    let recent_failures = ordered
        .iter()
        .filter(|o| o.status.is_failure() && o.created_at >= lookback_cutoff)
        .count() as u32;

    let days_since_first_seen = (now - first_seen).num_seconds() as f64 / 86_400.0;

    let avg_time_between_failures_hours = if failure_times.len() >= 2 {
        let span_hours = (*failure_times.last().unwrap() - *failure_times.first().unwrap()).num_seconds() as f64 / 3600.0;
        span_hours / (failure_times.len() - 1) as f64
    } else {
        0.0
    };

    Features {
        fail_success_ratio,
        rerun_pass_rate,
        intermittency,
        failure_clustering,
        message_variance,
        consecutive_failures,
        max_consecutive_failures,
        recent_failures,
        days_since_first_seen,
        avg_time_between_failures_hours,
    }
}

/// Approximates how bunched (vs. evenly spread) a set of timestamps is,
/// via the coefficient of variation of the gaps between them, normalized
/// into `[0,1]`. A single failure or none has no gaps to measure, so it
/// is treated as perfectly unclustered.
fn time_scatter(times: &[DateTime<Utc>]) -> f64 {
    if times.len() < 2 {
        return 0.0;
    }
    let gaps: Vec<f64> = times.windows(2).map(|w| (w[1] - w[0]).num_seconds() as f64).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    let cv = variance.sqrt() / mean;
    finite_or_zero(cv / (cv + 1.0))
}

pub fn score_and_recommend(features: &Features, total: usize, config: &ScoringConfig) -> (f64, f64, Recommendation, Priority) {
    let total_f = total as f64;

    let mut score = 0.30 * features.intermittency
        + 0.25 * features.rerun_pass_rate
        + 0.15 * features.failure_clustering
        + 0.10 * features.message_variance
        + 0.10 * features.fail_success_ratio;
    score = finite_or_zero(score);

    if features.max_consecutive_failures as f64 >= 0.8 * total_f && total_f > 0.0 {
        score *= 1.0 - 0.10 * (features.max_consecutive_failures as f64 / total_f);
    }
    if features.rerun_pass_rate > 0.3 && features.intermittency > 0.4 {
        score *= 1.2;
    }
    if total_f > 0.0 && features.consecutive_failures as f64 >= (5.0_f64.min(0.6 * total_f)) {
        score *= 0.8;
    }

    score = finite_or_zero(score).clamp(0.0, 1.0);

    if total == 1 || features.fail_success_ratio == 0.0 || features.fail_success_ratio == 1.0 {
        score = 0.0;
    }

    let mut confidence = (total_f / 20.0).min(1.0);
    if features.days_since_first_seen > 7.0 {
        confidence *= 1.2;
    }
    if features.days_since_first_seen < 1.0 {
        confidence *= 0.5;
    }
    confidence = finite_or_zero(confidence).clamp(0.0, 1.0);

    let recommendation = if total < config.min_runs_for_quarantine || (features.recent_failures as usize) < config.min_recent_failures {
        Recommendation::None
    } else if score >= config.quarantine_threshold {
        Recommendation::Quarantine
    } else if score >= config.warn_threshold {
        Recommendation::Warn
    } else {
        Recommendation::None
    };

    let priority_signal = (score + features.rerun_pass_rate + features.intermittency) / 3.0;
    let priority = if priority_signal >= 0.8 {
        Priority::Critical
    } else if priority_signal >= 0.6 {
        Priority::High
    } else if priority_signal >= 0.4 {
        Priority::Medium
    } else {
        Priority::Low
    };

    (score, confidence, recommendation, priority)
}

pub fn score_test(
    occurrences: &[Occurrence],
    first_seen: DateTime<Utc>,
    now: DateTime<Utc>,
    config: &ScoringConfig,
) -> ScoredTest {
    let features = extract_features(occurrences, first_seen, now, config.lookback_days);
    let (score, confidence, recommendation, priority) = score_and_recommend(&features, occurrences.len(), config);
    ScoredTest {
        score,
        confidence,
        features,
        window_n: occurrences.len() as i64,
        recommendation,
        priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::OccurrenceStatus;
    use uuid::Uuid;

    fn occ(status: OccurrenceStatus, attempt: i32, minutes_ago: i64, signature: Option<&str>) -> Occurrence {
        Occurrence {
            id: Uuid::new_v4(),
            test_case_id: Uuid::new_v4(),
            workflow_run_id: Uuid::new_v4(),
            job_id: None,
            status,
            duration_ms: 100,
            attempt,
            message: None,
            stack: None,
            message_signature: signature.map(|s| s.to_string()),
            stack_digest: None,
            created_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn single_occurrence_scores_zero() {
        let occs = vec![occ(OccurrenceStatus::Failed, 1, 10, Some("sig"))];
        let config = ScoringConfig::default();
        let scored = score_test(&occs, Utc::now() - chrono::Duration::days(1), Utc::now(), &config);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn all_failing_scores_zero() {
        let occs: Vec<Occurrence> = (0..10).map(|i| occ(OccurrenceStatus::Failed, 1, i * 10, Some("sig"))).collect();
        let config = ScoringConfig::default();
        let scored = score_test(&occs, Utc::now() - chrono::Duration::days(10), Utc::now(), &config);
        assert_eq!(scored.score, 0.0);
    }

    #[test]
    fn intermittent_failures_score_above_zero() {
        let mut occs = Vec::new();
        for i in 0..20 {
            let status = if i % 3 == 0 { OccurrenceStatus::Failed } else { OccurrenceStatus::Passed };
            occs.push(occ(status, 1, (20 - i) * 60, Some("sig")));
        }
        let config = ScoringConfig::default();
        let scored = score_test(&occs, Utc::now() - chrono::Duration::days(30), Utc::now(), &config);
        assert!(scored.score > 0.0);
        assert!(scored.features.intermittency > 0.0);
    }

    #[test]
    fn recommendation_none_below_min_runs() {
        let occs = vec![occ(OccurrenceStatus::Failed, 1, 10, Some("sig")), occ(OccurrenceStatus::Passed, 1, 20, Some("sig"))];
        let config = ScoringConfig::default();
        let scored = score_test(&occs, Utc::now() - chrono::Duration::days(30), Utc::now(), &config);
        assert_eq!(scored.recommendation, Recommendation::None);
    }
}
