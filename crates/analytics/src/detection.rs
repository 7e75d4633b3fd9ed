//! Pattern and environmental heuristics, and the combination rules that
//! fold them together with the scorer and cluster analyzer (design doc §4.8).

use crate::cluster::TimeClusterAnalysis;
use crate::scorer::{Priority, Recommendation, ScoredTest};
use lazy_static::lazy_static;
use regex::RegexSet;
use serde::Serialize;
use shared::models::Occurrence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Timeout,
    ResourceContention,
    RaceCondition,
    ExternalDependency,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub confidence: f64,
}

lazy_static! {
    static ref TIMEOUT: RegexSet =
        RegexSet::new([r"(?i)timed? ?out", r"(?i)deadline exceeded", r"(?i)timeout"]).unwrap();
    static ref RESOURCE: RegexSet = RegexSet::new([
        r"(?i)out of memory",
        r"(?i)too many open files",
        r"(?i)resource temporarily unavailable",
        r"(?i)connection pool exhausted",
    ])
    .unwrap();
    static ref RACE: RegexSet = RegexSet::new([
        r"(?i)race condition",
        r"(?i)data race",
        r"(?i)concurrent modification",
        r"(?i)deadlock",
    ])
    .unwrap();
    static ref EXTERNAL: RegexSet = RegexSet::new([
        r"(?i)connection refused",
        r"(?i)could not resolve host",
        r"(?i)(503|502|504)\b",
        r"(?i)network is unreachable",
        r"(?i)upstream",
    ])
    .unwrap();
}

fn classify(messages: &[&str], set: &RegexSet) -> f64 {
    if messages.is_empty() {
        return 0.0;
    }
    let hits = messages.iter().filter(|m| set.is_match(m)).count();
    hits as f64 / messages.len() as f64
}

/// Lexical pattern classification over failed-occurrence messages. Only
/// patterns with confidence > 0.3 are considered present; among those,
/// the dominant is the max.
pub fn detect_patterns(failed_messages: &[&str]) -> Vec<PatternMatch> {
    let mut matches = vec![
        PatternMatch {
            kind: PatternKind::Timeout,
            confidence: classify(failed_messages, &TIMEOUT),
        },
        PatternMatch {
            kind: PatternKind::ResourceContention,
            confidence: classify(failed_messages, &RESOURCE),
        },
        PatternMatch {
            kind: PatternKind::RaceCondition,
            confidence: classify(failed_messages, &RACE),
        },
        PatternMatch {
            kind: PatternKind::ExternalDependency,
            confidence: classify(failed_messages, &EXTERNAL),
        },
    ];
    matches.retain(|m| m.confidence > 0.3);
    matches.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
    matches
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentalFactors {
    pub duration_variance_coefficient: f64,
    pub hour_of_day_concentration: f64,
    pub retry_success_rate: f64,
}

impl EnvironmentalFactors {
    /// Overall significance; > 0.3 enters the report (design doc §4.8).
    pub fn significance(&self) -> f64 {
        [
            self.duration_variance_coefficient,
            self.hour_of_day_concentration,
            self.retry_success_rate,
        ]
        .iter()
        .copied()
        .fold(0.0_f64, f64::max)
    }
}

/// Environmental signal extraction over a test's occurrence window.
pub fn environmental_factors(occurrences: &[Occurrence]) -> EnvironmentalFactors {
    let durations: Vec<f64> = occurrences.iter().map(|o| o.duration_ms as f64).collect();
    let duration_variance_coefficient = coefficient_of_variation(&durations);

    let mut hour_counts = [0u32; 24];
    let failed: Vec<&Occurrence> = occurrences.iter().filter(|o| o.status.is_failure()).collect();
    for o in &failed {
        let hour = chrono::Timelike::hour(&o.created_at) as usize;
        hour_counts[hour] += 1;
    }
    let hour_of_day_concentration = if failed.is_empty() {
        0.0
    } else {
        *hour_counts.iter().max().unwrap() as f64 / failed.len() as f64
    };

    let reruns: Vec<&Occurrence> = occurrences.iter().filter(|o| o.attempt > 1).collect();
    let retry_success_rate = if reruns.is_empty() {
        0.0
    } else {
        let passed = reruns.iter().filter(|o| !o.status.is_failure()).count() as f64;
        passed / reruns.len() as f64
    };

    EnvironmentalFactors {
        duration_variance_coefficient,
        hour_of_day_concentration,
        retry_success_rate,
    }
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    let cv = variance.sqrt() / mean;
    if cv.is_finite() {
        cv.min(1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub overall_confidence: f64,
    pub patterns: Vec<PatternMatch>,
    pub environmental: EnvironmentalFactors,
    pub recommendation: Recommendation,
    pub priority: Priority,
}

/// Folds the scorer, cluster analyzer and the two heuristics together
/// (design doc §4.8 combination rules).
pub fn combine(
    scored: &ScoredTest,
    cluster_analysis: &TimeClusterAnalysis,
    patterns: Vec<PatternMatch>,
    environmental: EnvironmentalFactors,
) -> Detection {
    let dominant_pattern_confidence = patterns.first().map(|p| p.confidence).unwrap_or(0.0);

    let mut overall_confidence = 0.5 * scored.confidence
        + 0.3 * (cluster_analysis.burstiness + cluster_analysis.periodicity).min(1.0)
        + 0.2 * dominant_pattern_confidence;

    let scorer_flags_flaky = scored.score >= 0.5;
    let cluster_flags_flaky = (cluster_analysis.burstiness + cluster_analysis.periodicity) / 2.0 >= 0.5;
    let pattern_flags_flaky = dominant_pattern_confidence >= 0.5;
    let agreeing = [scorer_flags_flaky, cluster_flags_flaky, pattern_flags_flaky]
        .iter()
        .filter(|b| **b)
        .count();
    if agreeing >= 2 {
        overall_confidence *= 1.2;
    }
    overall_confidence = overall_confidence.clamp(0.0, 1.0);

    let mut recommendation = scored.recommendation;
    if dominant_pattern_confidence > 0.7 && recommendation == Recommendation::Warn {
        recommendation = Recommendation::Quarantine;
    }

    let mut priority = scored.priority;
    if environmental.significance() > 0.6 {
        priority = bump_priority(priority);
    }

    Detection {
        overall_confidence,
        patterns,
        environmental,
        recommendation,
        priority,
    }
}

fn bump_priority(p: Priority) -> Priority {
    match p {
        Priority::Low => Priority::Medium,
        Priority::Medium => Priority::High,
        Priority::High => Priority::Critical,
        Priority::Critical => Priority::Critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_messages_classify_as_timeout() {
        let messages = ["connection timed out after 30s", "operation timeout", "passed"];
        let matches = detect_patterns(&messages);
        assert!(matches.iter().any(|m| m.kind == PatternKind::Timeout));
    }

    #[test]
    fn low_hit_rate_is_excluded() {
        let messages = ["timeout", "unrelated failure", "another unrelated failure", "yet another"];
        let matches = detect_patterns(&messages);
        assert!(matches.iter().all(|m| m.confidence > 0.3));
    }

    #[test]
    fn dominant_pattern_promotes_warn_to_quarantine() {
        let scored = ScoredTest {
            score: 0.5,
            confidence: 0.8,
            features: crate::scorer::Features {
                fail_success_ratio: 0.5,
                rerun_pass_rate: 0.5,
                intermittency: 0.5,
                failure_clustering: 0.1,
                message_variance: 0.1,
                consecutive_failures: 0,
                max_consecutive_failures: 1,
                recent_failures: 3,
                days_since_first_seen: 10.0,
                avg_time_between_failures_hours: 2.0,
            },
            window_n: 20,
            recommendation: Recommendation::Warn,
            priority: Priority::Medium,
        };
        let cluster_analysis = TimeClusterAnalysis {
            clusters: vec![],
            burstiness: 0.1,
            periodicity: 0.1,
        };
        let patterns = vec![PatternMatch {
            kind: PatternKind::Timeout,
            confidence: 0.9,
        }];
        let environmental = EnvironmentalFactors {
            duration_variance_coefficient: 0.1,
            hour_of_day_concentration: 0.1,
            retry_success_rate: 0.1,
        };
        let detection = combine(&scored, &cluster_analysis, patterns, environmental);
        assert_eq!(detection.recommendation, Recommendation::Quarantine);
    }
}
