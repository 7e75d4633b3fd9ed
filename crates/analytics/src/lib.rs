//! Message normalization, flake scoring, cluster analysis and pattern
//! detection (design doc §4.5-§4.8).

pub mod cluster;
pub mod detection;
pub mod normalizer;
pub mod scorer;

pub use cluster::{time_cluster, signature_clusters, SignatureGroup, TimeCluster, TimeClusterAnalysis};
pub use detection::{combine, detect_patterns, environmental_factors, Detection, EnvironmentalFactors, PatternKind, PatternMatch};
pub use normalizer::{normalize_message, signature, stack_digest};
pub use scorer::{extract_features, score_test, Features, Priority, Recommendation, ScoredTest};
