//! Parsed JUnit-family report shapes (design doc §4.3).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseStatus {
    Passed,
    Failed,
    Errored,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureDetail {
    pub r#type: Option<String>,
    pub message: Option<String>,
    pub stack: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkippedDetail {
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCase {
    pub suite: String,
    pub class_name: String,
    pub name: String,
    pub time_seconds: Option<f64>,
    pub status: CaseStatus,
    pub failure: Option<FailureDetail>,
    pub error: Option<FailureDetail>,
    pub skipped: Option<SkippedDetail>,
    pub system_out: Option<String>,
    pub system_err: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSuite {
    pub name: String,
    pub package: Option<String>,
    pub hostname: Option<String>,
    pub timestamp: Option<String>,
    pub properties: Vec<(String, String)>,
    pub system_out: Option<String>,
    pub system_err: Option<String>,
    pub cases: Vec<ParsedCase>,
}

/// Per design doc §4.3: status precedence within a case is
/// `error > failure > skipped > passed`.
pub fn case_status(has_error: bool, has_failure: bool, has_skipped: bool) -> CaseStatus {
    if has_error {
        CaseStatus::Errored
    } else if has_failure {
        CaseStatus::Failed
    } else if has_skipped {
        CaseStatus::Skipped
    } else {
        CaseStatus::Passed
    }
}
