//! Action outcomes (design doc §4.10): every action reports honestly on
//! its sub-steps rather than collapsing a partial success into a binary
//! pass/fail.

#[derive(Debug, Clone)]
pub struct SubStep {
    pub name: &'static str,
    pub ok: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: &'static str,
    pub success: bool,
    pub summary: String,
    pub sub_steps: Vec<SubStep>,
}

impl ActionOutcome {
    pub fn from_sub_steps(action: &'static str, sub_steps: Vec<SubStep>) -> Self {
        let total = sub_steps.len();
        let succeeded = sub_steps.iter().filter(|s| s.ok).count();
        let success = succeeded == total;
        let summary = if total <= 1 {
            if success {
                "succeeded".to_string()
            } else {
                "failed".to_string()
            }
        } else {
            format!("{succeeded}/{total} sub-steps succeeded")
        };
        Self {
            action,
            success,
            summary,
            sub_steps,
        }
    }

    pub fn noop(action: &'static str, reason: impl Into<String>) -> Self {
        Self {
            action,
            success: true,
            summary: reason.into(),
            sub_steps: Vec::new(),
        }
    }
}
