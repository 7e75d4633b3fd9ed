//! Common DTOs shared across handlers

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Standard error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
        }
    }

    #[allow(dead_code)]
    pub fn with_details(
        error: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_new_omits_details() {
        let err = ErrorResponse::new("not_found", "Resource not found");
        assert_eq!(err.error, "not_found");
        assert_eq!(err.message, "Resource not found");
        assert!(err.details.is_none());
    }

    #[test]
    fn error_response_with_details_serializes_details() {
        let details = serde_json::json!({"field": "email", "reason": "invalid format"});
        let err = ErrorResponse::with_details("validation_error", "Validation failed", details);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("details"));
        assert!(json.contains("email"));
    }

    #[test]
    fn error_response_serialization_omits_none_details() {
        let err = ErrorResponse::new("unauthorized", "Missing token");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("unauthorized"));
        assert!(!json.contains("details"));
    }
}
