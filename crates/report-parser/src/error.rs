//! Error taxonomy for C3 (design doc §7).

use shared::error::ErrorKind;
use thiserror::Error;

pub type ParseResult<T> = std::result::Result<T, ReportParserError>;

#[derive(Debug, Error)]
pub enum ReportParserError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed XML attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("report read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ReportParserError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseError
    }

    /// Per design doc §4.11: parser errors retry once, then go to the dead
    /// queue. The orchestrator enforces the retry count; this type just
    /// marks the class.
    pub fn is_retryable(&self) -> bool {
        true
    }
}
