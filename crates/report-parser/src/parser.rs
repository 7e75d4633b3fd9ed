//! Streaming JUnit-family XML parser (design doc §4.3).

use crate::error::ParseResult;
use crate::types::{case_status, FailureDetail, ParsedCase, ParsedSuite, SkippedDetail};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::io::BufRead;

const TRUNCATION_SENTINEL: &str = "...[truncated]";

#[derive(Debug, Clone, Copy)]
pub struct ParserConfig {
    pub max_text_bytes: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_text_bytes: 64 * 1024,
        }
    }
}

#[derive(Default)]
struct TextCapture {
    buf: String,
    truncated: bool,
}

impl TextCapture {
    fn push(&mut self, text: &str, cap: usize) {
        if self.truncated {
            return;
        }
        let remaining = cap.saturating_sub(self.buf.len());
        if text.len() <= remaining {
            self.buf.push_str(text);
        } else {
            self.buf.push_str(&text[..remaining]);
            self.buf.push_str(TRUNCATION_SENTINEL);
            self.truncated = true;
        }
    }

    fn finish(self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf)
        }
    }
}

#[derive(Default)]
struct CaseBuilder {
    class_name: String,
    name: String,
    time_seconds: Option<f64>,
    failure: Option<FailureDetail>,
    error: Option<FailureDetail>,
    skipped: Option<SkippedDetail>,
    system_out: TextCapture,
    system_err: TextCapture,
}

#[derive(Default)]
struct SuiteBuilder {
    name: String,
    package: Option<String>,
    hostname: Option<String>,
    timestamp: Option<String>,
    properties: Vec<(String, String)>,
    system_out: TextCapture,
    system_err: TextCapture,
    cases: Vec<ParsedCase>,
    declared_tests: Option<i64>,
    declared_failures: Option<i64>,
    declared_errors: Option<i64>,
    declared_skipped: Option<i64>,
}

enum TextTarget {
    None,
    SuiteSystemOut,
    SuiteSystemErr,
    CaseSystemOut,
    CaseSystemErr,
    FailureMessage,
    ErrorMessage,
    SkippedMessage,
}

/// Parses a byte stream containing either a bare `<testsuite>` or a
/// `<testsuites>` wrapping multiple `<testsuite>` children. Multiple root
/// suites are concatenated into the returned vec.
pub fn parse_junit_xml<R: BufRead>(source: R, config: &ParserConfig) -> ParseResult<Vec<ParsedSuite>> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::new();
    let mut suites = Vec::new();
    let mut suite: Option<SuiteBuilder> = None;
    let mut case: Option<CaseBuilder> = None;
    let mut text_target = TextTarget::None;
    let mut pending_failure_type: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let local = String::from_utf8_lossy(name.as_ref()).into_owned();
                match local.as_str() {
                    "testsuite" => {
                        let mut builder = SuiteBuilder::default();
                        for attr in e.attributes() {
                            let attr = attr?;
                            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                            let value = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
                            match key.as_str() {
                                "name" => builder.name = value,
                                "package" => builder.package = Some(value),
                                "hostname" => builder.hostname = Some(value),
                                "timestamp" => builder.timestamp = Some(value),
                                "tests" => builder.declared_tests = value.parse().ok(),
                                "failures" => builder.declared_failures = value.parse().ok(),
                                "errors" => builder.declared_errors = value.parse().ok(),
                                "skipped" => builder.declared_skipped = value.parse().ok(),
                                _ => {}
                            }
                        }
                        suite = Some(builder);
                    }
                    "testcase" => {
                        let mut builder = CaseBuilder::default();
                        for attr in e.attributes() {
                            let attr = attr?;
                            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                            let value = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
                            match key.as_str() {
                                "classname" => builder.class_name = value,
                                "name" => builder.name = value,
                                "time" => builder.time_seconds = value.parse().ok(),
                                _ => {}
                            }
                        }
                        case = Some(builder);
                    }
                    "failure" | "error" => {
                        let mut type_ = None;
                        let mut message = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                            let value = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
                            match key.as_str() {
                                "type" => type_ = Some(value),
                                "message" => message = Some(value),
                                _ => {}
                            }
                        }
                        pending_failure_type = type_;
                        let detail = FailureDetail {
                            r#type: pending_failure_type.clone(),
                            message,
                            stack: None,
                        };
                        if let Some(case) = case.as_mut() {
                            if local == "failure" {
                                case.failure = Some(detail);
                            } else {
                                case.error = Some(detail);
                            }
                        }
                        text_target = if local == "failure" {
                            TextTarget::FailureMessage
                        } else {
                            TextTarget::ErrorMessage
                        };
                    }
                    "skipped" => {
                        let mut message = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                            if key == "message" {
                                message = Some(attr.decode_and_unescape_value(reader.decoder())?.into_owned());
                            }
                        }
                        if let Some(case) = case.as_mut() {
                            case.skipped = Some(SkippedDetail { message });
                        }
                        text_target = TextTarget::SkippedMessage;
                    }
                    "system-out" => {
                        text_target = if case.is_some() {
                            TextTarget::CaseSystemOut
                        } else {
                            TextTarget::SuiteSystemOut
                        };
                    }
                    "system-err" => {
                        text_target = if case.is_some() {
                            TextTarget::CaseSystemErr
                        } else {
                            TextTarget::SuiteSystemErr
                        };
                    }
                    "property" => {
                        let mut key_attr = None;
                        let mut value_attr = None;
                        for attr in e.attributes() {
                            let attr = attr?;
                            let k = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                            let v = attr.decode_and_unescape_value(reader.decoder())?.into_owned();
                            match k.as_str() {
                                "name" => key_attr = Some(v),
                                "value" => value_attr = Some(v),
                                _ => {}
                            }
                        }
                        if let (Some(k), Some(v)) = (key_attr, value_attr) {
                            if let Some(suite) = suite.as_mut() {
                                suite.properties.push((k, v));
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                let text = e.unescape()?.into_owned();
                match text_target {
                    TextTarget::SuiteSystemOut => {
                        if let Some(suite) = suite.as_mut() {
                            suite.system_out.push(&text, config.max_text_bytes);
                        }
                    }
                    TextTarget::SuiteSystemErr => {
                        if let Some(suite) = suite.as_mut() {
                            suite.system_err.push(&text, config.max_text_bytes);
                        }
                    }
                    TextTarget::CaseSystemOut => {
                        if let Some(case) = case.as_mut() {
                            case.system_out.push(&text, config.max_text_bytes);
                        }
                    }
                    TextTarget::CaseSystemErr => {
                        if let Some(case) = case.as_mut() {
                            case.system_err.push(&text, config.max_text_bytes);
                        }
                    }
                    TextTarget::FailureMessage => {
                        if let Some(case) = case.as_mut() {
                            if let Some(detail) = case.failure.as_mut() {
                                append_stack(detail, &text, config.max_text_bytes);
                            }
                        }
                    }
                    TextTarget::ErrorMessage => {
                        if let Some(case) = case.as_mut() {
                            if let Some(detail) = case.error.as_mut() {
                                append_stack(detail, &text, config.max_text_bytes);
                            }
                        }
                    }
                    TextTarget::SkippedMessage | TextTarget::None => {}
                }
            }
            Event::End(e) => {
                let name = e.name();
                let local = String::from_utf8_lossy(name.as_ref()).into_owned();
                match local.as_str() {
                    "testcase" => {
                        if let (Some(builder), Some(suite)) = (case.take(), suite.as_mut()) {
                            let status = case_status(
                                builder.error.is_some(),
                                builder.failure.is_some(),
                                builder.skipped.is_some(),
                            );
                            suite.cases.push(ParsedCase {
                                suite: suite.name.clone(),
                                class_name: builder.class_name,
                                name: builder.name,
                                time_seconds: builder.time_seconds,
                                status,
                                failure: builder.failure,
                                error: builder.error,
                                skipped: builder.skipped,
                                system_out: builder.system_out.finish(),
                                system_err: builder.system_err.finish(),
                            });
                        }
                    }
                    "failure" | "error" | "skipped" => {
                        text_target = TextTarget::None;
                    }
                    "system-out" | "system-err" => {
                        text_target = TextTarget::None;
                    }
                    "testsuite" => {
                        if let Some(builder) = suite.take() {
                            validate_counters(&builder);
                            suites.push(ParsedSuite {
                                name: builder.name,
                                package: builder.package,
                                hostname: builder.hostname,
                                timestamp: builder.timestamp,
                                properties: builder.properties,
                                system_out: builder.system_out.finish(),
                                system_err: builder.system_err.finish(),
                                cases: builder.cases,
                            });
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(suites)
}

fn append_stack(detail: &mut FailureDetail, text: &str, cap: usize) {
    let mut stack = detail.stack.take().unwrap_or_default();
    if stack.len() < cap {
        let remaining = cap - stack.len();
        if text.len() <= remaining {
            stack.push_str(text);
        } else {
            stack.push_str(&text[..remaining]);
            stack.push_str(TRUNCATION_SENTINEL);
        }
    }
    detail.stack = Some(stack);
}

/// Per design doc §4.3: declared counters are used only for validation; on
/// mismatch the parser trusts the cases it actually saw and just warns.
fn validate_counters(suite: &SuiteBuilder) {
    let actual_tests = suite.cases.len() as i64;
    let actual_failures = suite
        .cases
        .iter()
        .filter(|c| c.status == crate::types::CaseStatus::Failed)
        .count() as i64;
    let actual_errors = suite
        .cases
        .iter()
        .filter(|c| c.status == crate::types::CaseStatus::Errored)
        .count() as i64;
    let actual_skipped = suite
        .cases
        .iter()
        .filter(|c| c.status == crate::types::CaseStatus::Skipped)
        .count() as i64;

    if suite.declared_tests.is_some_and(|n| n != actual_tests)
        || suite.declared_failures.is_some_and(|n| n != actual_failures)
        || suite.declared_errors.is_some_and(|n| n != actual_errors)
        || suite.declared_skipped.is_some_and(|n| n != actual_skipped)
    {
        tracing::warn!(
            suite = %suite.name,
            declared_tests = ?suite.declared_tests,
            actual_tests,
            declared_failures = ?suite.declared_failures,
            actual_failures,
            declared_errors = ?suite.declared_errors,
            actual_errors,
            declared_skipped = ?suite.declared_skipped,
            actual_skipped,
            "testsuite counters do not match parsed cases, trusting cases"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CaseStatus;
    use std::io::Cursor;

    fn parse(xml: &str) -> Vec<ParsedSuite> {
        parse_junit_xml(Cursor::new(xml.as_bytes()), &ParserConfig::default()).unwrap()
    }

    #[test]
    fn parses_bare_testsuite_with_mixed_statuses() {
        let xml = r#"<testsuite name="pkg.Suite" tests="3" failures="1" errors="0" skipped="1">
            <testcase classname="pkg.Suite" name="passes" time="0.1"/>
            <testcase classname="pkg.Suite" name="fails" time="0.2">
                <failure type="AssertionError" message="boom">stack trace here</failure>
            </testcase>
            <testcase classname="pkg.Suite" name="skips">
                <skipped message="not run"/>
            </testcase>
        </testsuite>"#;
        let suites = parse(xml);
        assert_eq!(suites.len(), 1);
        let suite = &suites[0];
        assert_eq!(suite.cases.len(), 3);
        assert_eq!(suite.cases[0].status, CaseStatus::Passed);
        assert_eq!(suite.cases[1].status, CaseStatus::Failed);
        assert_eq!(suite.cases[1].failure.as_ref().unwrap().message.as_deref(), Some("boom"));
        assert_eq!(suite.cases[2].status, CaseStatus::Skipped);
    }

    #[test]
    fn concatenates_multiple_suites_under_testsuites_root() {
        let xml = r#"<testsuites>
            <testsuite name="A"><testcase classname="A" name="t1"/></testsuite>
            <testsuite name="B"><testcase classname="B" name="t2"/></testsuite>
        </testsuites>"#;
        let suites = parse(xml);
        assert_eq!(suites.len(), 2);
        assert_eq!(suites[0].name, "A");
        assert_eq!(suites[1].name, "B");
    }

    #[test]
    fn error_outranks_failure_and_skipped() {
        let xml = r#"<testsuite name="S">
            <testcase classname="C" name="t">
                <error type="IOError" message="io failed">trace</error>
            </testcase>
        </testsuite>"#;
        let suites = parse(xml);
        assert_eq!(suites[0].cases[0].status, CaseStatus::Errored);
    }

    #[test]
    fn missing_classname_maps_to_empty_string() {
        let xml = r#"<testsuite name="S"><testcase name="t"/></testsuite>"#;
        let suites = parse(xml);
        assert_eq!(suites[0].cases[0].class_name, "");
    }

    #[test]
    fn system_out_is_truncated_with_sentinel() {
        let big = "x".repeat(200);
        let xml = format!(
            r#"<testsuite name="S"><testcase classname="C" name="t"><system-out>{big}</system-out></testcase></testsuite>"#
        );
        let config = ParserConfig { max_text_bytes: 50 };
        let suites = parse_junit_xml(Cursor::new(xml.as_bytes()), &config).unwrap();
        let out = suites[0].cases[0].system_out.as_ref().unwrap();
        assert!(out.ends_with(TRUNCATION_SENTINEL));
        assert!(out.len() < big.len());
    }

    #[test]
    fn counter_mismatch_does_not_fail_parse() {
        let xml = r#"<testsuite name="S" tests="99"><testcase classname="C" name="t"/></testsuite>"#;
        let suites = parse(xml);
        assert_eq!(suites[0].cases.len(), 1);
    }

    #[test]
    fn unknown_attributes_are_ignored() {
        let xml = r#"<testsuite name="S" weird="ignored"><testcase classname="C" name="t" flaky="true"/></testsuite>"#;
        let suites = parse(xml);
        assert_eq!(suites[0].cases.len(), 1);
    }
}
