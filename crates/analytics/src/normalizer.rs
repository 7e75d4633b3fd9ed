//! Message normalization and signature hashing (design doc §4.5). The
//! normalization pipeline is an ordered sequence of substitutions; the
//! output of one stage feeds the next, and no stage reintroduces text
//! matched by the stages before it, which is what makes the whole
//! function idempotent.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ISO8601: Regex =
        Regex::new(r"\b\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?\b").unwrap();
    static ref WALL_CLOCK: Regex = Regex::new(r"\b\d{1,2}:\d{2}:\d{2}(?:\.\d+)?\b").unwrap();
    static ref FILE_LOC: Regex = Regex::new(r"\b[\w./\\-]+\.\w+:\d+(?::\d+)?\b").unwrap();
    static ref HEX_ADDR: Regex = Regex::new(r"\b0x[0-9a-fA-F]+\b").unwrap();
    static ref PID_TID: Regex = Regex::new(r"(?i)\b(?:pid|tid)\s*[:=]?\s*\d+\b").unwrap();
    static ref PORT: Regex = Regex::new(r"(?i)\bport\s*[:=]?\s*\d+\b").unwrap();
    static ref UUID: Regex =
        Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b").unwrap();
    static ref HEX_HASH: Regex = Regex::new(r"\b[0-9a-fA-F]{32}\b").unwrap();
    static ref NUM_UNIT: Regex =
        Regex::new(r"(?i)\b\d+(?:\.\d+)?\s?(?:ms|ns|us|s|secs?|bytes?|kb|mb|gb|ops)\b").unwrap();
    static ref ASSERTION_RHS: Regex = Regex::new(r"(?i)\b(expected|actual|got)(\s*[:=]\s*)\S+").unwrap();
    static ref STACK_FRAME: Regex = Regex::new(r"^\s*at\s+.+\(.+:\d+(?::\d+)?\)\s*$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Canonicalizes a raw failure message into a stable, deduplication-ready
/// string. Idempotent: `normalize_message(normalize_message(x)) ==
/// normalize_message(x)`.
pub fn normalize_message(raw: &str) -> String {
    let collapsed = collapse_stack_frames(raw);

    let s = ISO8601.replace_all(&collapsed, "[TIMESTAMP]");
    let s = WALL_CLOCK.replace_all(&s, "[TIMESTAMP]");
    let s = FILE_LOC.replace_all(&s, "[LOC]");
    let s = HEX_ADDR.replace_all(&s, "[ADDR]");
    let s = PID_TID.replace_all(&s, "");
    let s = PORT.replace_all(&s, "");
    let s = UUID.replace_all(&s, "[UUID]");
    let s = HEX_HASH.replace_all(&s, "[HASH]");
    let s = NUM_UNIT.replace_all(&s, "[NUM]");
    let s = ASSERTION_RHS.replace_all(&s, "$1$2[VALUE]");
    let s = WHITESPACE.replace_all(s.trim(), " ");

    s.into_owned()
}

/// Collapses any run of consecutive stack-frame lines ("at X (path:L:C)")
/// into a single `[STACK]` sentinel. Runs before the rest of the pipeline:
/// `STACK_FRAME` depends on a frame's `path:line[:col]` suffix still being
/// raw digits, and `FILE_LOC` would have already rewritten that suffix to
/// `[LOC]` if it ran first, so the two substitutions can't be swapped.
fn collapse_stack_frames(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_stack = false;
    for line in raw.lines() {
        if STACK_FRAME.is_match(line) {
            if !in_stack {
                out.push_str("[STACK]");
                out.push('\n');
                in_stack = true;
            }
        } else {
            in_stack = false;
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

/// Stable 128-bit signature of a normalized message. MD5 is used purely
/// as a fast, collision-resistant-enough dedup key, never as a security
/// primitive.
pub fn signature(canonical: &str) -> String {
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

/// Digest of a raw stack trace, computed by running it through the same
/// normalization used for messages.
pub fn stack_digest(raw_stack: &str) -> String {
    signature(&normalize_message(raw_stack))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_timestamps_and_addresses() {
        let raw = "2024-03-01T12:00:00Z connection refused at 0x7ffee3a1b2c0";
        let out = normalize_message(raw);
        assert!(out.contains("[TIMESTAMP]"));
        assert!(out.contains("[ADDR]"));
    }

    #[test]
    fn replaces_file_line_references() {
        let out = normalize_message("panic at src/lib.rs:42:9");
        assert!(out.contains("[LOC]"));
        assert!(!out.contains("src/lib.rs:42"));
    }

    #[test]
    fn collapses_stack_frames_to_single_sentinel() {
        let raw = "assertion failed\n  at foo (src/a.rs:1:1)\n  at bar (src/b.rs:2:2)\n  at baz (src/c.rs:3:3)";
        let out = normalize_message(raw);
        assert_eq!(out.matches("[STACK]").count(), 1);
    }

    #[test]
    fn normalizes_assertion_sides() {
        let out = normalize_message("assertion failed: expected: 5 actual: 6");
        assert!(out.contains("expected: [VALUE]"));
        assert!(out.contains("actual: [VALUE]"));
    }

    #[test]
    fn is_idempotent() {
        let raw = "2024-03-01T12:00:00Z timeout after 500ms at src/lib.rs:10:2 pid=1234 port=8080 expected: 1 actual: 2";
        let once = normalize_message(raw);
        let twice = normalize_message(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn signature_is_deterministic() {
        let a = signature(&normalize_message("boom"));
        let b = signature(&normalize_message("boom"));
        assert_eq!(a, b);
    }

    #[test]
    fn different_messages_yield_different_signatures() {
        let a = signature(&normalize_message("boom"));
        let b = signature(&normalize_message("bang"));
        assert_ne!(a, b);
    }
}
