//! Recovery strategies for malformed backend output.
//!
//! Each strategy is a pure function from the failed text (plus the offset at
//! which strict parsing gave up) to an optional candidate list. `None` and an
//! empty list both mean "this strategy found nothing".

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{Candidate, RECOVERED_CONFIDENCE, RECOVERED_SOURCE};

lazy_static! {
    /// A brace-delimited object with no nested braces
    static ref FLAT_OBJECT: Regex = Regex::new(r"\{[^{}]*\}").unwrap();

    /// A flat object mentioning `identifierId` anywhere inside it
    static ref IDENTIFIED_OBJECT: Regex =
        Regex::new(r#"\{[^{}]*"identifierId"[^{}]*\}"#).unwrap();

    static ref IDENTIFIER_FIELD: Regex =
        Regex::new(r#""identifierId"\s*:\s*(?P<v>"(?:[^"\\]|\\.)*"|-?\d+)"#).unwrap();

    static ref VALUE_FIELD: Regex = Regex::new(
        r#""extractedValue"\s*:\s*(?P<v>"(?:[^"\\]|\\.)*"|-?\d+(?:\.\d+)?(?:[eE][+-]?\d+)?|true|false|null)"#
    ).unwrap();

    static ref STATUS_FIELD: Regex =
        Regex::new(r#""validationStatus"\s*:\s*(?P<v>"(?:[^"\\]|\\.)*")"#).unwrap();

    static ref REASONING_FIELD: Regex =
        Regex::new(r#""aiReasoning"\s*:\s*(?P<v>"(?:[^"\\]|\\.)*")"#).unwrap();

    static ref CONFIDENCE_FIELD: Regex =
        Regex::new(r#""confidenceScore"\s*:\s*(?P<v>-?\d+(?:\.\d+)?)"#).unwrap();

    static ref SOURCE_FIELD: Regex =
        Regex::new(r#""documentSource"\s*:\s*(?P<v>"(?:[^"\\]|\\.)*")"#).unwrap();

    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();

    static ref TRAILING_COMMA: Regex = Regex::new(r",\s*(?P<close>[}\]])").unwrap();

    static ref OPENING_FENCE: Regex = Regex::new(r"(?m)^\s*```[A-Za-z0-9_-]*\s*$").unwrap();
}

/// Which step of the recovery ladder produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    /// Strict parse of the fenced/bracketed text
    Direct,
    /// Cut at the last complete object before the parse error
    TruncationBoundary,
    /// Control characters and backslashes escaped inside string content
    EscapeRepair,
    /// Field-level regex salvage of identifier/value pairs
    AtomicFields,
    /// Independent parsing of every object mentioning an identifier
    LooseObjects,
}

/// Input handed to each recovery strategy.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    /// Fence-stripped text, sliced from the first `[` to the last `]`
    pub body: &'a str,

    /// Byte offset at which strict parsing failed
    pub error_offset: Option<usize>,
}

/// A single rung of the recovery ladder.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryStrategy {
    pub tier: RecoveryTier,
    pub recover: fn(&RecoveryContext<'_>) -> Option<Vec<Candidate>>,
}

/// The default ladder, tried in order after a strict parse fails.
pub const DEFAULT_STRATEGIES: [RecoveryStrategy; 4] = [
    RecoveryStrategy {
        tier: RecoveryTier::TruncationBoundary,
        recover: truncate_at_boundary,
    },
    RecoveryStrategy {
        tier: RecoveryTier::EscapeRepair,
        recover: escape_repair,
    },
    RecoveryStrategy {
        tier: RecoveryTier::AtomicFields,
        recover: atomic_fields,
    },
    RecoveryStrategy {
        tier: RecoveryTier::LooseObjects,
        recover: loose_objects,
    },
];

/// Remove markdown code fences, keeping the fenced content.
pub fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.trim().to_string();
    }
    let without_openers = OPENING_FENCE.replace_all(text, "");
    without_openers.replace("```", "").trim().to_string()
}

/// The substring between the first `[` and the last `]`.
///
/// A missing closing bracket keeps everything after the first `[`; text with
/// no `[` at all is returned whole.
pub fn bracket_slice(text: &str) -> &str {
    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        (Some(start), _) => &text[start..],
        (None, _) => text,
    }
}

/// Whether the text opens with an object rather than an array, ignoring any
/// prose before the first brace.
pub fn leads_with_object(text: &str) -> bool {
    match (text.find('{'), text.find('[')) {
        (Some(object), Some(array)) => object < array,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Strict parse; scalars and single objects become one-element lists.
pub fn parse_list(text: &str) -> Result<Vec<Candidate>, serde_json::Error> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

/// Translate a serde_json error position into a byte offset within `text`.
pub fn error_offset(text: &str, err: &serde_json::Error) -> usize {
    let line = err.line();
    if line == 0 {
        return text.len();
    }

    let line_start: usize = text
        .split('\n')
        .take(line - 1)
        .map(|l| l.len() + 1)
        .sum();
    let mut offset = (line_start + err.column()).min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Tier 2: cut at the last complete `"},` boundary before the error and close
/// the array. Falls back to a bare `},` boundary for objects ending in numbers.
pub fn truncate_at_boundary(ctx: &RecoveryContext<'_>) -> Option<Vec<Candidate>> {
    let limit = ctx.error_offset.unwrap_or(ctx.body.len()).min(ctx.body.len());
    let head = &ctx.body[..limit];

    let mut cuts = Vec::with_capacity(2);
    if let Some(idx) = head.rfind("\"},") {
        cuts.push(idx + 2);
    }
    if let Some(idx) = head.rfind("},") {
        if !cuts.contains(&(idx + 1)) {
            cuts.push(idx + 1);
        }
    }

    cuts.into_iter().find_map(|cut| {
        let mut repaired = String::with_capacity(cut + 2);
        if !head.starts_with('[') {
            repaired.push('[');
        }
        repaired.push_str(&head[..cut]);
        repaired.push(']');
        parse_list(&repaired).ok().filter(|items| !items.is_empty())
    })
}

/// Escape backslashes and raw control characters inside every odd-indexed
/// quote-delimited segment.
pub fn escape_string_segments(text: &str) -> String {
    text.split('"')
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 1 {
                escape_segment(segment)
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\"")
}

fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                // Already a valid escape sequence
                Some('\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                    out.push('\\');
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                // Segment-final backslash belongs to an escaped quote
                None => out.push('\\'),
                _ => out.push_str("\\\\"),
            },
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Tier 3: escape-repair string content, then retry strict and boundary parsing.
pub fn escape_repair(ctx: &RecoveryContext<'_>) -> Option<Vec<Candidate>> {
    let repaired = escape_string_segments(ctx.body);
    if repaired == ctx.body {
        return None;
    }

    match parse_list(&repaired) {
        Ok(items) => Some(items).filter(|items| !items.is_empty()),
        Err(err) => {
            let retry = RecoveryContext {
                body: &repaired,
                error_offset: Some(error_offset(&repaired, &err)),
            };
            truncate_at_boundary(&retry)
        }
    }
}

/// Tier 4: salvage flat objects carrying both `identifierId` and
/// `extractedValue`, reading each field independently.
pub fn atomic_fields(ctx: &RecoveryContext<'_>) -> Option<Vec<Candidate>> {
    let recovered: Vec<Candidate> = FLAT_OBJECT
        .find_iter(ctx.body)
        .filter_map(|m| salvage_object(m.as_str()))
        .collect();

    Some(recovered).filter(|items| !items.is_empty())
}

fn salvage_object(object: &str) -> Option<Candidate> {
    let identifier = capture(&IDENTIFIER_FIELD, object)?;
    let value = capture(&VALUE_FIELD, object)?;

    let mut fields = Map::new();
    fields.insert("identifierId".to_string(), decode_token(identifier));
    fields.insert("extractedValue".to_string(), decode_token(value));
    fields.insert(
        "validationStatus".to_string(),
        capture(&STATUS_FIELD, object)
            .map(decode_token)
            .unwrap_or_else(|| Value::String("valid".to_string())),
    );
    fields.insert(
        "aiReasoning".to_string(),
        capture(&REASONING_FIELD, object)
            .map(decode_token)
            .unwrap_or_else(|| Value::String("Recovered from malformed response".to_string())),
    );
    fields.insert(
        "confidenceScore".to_string(),
        capture(&CONFIDENCE_FIELD, object)
            .map(decode_token)
            .unwrap_or_else(|| Value::from(RECOVERED_CONFIDENCE)),
    );
    fields.insert(
        "documentSource".to_string(),
        capture(&SOURCE_FIELD, object)
            .map(decode_token)
            .unwrap_or_else(|| Value::String(RECOVERED_SOURCE.to_string())),
    );

    Some(Value::Object(fields))
}

fn capture<'t>(pattern: &Regex, text: &'t str) -> Option<&'t str> {
    pattern
        .captures(text)
        .and_then(|caps| caps.name("v"))
        .map(|m| m.as_str())
}

/// Decode a captured JSON token, tolerating raw control characters in strings.
fn decode_token(token: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(token) {
        return value;
    }
    let escaped = escape_string_segments(token);
    if let Ok(value) = serde_json::from_str::<Value>(&escaped) {
        return value;
    }
    let inner = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    Value::String(inner.to_string())
}

/// Tier 5: parse every object mentioning `identifierId` on its own after
/// collapsing whitespace and dropping trailing commas. Failures are skipped.
pub fn loose_objects(ctx: &RecoveryContext<'_>) -> Option<Vec<Candidate>> {
    let recovered: Vec<Candidate> = IDENTIFIED_OBJECT
        .find_iter(ctx.body)
        .filter_map(|m| {
            let collapsed = WHITESPACE_RUN.replace_all(m.as_str(), " ");
            let normalized = TRAILING_COMMA.replace_all(&collapsed, "$close");
            match serde_json::from_str::<Value>(&normalized) {
                Ok(value @ Value::Object(_)) => Some(value),
                _ => None,
            }
        })
        .collect();

    Some(recovered).filter(|items| !items.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(body: &str) -> RecoveryContext<'_> {
        let offset = parse_list(body).err().map(|e| error_offset(body, &e));
        RecoveryContext {
            body,
            error_offset: offset,
        }
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1, 2]\n```"), "[1, 2]");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  [3]  "), "[3]");
    }

    #[test]
    fn test_bracket_slice() {
        assert_eq!(bracket_slice("Here you go: [1,2] done"), "[1,2]");
        assert_eq!(bracket_slice("noise [1,2"), "[1,2");
        assert_eq!(bracket_slice("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_list_wraps_single_values() {
        assert_eq!(parse_list("{\"a\":1}").unwrap(), vec![json!({"a": 1})]);
        assert_eq!(parse_list("7").unwrap(), vec![json!(7)]);
        assert_eq!(parse_list("[1,2]").unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_error_offset_multiline() {
        let text = "[\n  {\"a\": 1},\n  {\"b\": ]";
        let err = parse_list(text).unwrap_err();
        let offset = error_offset(text, &err);
        assert!(offset > text.find("\"b\"").unwrap());
        assert!(offset <= text.len());
    }

    #[test]
    fn test_truncate_at_boundary() {
        let body = r#"[{"identifierId":"a","extractedValue":"v1"},{"identifierId":"b","extract"#;
        let items = truncate_at_boundary(&ctx(body)).unwrap();
        assert_eq!(items, vec![json!({"identifierId": "a", "extractedValue": "v1"})]);
    }

    #[test]
    fn test_truncate_at_numeric_boundary() {
        let body = r#"[{"identifierId":"a","confidenceScore":90},{"identifierId":"b","conf"#;
        let items = truncate_at_boundary(&ctx(body)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["confidenceScore"], 90);
    }

    #[test]
    fn test_truncate_without_complete_object() {
        let body = r#"[{"identifierId":"a","extrac"#;
        assert!(truncate_at_boundary(&ctx(body)).is_none());
    }

    #[test]
    fn test_escape_string_segments() {
        let raw = "[{\"extractedValue\":\"line one\nline two\tC:\\path\"}]";
        let repaired = escape_string_segments(raw);
        let items = parse_list(&repaired).unwrap();
        assert_eq!(items[0]["extractedValue"], "line one\nline two\tC:\\path");
    }

    #[test]
    fn test_escape_string_segments_keeps_escaped_quotes() {
        let raw = "[{\"extractedValue\":\"say \\\"hi\\\"\nnow\"}]";
        let repaired = escape_string_segments(raw);
        let items = parse_list(&repaired).unwrap();
        assert_eq!(items[0]["extractedValue"], "say \"hi\"\nnow");
    }

    #[test]
    fn test_leads_with_object() {
        assert!(leads_with_object(r#"{"a": [1]}"#));
        assert!(leads_with_object(r#"Result: {"a": 1}"#));
        assert!(!leads_with_object(r#"[{"a": 1}]"#));
        assert!(!leads_with_object("no json here"));
    }

    #[test]
    fn test_escape_repair_keeps_valid_escapes() {
        let raw = "[{\"extractedValue\":\"a\\nb\r\"}]";
        let items = escape_repair(&ctx(raw)).unwrap();
        assert_eq!(items[0]["extractedValue"], "a\nb\r");
    }

    #[test]
    fn test_escape_repair_noop_returns_none() {
        let raw = r#"[{"identifierId": }]"#;
        assert!(escape_repair(&ctx(raw)).is_none());
    }

    #[test]
    fn test_atomic_fields_defaults() {
        let body = r#"garbage {"identifierId": "r1", "extractedValue": "Acme", oops} more {"identifierId":"r2","extractedValue":42,"confidenceScore":77}"#;
        let items = atomic_fields(&ctx(body)).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["identifierId"], "r1");
        assert_eq!(items[0]["extractedValue"], "Acme");
        assert_eq!(items[0]["validationStatus"], "valid");
        assert_eq!(items[0]["documentSource"], RECOVERED_SOURCE);
        assert_eq!(items[0]["confidenceScore"], json!(RECOVERED_CONFIDENCE));
        assert_eq!(items[1]["extractedValue"], 42);
        assert_eq!(items[1]["confidenceScore"], 77);
    }

    #[test]
    fn test_atomic_fields_requires_value() {
        let body = r#"{"identifierId": "r1", "note": "x"}"#;
        assert!(atomic_fields(&ctx(body)).is_none());
    }

    #[test]
    fn test_loose_objects_skips_broken_candidates() {
        let body = "[{\"identifierId\": \"a\",\n  \"answer\": \"yes\",\n}, {\"identifierId\": \"b\" \"broken\"}, {\"other\": 1}]";
        let items = loose_objects(&ctx(body)).unwrap();
        assert_eq!(items, vec![json!({"identifierId": "a", "answer": "yes"})]);
    }

    #[test]
    fn test_default_ladder_order() {
        let tiers: Vec<_> = DEFAULT_STRATEGIES.iter().map(|s| s.tier).collect();
        assert_eq!(
            tiers,
            vec![
                RecoveryTier::TruncationBoundary,
                RecoveryTier::EscapeRepair,
                RecoveryTier::AtomicFields,
                RecoveryTier::LooseObjects,
            ]
        );
    }
}
