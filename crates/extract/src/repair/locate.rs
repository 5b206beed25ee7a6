use regex::Regex;
use serde_json::{Value, json};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::LazyLock;

use super::scanner;

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").expect("valid fenced block regex")
});

static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid inline code regex"));

/// Strict parse that only accepts structured values. A top-level array is
/// read as the entity sequence.
pub fn parse_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text).ok()? {
        value @ Value::Object(_) => Some(value),
        Value::Array(items) => Some(json!({ "entities": items })),
        _ => None,
    }
}

pub fn fast_path(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));

    if looks_structured {
        parse_structured(trimmed)
    } else {
        None
    }
}

fn brace_slice(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Candidate substrings worth a strict parse, most likely first.
pub fn candidates(raw: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    // an object body whose outer braces were dropped
    let trimmed = raw.trim();
    if trimmed.starts_with('"') {
        found.push(format!("{{{}}}", trimmed));
    }

    if let Some(slice) = brace_slice(raw) {
        found.push(slice.to_string());
    }

    for caps in FENCED_BLOCK_RE.captures_iter(raw) {
        let body = caps[1].trim();
        if body.starts_with('{') {
            found.push(body.to_string());
        }
    }

    for caps in INLINE_CODE_RE.captures_iter(raw) {
        let body = caps[1].trim();
        if body.starts_with('{') {
            found.push(body.to_string());
        }
    }

    // widest spans first; fresh scans from each brace recover an object that
    // a stray prose quote hid from the string-aware pass
    let mut spans = scanner::balanced_object_spans(raw);
    spans.extend(
        raw.match_indices('{')
            .filter_map(|(start, _)| scanner::balanced_end(raw, start).map(|end| (start, end))),
    );
    spans.sort_by_key(|(start, end)| Reverse(end - start));
    found.extend(spans.into_iter().map(|(start, end)| raw[start..end].to_string()));

    let mut seen = HashSet::new();
    found.retain(|candidate| seen.insert(candidate.clone()));
    found
}

/// The text handed to the correction stages when no candidate parses.
pub fn best_candidate(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('"') {
        return trimmed.to_string();
    }

    let Some(start) = raw.find('{').or_else(|| raw.find('[')) else {
        return trimmed.to_string();
    };

    // truncated output: keep everything from the first opener
    let tail = raw[start..].trim_end();
    let truncated = !scanner::open_structures(tail).is_empty()
        || scanner::final_state(tail) != scanner::ScanState::Outside;

    match brace_slice(raw) {
        Some(slice) if !truncated => slice.to_string(),
        _ => tail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_structured_wraps_arrays() {
        let value = parse_structured(r#"[{"text": "A", "entity_type": "PARTY"}]"#).unwrap();
        assert_eq!(value["entities"][0]["text"], "A");
        assert!(parse_structured("42").is_none());
        assert!(parse_structured("\"text\"").is_none());
    }

    #[test]
    fn test_candidates_from_prose() {
        let raw = "The result is {\"entities\": []} as requested.";
        assert_eq!(candidates(raw)[0], "{\"entities\": []}");
    }

    #[test]
    fn test_candidates_from_fence() {
        let raw = "Result:\n```json\n{\"entities\": [{\"text\": \"A\"}]}\n```\nAlso {not json}";
        let found = candidates(raw);
        assert!(found.iter().any(|c| c == "{\"entities\": [{\"text\": \"A\"}]}"));
    }

    #[test]
    fn test_best_candidate_for_truncated_output() {
        let raw = "Here you go: {\"entities\": [{\"text\": \"Jane";
        assert_eq!(best_candidate(raw), "{\"entities\": [{\"text\": \"Jane");

        let raw = "{\"entities\": [{\"text\": \"A\"}, {\"text\": \"B";
        assert_eq!(best_candidate(raw), raw);
    }

    #[test]
    fn test_braceless_body_is_a_candidate() {
        let raw = "\"entities\": [{\"text\": \"Acme\"}]";
        assert_eq!(candidates(raw)[0], "{\"entities\": [{\"text\": \"Acme\"}]}");
    }

    #[test]
    fn test_object_after_wider_prose_braces() {
        let raw = "Context {omitted for brevity, see the attached exhibit list} answer: {\"parties\": [\"Acme\"]}";
        let found = candidates(raw);
        assert!(found.iter().any(|c| c == "{\"parties\": [\"Acme\"]}"));
        let prose = "{omitted for brevity, see the attached exhibit list}";
        assert_eq!(found.iter().filter(|c| *c == prose).count(), 1);
    }

    #[test]
    fn test_object_after_stray_quote() {
        let raw = "The clause says \"see {exhibit A} here: {\"parties\": [\"Acme\"]}";
        assert!(candidates(raw).iter().any(|c| c == "{\"parties\": [\"Acme\"]}"));
    }
}
