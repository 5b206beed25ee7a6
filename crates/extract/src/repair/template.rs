use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

use super::scanner;
use super::stages;

static ARRAY_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?P<key>entities|citations|relationships|relations|relationship_list)"\s*:\s*\["#)
        .expect("valid array key regex")
});

static FLAT_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("valid flat object regex"));

static CONFIDENCE_SCALAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:overall_)?confidence"\s*:\s*(?P<num>-?\d+(?:\.\d+)?)"#)
        .expect("valid confidence scalar regex")
});

fn canonical_key(key: &str) -> &'static str {
    match key {
        "entities" => "entities",
        "citations" => "citations",
        _ => "relationships",
    }
}

fn parse_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Recover the items of one array, repairing it in isolation and, failing
/// that, salvaging every flat object inside it.
fn recover_array(text: &str) -> Vec<Value> {
    if let Some(items) = parse_array(text) {
        return items;
    }

    let repaired = stages::fix_structure(&scanner::close_unterminated_strings(text));
    if let Some(items) = parse_array(&repaired) {
        return items;
    }

    FLAT_OBJECT_RE
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter(Value::is_object)
        .collect()
}

/// Pull named arrays and a confidence scalar out of text that is not valid
/// JSON as a whole. Returns `None` when nothing recognizable was found.
pub fn recover(raw: &str) -> Option<Value> {
    let mut assembled = Map::new();
    let mut array_spans = Vec::new();

    for caps in ARRAY_KEY_RE.captures_iter(raw) {
        let whole = caps.get(0)?;
        let open = whole.end() - 1;
        let close = scanner::balanced_end(raw, open).unwrap_or(raw.len());
        array_spans.push((open, close));

        let items = recover_array(&raw[open..close]);
        let key = canonical_key(&caps["key"]);

        let slot = assembled
            .entry(key)
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(existing) = slot {
            existing.extend(items);
        }
    }

    let confidence = CONFIDENCE_SCALAR_RE
        .captures_iter(raw)
        .filter(|caps| {
            let at = caps.get(0).map(|m| m.start()).unwrap_or(0);
            !array_spans.iter().any(|&(s, e)| at > s && at < e)
        })
        .find_map(|caps| caps["num"].parse::<f64>().ok());

    if let Some(confidence) = confidence {
        let confidence = if confidence > 1.0 { confidence / 100.0 } else { confidence };
        if let Some(number) = serde_json::Number::from_f64(confidence) {
            assembled.insert("confidence".to_string(), Value::Number(number));
        }
    }

    if assembled.is_empty() {
        None
    } else {
        Some(Value::Object(assembled))
    }
}
