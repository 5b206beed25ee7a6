use serde_json::{Map, Value};

use crate::schema::{Entity, ParsedResult};

/// Entity keys accepted in place of `entity_type`
const TYPE_ALIASES: &[&str] = &["entity_type", "type", "label", "category"];
/// Entity keys accepted in place of `text`
const TEXT_ALIASES: &[&str] = &["text", "value", "name", "entity", "span"];
/// Top-level keys accepted in place of `entities`
const ENTITY_LIST_ALIASES: &[&str] = &["entities", "items", "results"];
/// Top-level keys accepted in place of `relationships`
const RELATIONSHIP_ALIASES: &[&str] = &["relationships", "relations", "relationship_list"];

pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// Confidence assigned from item count alone never reaches this ceiling.
const COUNT_CONFIDENCE_CAP: f64 = 0.85;

#[derive(Debug, Clone)]
pub struct Validation {
    pub result: ParsedResult,
    /// Root is a mapping whose entity sequence is present and is an array
    pub valid: bool,
    /// Entity sequence absent or of zero length
    pub empty: bool,
    pub confidence: f64,
    pub warnings: Vec<String>,
}

impl Validation {
    pub fn is_usable(&self) -> bool {
        self.valid && !self.empty
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, value: &Value) -> Validation {
        let mut warnings = Vec::new();

        let Some(root) = value.as_object() else {
            warnings.push(format!("root is {} not an object", kind_of(value)));
            return Validation {
                result: ParsedResult::empty(),
                valid: false,
                empty: true,
                confidence: 0.0,
                warnings,
            };
        };

        let mut root = root.clone();
        let list_key = take_alias(&mut root, ENTITY_LIST_ALIASES, "entities");
        if let Some(rel_value) = take_first(&mut root, RELATIONSHIP_ALIASES) {
            root.insert("relationships".to_string(), rel_value);
        }

        let (valid, raw_items) = match root.remove("entities") {
            Some(Value::Array(items)) => (true, items),
            Some(other) => {
                warnings.push(format!("entities is {} not an array", kind_of(&other)));
                (false, Vec::new())
            }
            None => {
                warnings.push("entities sequence is missing".to_string());
                (false, Vec::new())
            }
        };
        if let Some(key) = list_key {
            warnings.push(format!("entities read from '{}'", key));
        }

        let entities: Vec<Entity> = raw_items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| normalize_entity(i, item, &mut warnings))
            .collect();

        let citations = take_array(&mut root, "citations", &mut warnings);
        let relationships = take_array(&mut root, "relationships", &mut warnings);
        let top_confidence = root.remove("confidence").and_then(|v| v.as_f64()).map(as_fraction);
        let error = root
            .remove("error")
            .and_then(|v| v.as_str().map(str::to_string));

        let confidence = score(&entities, top_confidence);
        let empty = entities.is_empty();

        Validation {
            result: ParsedResult {
                entities,
                citations,
                relationships,
                confidence: top_confidence,
                error,
                extra: root,
            },
            valid,
            empty,
            confidence,
            warnings,
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn take_first(map: &mut Map<String, Value>, aliases: &[&str]) -> Option<Value> {
    aliases.iter().find_map(|alias| map.remove(*alias))
}

/// Move the first present alias to `canonical`, returning the alias used when
/// it was not the canonical key itself.
fn take_alias(map: &mut Map<String, Value>, aliases: &[&str], canonical: &str) -> Option<String> {
    for alias in aliases {
        if let Some(value) = map.remove(*alias) {
            map.insert(canonical.to_string(), value);
            return (*alias != canonical).then(|| alias.to_string());
        }
    }
    None
}

fn take_array(map: &mut Map<String, Value>, key: &str, warnings: &mut Vec<String>) -> Vec<Value> {
    match map.remove(key) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            warnings.push(format!("{} is {} not an array; dropped", key, kind_of(&other)));
            Vec::new()
        }
    }
}

fn as_fraction(value: f64) -> f64 {
    if value > 1.0 { value / 100.0 } else { value }
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_entity(index: usize, item: Value, warnings: &mut Vec<String>) -> Option<Entity> {
    let Value::Object(mut fields) = item else {
        warnings.push(format!("entity {} is not an object; dropped", index));
        return None;
    };

    let text = take_first(&mut fields, TEXT_ALIASES)
        .and_then(scalar_text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let Some(text) = text else {
        warnings.push(format!("entity {} has no text; dropped", index));
        return None;
    };

    let entity_type = match take_first(&mut fields, TYPE_ALIASES).and_then(scalar_text) {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => {
            warnings.push(format!("entity {} ('{}') has no type", index, text));
            UNKNOWN_TYPE.to_string()
        }
    };

    let confidence = fields
        .remove("confidence")
        .and_then(|v| v.as_f64())
        .map(as_fraction)
        .map(|c| c.clamp(0.0, 1.0));

    Some(Entity {
        text,
        entity_type,
        confidence,
        attributes: fields,
    })
}

fn score(entities: &[Entity], top_confidence: Option<f64>) -> f64 {
    let item_scores: Vec<f64> = entities.iter().filter_map(|e| e.confidence).collect();

    if !item_scores.is_empty() {
        return item_scores.iter().sum::<f64>() / item_scores.len() as f64;
    }
    if let Some(confidence) = top_confidence {
        return confidence.clamp(0.0, 1.0);
    }
    if entities.is_empty() {
        return 0.0;
    }
    (0.5 + 0.1 * entities.len() as f64).min(COUNT_CONFIDENCE_CAP)
}
