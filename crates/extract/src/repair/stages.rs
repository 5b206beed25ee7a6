use regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

use super::scanner;

static PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*(?:sure|certainly|of course|okay|ok|absolutely|great|here(?:'s| is| are)|below is|i(?:'ve| have) extracted)[^{\[]*",
    )
    .expect("valid prefix regex")
});

static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\n\s*(?:\*\*)?(?:note|notes|explanation|explanations)(?:\*\*)?\s*:.*$")
        .expect("valid suffix regex")
});

static FENCE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*```[A-Za-z0-9_-]*\s*$").expect("valid fence regex")
});

static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#""(?P<key>[A-Za-z_]*(?:confidence|score|probability|certainty))"\s*:\s*(?P<num>-?\d+(?:\.\d+)?)"#,
    )
    .expect("valid confidence regex")
});

static NAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<pre>[:\[,]\s*)NaN\b").expect("valid NaN regex"));

static INFINITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<pre>[:\[,]\s*)(?P<sign>-?)Infinity\b").expect("valid Infinity regex")
});

/// Finite stand-in for `Infinity`, which JSON cannot represent.
pub const INFINITY_SENTINEL: &str = "1e308";

/// One correction pass over a JSON candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStage {
    StripConversational,
    UnterminatedStrings,
    InteriorQuotes,
    Structural,
    NumericAnomalies,
    LastResort,
}

/// Stages in the order they are applied.
pub const CORRECTION_STAGES: [RepairStage; 6] = [
    RepairStage::StripConversational,
    RepairStage::UnterminatedStrings,
    RepairStage::InteriorQuotes,
    RepairStage::Structural,
    RepairStage::NumericAnomalies,
    RepairStage::LastResort,
];

impl RepairStage {
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::StripConversational => strip_conversational(text),
            Self::UnterminatedStrings => scanner::close_unterminated_strings(text),
            Self::InteriorQuotes => scanner::escape_interior_quotes(text),
            Self::Structural => fix_structure(text),
            Self::NumericAnomalies => normalize_numbers(text),
            Self::LastResort => last_resort(text),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StripConversational => "strip_conversational",
            Self::UnterminatedStrings => "unterminated_strings",
            Self::InteriorQuotes => "interior_quotes",
            Self::Structural => "structural",
            Self::NumericAnomalies => "numeric_anomalies",
            Self::LastResort => "last_resort",
        }
    }
}

pub fn strip_conversational(text: &str) -> String {
    let mut out = FENCE_MARKER_RE.replace_all(text, "").into_owned();

    // Only drop a chatty preamble when something structured follows it
    if let Some(m) = PREFIX_RE.find(&out) {
        if m.end() < out.len() {
            out = out[m.end()..].to_string();
        }
    }

    out = SUFFIX_RE.replace(&out, "").into_owned();
    out.trim().to_string()
}

pub fn fix_structure(text: &str) -> String {
    let mut out = scanner::remove_trailing_commas(text);
    out = scanner::insert_missing_commas(&out);

    let trimmed = out.trim_end().len();
    out.truncate(trimmed);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str(" null");
    }

    scanner::close_open_structures(&out)
}

pub fn normalize_numbers(text: &str) -> String {
    let out = CONFIDENCE_RE.replace_all(text, |caps: &Captures| {
        let value: f64 = caps["num"].parse().unwrap_or(0.0);
        if value > 1.0 {
            format!("\"{}\": {}", &caps["key"], value / 100.0)
        } else {
            caps[0].to_string()
        }
    });
    let out = NAN_RE.replace_all(&out, "${pre}null");
    INFINITY_RE
        .replace_all(&out, |caps: &Captures| {
            format!("{}{}{}", &caps["pre"], &caps["sign"], INFINITY_SENTINEL)
        })
        .into_owned()
}

pub fn last_resort(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\t')
        .collect();

    let mut out = cleaned.trim().to_string();
    if scanner::final_state(&out) != scanner::ScanState::Outside {
        out = scanner::close_unterminated_strings(&out);
    }
    out = scanner::drop_unmatched_closers(&out);
    out = fix_structure(&out);

    let wrapped = (out.starts_with('{') && out.ends_with('}'))
        || (out.starts_with('[') && out.ends_with(']'));
    if wrapped {
        out
    } else {
        format!("{{{}}}", out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_conversational() {
        let text = "Sure, here is the JSON you asked for:\n```json\n{\"entities\": []}\n```\nNote: I skipped the signature block.";
        assert_eq!(strip_conversational(text), "{\"entities\": []}");
    }

    #[test]
    fn test_strip_keeps_text_without_structure() {
        assert_eq!(strip_conversational("Sure thing"), "Sure thing");
    }

    #[test]
    fn test_fix_structure() {
        assert_eq!(
            fix_structure(r#"{"entities": [{"text": "A",},"#),
            r#"{"entities": [{"text": "A"}]}"#
        );
        assert_eq!(
            fix_structure(r#"{"entities": [], "confidence":"#),
            r#"{"entities": [], "confidence": null}"#
        );
    }

    #[test]
    fn test_normalize_numbers() {
        let text = r#"{"confidence": 85, "score": 0.5, "x": NaN, "y": -Infinity, "z": [Infinity]}"#;
        assert_eq!(
            normalize_numbers(text),
            r#"{"confidence": 0.85, "score": 0.5, "x": null, "y": -1e308, "z": [1e308]}"#
        );
    }

    #[test]
    fn test_last_resort_wraps_and_balances() {
        let fixed = last_resort("\"entities\": [{\"text\": \"A\u{7}\"}]}");
        assert_eq!(fixed, r#"{"entities": [{"text": "A"}]}"#);
        let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["entities"][0]["text"], "A");
    }
}
