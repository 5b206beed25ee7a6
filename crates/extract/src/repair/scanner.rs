//! String-aware scanning over JSON-ish text.
//!
//! Every pass here walks the text with the same three-state machine so that
//! quotes, braces and commas inside string literals are never mistaken for
//! structure.

use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Outside,
    InString,
    Escaped,
}

impl ScanState {
    pub fn next(self, c: char) -> Self {
        match (self, c) {
            (Self::Outside, '"') => Self::InString,
            (Self::Outside, _) => Self::Outside,
            (Self::InString, '\\') => Self::Escaped,
            (Self::InString, '"') => Self::Outside,
            (Self::InString, _) => Self::InString,
            (Self::Escaped, _) => Self::InString,
        }
    }
}

/// Final scanner state after consuming the whole text.
pub fn final_state(text: &str) -> ScanState {
    text.chars().fold(ScanState::Outside, ScanState::next)
}

fn is_raw_control(c: char) -> bool {
    (c as u32) < 0x20
}

/// Escape raw control characters inside string literals and close a string
/// left open at the end of the text.
pub fn close_unterminated_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut state = ScanState::Outside;

    for c in text.chars() {
        match state {
            ScanState::InString if is_raw_control(c) => match c {
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
            },
            ScanState::Escaped if is_raw_control(c) => match c {
                '\n' => out.push('n'),
                '\r' => out.push('r'),
                '\t' => out.push('t'),
                _ => {
                    let _ = write!(out, "u{:04x}", c as u32);
                }
            },
            _ => out.push(c),
        }
        state = state.next(c);
    }

    match state {
        ScanState::Outside => {}
        ScanState::InString => out.push('"'),
        ScanState::Escaped => {
            // dangling backslash cannot escape the closing quote
            out.pop();
            out.push('"');
        }
    }

    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

fn next_significant(chars: &[char], from: usize) -> (Option<char>, bool) {
    let mut saw_newline = false;
    for &c in &chars[from..] {
        if c == '\n' {
            saw_newline = true;
        }
        if !c.is_whitespace() {
            return (Some(c), saw_newline);
        }
    }
    (None, saw_newline)
}

/// Escape double quotes that sit inside a string literal but cannot be its
/// closing quote. A key string may only be closed before `:`; a value string
/// before `,` `}` `]`, end of text, or a line break followed by another string.
pub fn escape_interior_quotes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut containers: Vec<Container> = Vec::new();
    let mut expect_key = false;
    let mut in_key = false;
    let mut state = ScanState::Outside;

    for (i, &c) in chars.iter().enumerate() {
        match state {
            ScanState::Outside => {
                match c {
                    '{' => {
                        containers.push(Container::Object);
                        expect_key = true;
                    }
                    '[' => {
                        containers.push(Container::Array);
                        expect_key = false;
                    }
                    '}' | ']' => {
                        containers.pop();
                        expect_key = false;
                    }
                    ':' => expect_key = false,
                    ',' => expect_key = containers.last() == Some(&Container::Object),
                    '"' => in_key = expect_key && containers.last() == Some(&Container::Object),
                    _ => {}
                }
                out.push(c);
                state = state.next(c);
            }
            ScanState::InString if c == '"' => {
                let (next, saw_newline) = next_significant(&chars, i + 1);
                let closes = if in_key {
                    matches!(next, None | Some(':'))
                } else {
                    matches!(next, None | Some(',' | '}' | ']' | ':'))
                        || (saw_newline && next == Some('"'))
                };

                if closes {
                    out.push('"');
                    state = ScanState::Outside;
                } else {
                    out.push_str("\\\"");
                }
            }
            _ => {
                out.push(c);
                state = state.next(c);
            }
        }
    }

    out
}

/// Openers left unclosed, in nesting order. Unmatched closers are ignored.
pub fn open_structures(text: &str) -> Vec<char> {
    let mut stack = Vec::new();
    let mut state = ScanState::Outside;

    for c in text.chars() {
        if state == ScanState::Outside {
            match c {
                '{' | '[' => stack.push(c),
                '}' if stack.last() == Some(&'{') => {
                    stack.pop();
                }
                ']' if stack.last() == Some(&'[') => {
                    stack.pop();
                }
                _ => {}
            }
        }
        state = state.next(c);
    }

    stack
}

/// Append the closers for every structure still open.
pub fn close_open_structures(text: &str) -> String {
    let mut out = text.to_string();
    for opener in open_structures(text).into_iter().rev() {
        out.push(if opener == '{' { '}' } else { ']' });
    }
    out
}

/// Remove closers with no matching opener.
pub fn drop_unmatched_closers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut stack = Vec::new();
    let mut state = ScanState::Outside;

    for c in text.chars() {
        if state == ScanState::Outside {
            match c {
                '{' | '[' => stack.push(c),
                '}' | ']' => {
                    let opener = if c == '}' { '{' } else { '[' };
                    if stack.last() == Some(&opener) {
                        stack.pop();
                    } else {
                        continue;
                    }
                }
                _ => {}
            }
        }
        out.push(c);
        state = state.next(c);
    }

    out
}

/// Drop commas directly before a closing brace or bracket.
pub fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut state = ScanState::Outside;

    for (i, &c) in chars.iter().enumerate() {
        if state == ScanState::Outside && c == ',' {
            if let (Some('}' | ']'), _) = next_significant(&chars, i + 1) {
                continue;
            }
        }
        out.push(c);
        state = state.next(c);
    }

    out
}

fn ends_value(c: char) -> bool {
    matches!(c, '"' | '}' | ']') || c.is_ascii_digit() || matches!(c, 'e' | 'l')
}

/// Insert a comma where one value ends a line and the next line starts a new
/// string, object or array.
pub fn insert_missing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 8);
    let mut state = ScanState::Outside;

    for (i, &c) in chars.iter().enumerate() {
        if state == ScanState::Outside && c == '\n' {
            let prev = out.trim_end().chars().last();
            let (next, _) = next_significant(&chars, i + 1);
            if prev.is_some_and(ends_value) && matches!(next, Some('"' | '{' | '[')) {
                let trimmed = out.trim_end().len();
                out.truncate(trimmed);
                out.push(',');
            }
        }
        out.push(c);
        state = state.next(c);
    }

    out
}

/// Spans `(start, end_exclusive)` of top-level balanced `{...}` regions.
pub fn balanced_object_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut state = ScanState::Outside;

    for (i, c) in text.char_indices() {
        if state == ScanState::Outside {
            match c {
                '{' => {
                    if depth == 0 {
                        start = i;
                    }
                    depth += 1;
                }
                '}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        spans.push((start, i + 1));
                    }
                }
                _ => {}
            }
        }
        state = state.next(c);
    }

    spans
}

/// End (exclusive) of the bracketed region opening at byte `start`, or `None`
/// if the text ends first.
pub fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut stack = Vec::new();
    let mut state = ScanState::Outside;

    for (i, c) in text[start..].char_indices() {
        if state == ScanState::Outside {
            match c {
                '{' | '[' => stack.push(c),
                '}' | ']' => {
                    stack.pop();
                    if stack.is_empty() {
                        return Some(start + i + 1);
                    }
                }
                _ => {}
            }
        }
        state = state.next(c);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_tracks_escapes() {
        assert_eq!(final_state(r#""a\"b"#), ScanState::InString);
        assert_eq!(final_state(r#""a\"b""#), ScanState::Outside);
        assert_eq!(final_state(r#""a\"#), ScanState::Escaped);
    }

    #[test]
    fn test_close_unterminated_strings() {
        assert_eq!(
            close_unterminated_strings("{\"text\": \"line one\nline two"),
            "{\"text\": \"line one\\nline two\""
        );
        assert_eq!(close_unterminated_strings("{\"a\": \"x\\"), "{\"a\": \"x\"");
        assert_eq!(close_unterminated_strings("{\"a\": \"\u{1}\"}"), "{\"a\": \"\\u0001\"}");
        // newlines between tokens are left alone
        assert_eq!(close_unterminated_strings("{\n\"a\": 1\n}"), "{\n\"a\": 1\n}");
    }

    #[test]
    fn test_escape_interior_quotes() {
        let fixed = escape_interior_quotes(r#"{"text": "the "Lessee" shall pay", "entity_type": "TERM"}"#);
        assert_eq!(fixed, r#"{"text": "the \"Lessee\" shall pay", "entity_type": "TERM"}"#);
        let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["text"], "the \"Lessee\" shall pay");
    }

    #[test]
    fn test_escape_interior_quotes_leaves_valid_json() {
        let valid = r#"{"a": "x", "b": ["y", "z"], "c": {"d": "e"}}"#;
        assert_eq!(escape_interior_quotes(valid), valid);
    }

    #[test]
    fn test_structure_helpers() {
        assert_eq!(open_structures(r#"{"a": [{"b": "}"#), vec!['{', '[', '{']);
        assert_eq!(close_open_structures(r#"{"a": [1, 2"#), r#"{"a": [1, 2]}"#);
        assert_eq!(drop_unmatched_closers(r#"{"a": 1}}]"#), r#"{"a": 1}"#);
        assert_eq!(
            remove_trailing_commas(r#"{"a": [1, 2,], "b": ",}",}"#),
            r#"{"a": [1, 2], "b": ",}"}"#
        );
    }

    #[test]
    fn test_insert_missing_commas() {
        let text = "{\n\"a\": \"x\"\n\"b\": 2\n}";
        assert_eq!(insert_missing_commas(text), "{\n\"a\": \"x\",\n\"b\": 2\n}");
        let arr = "[\n{\"a\": 1}\n{\"a\": 2}\n]";
        assert_eq!(insert_missing_commas(arr), "[\n{\"a\": 1},\n{\"a\": 2}\n]");
    }

    #[test]
    fn test_balanced_spans() {
        let text = r#"pre {"a": "}"} mid {"b": {"c": 1}} post"#;
        let spans = balanced_object_spans(text);
        assert_eq!(spans.len(), 2);
        assert_eq!(&text[spans[1].0..spans[1].1], r#"{"b": {"c": 1}}"#);
        assert_eq!(balanced_end("[1, [2], 3] tail", 0), Some(11));
        assert_eq!(balanced_end("[1, [2", 0), None);
    }
}
