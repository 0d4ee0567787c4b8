//! JSON extraction cascade (spec §4.1: "the model's response may not be
//! bare JSON").
//!
//! Four stages, tried in order, the first to succeed wins:
//! 1. Strict: the whole trimmed body parses as JSON.
//! 2. Fenced: a ```json ... ``` (or bare ``` ... ```) code block.
//! 3. Tagged: a `<json>...</json>` block.
//! 4. Balanced: the first balanced `{...}` span, honoring string escapes and
//!    quoted braces.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Strict,
    FencedBlock,
    TaggedBlock,
    BalancedBrace,
}

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());
static TAGGED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<json>\s*(\{.*?\})\s*</json>").unwrap());

/// Attempt to extract a JSON object from `text`, trying each stage in turn.
pub fn extract_json(text: &str) -> Option<(Value, ExtractionMethod)> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some((value, ExtractionMethod::Strict));
    }

    if let Some(captures) = FENCED_RE.captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[1]) {
            return Some((value, ExtractionMethod::FencedBlock));
        }
    }

    if let Some(captures) = TAGGED_RE.captures(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(&captures[1]) {
            return Some((value, ExtractionMethod::TaggedBlock));
        }
    }

    if let Some(span) = first_balanced_brace_span(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Some((value, ExtractionMethod::BalancedBrace));
        }
    }

    None
}

/// Scan `text` for the first top-level balanced `{...}` span, honoring
/// double-quoted strings (including escaped quotes within them) so that a
/// brace character inside a string literal doesn't throw off the count.
fn first_balanced_brace_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse() {
        let (_, method) = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(method, ExtractionMethod::Strict);
    }

    #[test]
    fn test_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks!";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::FencedBlock);
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_tagged_block() {
        let text = "preamble <json>{\"a\": 2}</json> postamble";
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::TaggedBlock);
        assert_eq!(value["a"], 2);
    }

    #[test]
    fn test_balanced_brace_scan_ignores_braces_in_strings() {
        let text = r#"Here is the JSON: {"improved_prompt": "use a { in text }", "confidence": 0.5} trailing"#;
        let (value, method) = extract_json(text).unwrap();
        assert_eq!(method, ExtractionMethod::BalancedBrace);
        assert_eq!(value["improved_prompt"], "use a { in text }");
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json("I cannot produce JSON right now.").is_none());
    }
}
