//! Complexity analysis (spec §4.3).
//!
//! Two signals feed the verdict: raw token count, and the number of distinct
//! multi-requirement connectors ("and", "also", "then", numbered lists, …).
//! Either signal alone can push the verdict up a level; both together push it
//! to [`Complexity::Complex`].

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Complexity;

const SIMPLE_TOKEN_CEILING: usize = 15;
const MODERATE_TOKEN_CEILING: usize = 30;

static CONNECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(and|also|then|additionally|as well as|plus|after that)\b|(?m)^\s*\d+[.)]|,").unwrap()
});

/// The result of analyzing a piece of text for complexity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplexityAnalysis {
    pub level: Complexity,
    pub confidence: f64,
    pub signals_matched: u8,
}

/// Analyze the combined idea+context text for complexity, per spec §4.3's
/// thresholds: SIMPLE requires both a short token count *and* no
/// multi-requirement connector; COMPLEX is triggered by *either* a long
/// token count *or* two-or-more distinct connectors; everything else is
/// MODERATE.
pub fn analyze_complexity(text: &str) -> ComplexityAnalysis {
    let token_count = text.split_whitespace().count();
    let connector_count = CONNECTOR_RE.find_iter(text).count();

    let level = if token_count > MODERATE_TOKEN_CEILING || connector_count >= 2 {
        Complexity::Complex
    } else if token_count <= SIMPLE_TOKEN_CEILING && connector_count == 0 {
        Complexity::Simple
    } else {
        Complexity::Moderate
    };

    let signals_matched = (token_count > SIMPLE_TOKEN_CEILING) as u8 + (connector_count > 0) as u8;

    // Confidence is highest when token count and connector count agree on
    // the verdict; lower when only one signal pushed it there.
    let token_says_complex = token_count > MODERATE_TOKEN_CEILING;
    let connector_says_complex = connector_count >= 2;
    let confidence = match level {
        Complexity::Complex if token_says_complex && connector_says_complex => 0.9,
        Complexity::Simple if connector_count == 0 && token_count <= SIMPLE_TOKEN_CEILING / 2 => 0.9,
        _ if signals_matched <= 1 => 0.6,
        _ => 0.75,
    };

    ComplexityAnalysis {
        level,
        confidence,
        signals_matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_idea_is_simple() {
        let result = analyze_complexity("fix the typo");
        assert_eq!(result.level, Complexity::Simple);
    }

    #[test]
    fn test_many_connectors_push_complex() {
        let result = analyze_complexity(
            "build a login form and also add validation and then wire it to the api and finally write tests",
        );
        assert_eq!(result.level, Complexity::Complex);
    }

    #[test]
    fn test_comma_delimited_requirements_count_as_connectors() {
        let result = analyze_complexity("add logging, add retries, add metrics");
        assert_eq!(result.level, Complexity::Complex);
    }

    #[test]
    fn test_numbered_list_counts_as_connector() {
        let result = analyze_complexity("do this:\n1. one thing\n2. another thing\n3. a third thing");
        assert!(result.signals_matched >= 1);
    }

    #[test]
    fn test_long_text_without_connectors_is_still_escalated_by_length() {
        let long_text = "word ".repeat(50);
        let result = analyze_complexity(&long_text);
        assert_eq!(result.level, Complexity::Complex);
    }
}
