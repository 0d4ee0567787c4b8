//! Intent classification (spec §4.2).
//!
//! A rule-based classifier: each intent has a closed set of signal phrases,
//! and we count votes. Ties are broken by a fixed precedence order —
//! debug > refactor > generate > explain — because a debugging request that
//! also mentions refactoring is still, first and foremost, a debugging
//! request.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::Intent;

struct IntentRule {
    intent: Intent,
    patterns: &'static [&'static str],
}

const RULES: &[IntentRule] = &[
    IntentRule {
        intent: Intent::Debug,
        patterns: &[
            "bug", "error", "crash", "fails", "failing", "fix", "broken", "exception",
            "stack trace", "doesn't work", "not working", "unexpected", "regression",
        ],
    },
    IntentRule {
        intent: Intent::Refactor,
        patterns: &[
            "refactor", "clean up", "cleanup", "simplify", "reorganize", "restructure",
            "extract", "rename", "improve readability", "technical debt", "tidy",
        ],
    },
    IntentRule {
        intent: Intent::Generate,
        patterns: &[
            "write", "create", "build", "implement", "generate", "add a", "add an",
            "new feature", "scaffold", "set up", "make a", "make an",
        ],
    },
    IntentRule {
        intent: Intent::Explain,
        patterns: &[
            "explain", "what does", "how does", "what is", "understand", "walk me through",
            "document", "describe",
        ],
    },
];

/// Precedence used to break ties between intents with equal vote counts.
fn precedence(intent: Intent) -> u8 {
    match intent {
        Intent::Debug => 0,
        Intent::Refactor => 1,
        Intent::Generate => 2,
        Intent::Explain => 3,
    }
}

static COMPILED: Lazy<Vec<(Intent, Vec<Regex>)>> = Lazy::new(|| {
    RULES
        .iter()
        .map(|rule| {
            let patterns = rule
                .patterns
                .iter()
                .map(|p| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(p))).unwrap())
                .collect();
            (rule.intent, patterns)
        })
        .collect()
});

/// The result of classifying a piece of text for intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
}

/// Classify the combined idea+context text into an [`Intent`].
///
/// Confidence is the winning intent's vote count divided by the total number
/// of votes cast across all intents; if no signal matches at all, we default
/// to [`Intent::Explain`] at confidence 0.5, per spec §4.2's precedence
/// cascade ("4. Else EXPLAIN").
pub fn classify_intent(text: &str) -> IntentClassification {
    let mut votes: Vec<(Intent, usize)> = COMPILED
        .iter()
        .map(|(intent, patterns)| {
            let count = patterns.iter().filter(|re| re.is_match(text)).count();
            (*intent, count)
        })
        .collect();

    let total_votes: usize = votes.iter().map(|(_, c)| c).sum();
    if total_votes == 0 {
        return IntentClassification {
            intent: Intent::Explain,
            confidence: 0.5,
        };
    }

    votes.sort_by(|(a_intent, a_count), (b_intent, b_count)| {
        b_count
            .cmp(a_count)
            .then_with(|| precedence(*a_intent).cmp(&precedence(*b_intent)))
    });

    let (winner, winner_count) = votes[0];
    IntentClassification {
        intent: winner,
        confidence: winner_count as f64 / total_votes as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bug_fix_is_debug() {
        let result = classify_intent("my app crashes with a stack trace on startup");
        assert_eq!(result.intent, Intent::Debug);
    }

    #[test]
    fn test_refactor_beats_nothing_else() {
        let result = classify_intent("please clean up this module and simplify the logic");
        assert_eq!(result.intent, Intent::Refactor);
    }

    #[test]
    fn test_tie_breaks_toward_debug() {
        // "fix" (debug) and "refactor" (refactor) both match once: debug wins.
        let result = classify_intent("fix and refactor this function");
        assert_eq!(result.intent, Intent::Debug);
    }

    #[test]
    fn test_no_signal_defaults_to_explain() {
        let result = classify_intent("something something nonsense words");
        assert_eq!(result.intent, Intent::Explain);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_explain_matches() {
        let result = classify_intent("explain what this does and how it works");
        assert_eq!(result.intent, Intent::Explain);
    }
}
