//! Quality validator (spec §4.5).
//!
//! Hard-fail rules reject a candidate `improved_prompt` outright; soft
//! signals are recorded in metadata but never fail the call on their own.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;

/// The closed set of banned phrases (spec §4.5). Case-insensitive substring
/// match against the lowercased output.
pub const BANNED_PHRASES: &[&str] = &[
    "you are a prompt improver",
    "hard rules",
    "output rules",
    "as an ai",
    "as a language model",
    "do you want me to",
    "would you like me to",
    "clarifying_questions",
    "assumptions",
    "confidence",
];

/// The closed set of meta-line starters (spec §4.5). Matched against the
/// first non-whitespace line only, case-insensitive.
pub const META_LINE_STARTERS: &[&str] = &[
    "task:",
    "rules:",
    "guardrails:",
    "rewrite instruction:",
    "raw user request:",
];

static DOUBLE_BRACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^}]*\}\}").unwrap());
/// Matches `[IDENT]`. The "not preceded by `:`" exclusion from spec §6 is
/// checked separately at each match site, since the `regex` crate has no
/// lookbehind support.
static BRACKET_IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[A-Za-z_][A-Za-z0-9_]*\]").unwrap());
static ANGLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>]*>").unwrap());
/// A crude "looks like JSON" check for the content of an angle-bracket span:
/// only digits, quotes, braces/brackets, colons, commas and whitespace.
static JSON_LIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"^[\s"{}\[\]:,.\-0-9A-Za-z_]*$"#).unwrap());

/// Why a candidate failed the hard-fail gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardFailReason {
    MetaLineStart(String),
    BannedPhrase(String),
    UnfilledPlaceholder(String),
    TooShort { min_len: usize, actual_len: usize },
}

impl std::fmt::Display for HardFailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardFailReason::MetaLineStart(s) => {
                write!(f, "output begins with meta-line starter {s:?}")
            }
            HardFailReason::BannedPhrase(s) => write!(f, "output contains banned phrase {s:?}"),
            HardFailReason::UnfilledPlaceholder(s) => {
                write!(f, "output contains unfilled placeholder {s:?}")
            }
            HardFailReason::TooShort { min_len, actual_len } => write!(
                f,
                "output is {actual_len} characters after trim, shorter than the minimum {min_len}"
            ),
        }
    }
}

/// Soft signals recorded but not enforced.
#[derive(Debug, Clone, Default)]
pub struct SoftSignals {
    pub low_confidence: bool,
    pub too_many_questions: bool,
    pub too_many_assumptions: bool,
}

/// The outcome of validating a candidate.
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Pass(SoftSignals),
    HardFail(HardFailReason),
}

const MIN_PROMPT_LEN: usize = 5;

/// Validate a candidate `improved_prompt`, plus its accompanying
/// `clarifying_questions`/`assumptions`/`confidence`, against the hard-fail
/// rules and soft signals.
pub fn validate(
    improved_prompt: &str,
    clarifying_questions: &[String],
    assumptions: &[String],
    confidence: f64,
    config: &Config,
) -> ValidationOutcome {
    let trimmed = improved_prompt.trim();

    if trimmed.chars().count() < MIN_PROMPT_LEN {
        return ValidationOutcome::HardFail(HardFailReason::TooShort {
            min_len: MIN_PROMPT_LEN,
            actual_len: trimmed.chars().count(),
        });
    }

    if let Some(first_line) = trimmed.lines().next() {
        let lower_first_line = first_line.to_lowercase();
        for starter in config.all_meta_line_starters() {
            if lower_first_line.starts_with(starter.as_str()) {
                return ValidationOutcome::HardFail(HardFailReason::MetaLineStart(starter));
            }
        }
    }

    let lower_whole = trimmed.to_lowercase();
    for phrase in config.all_banned_phrases() {
        if lower_whole.contains(phrase.as_str()) {
            return ValidationOutcome::HardFail(HardFailReason::BannedPhrase(phrase));
        }
    }

    if let Some(m) = DOUBLE_BRACE_RE.find(trimmed) {
        return ValidationOutcome::HardFail(HardFailReason::UnfilledPlaceholder(
            m.as_str().to_owned(),
        ));
    }
    for m in BRACKET_IDENT_RE.find_iter(trimmed) {
        let preceded_by_colon = trimmed[..m.start()].ends_with(':');
        if preceded_by_colon {
            continue;
        }
        return ValidationOutcome::HardFail(HardFailReason::UnfilledPlaceholder(
            m.as_str().to_owned(),
        ));
    }
    for m in ANGLE_RE.find_iter(trimmed) {
        let inner = &m.as_str()[1..m.as_str().len() - 1];
        if !JSON_LIKE_RE.is_match(inner) {
            return ValidationOutcome::HardFail(HardFailReason::UnfilledPlaceholder(
                m.as_str().to_owned(),
            ));
        }
    }

    let signals = SoftSignals {
        low_confidence: confidence < config.min_confidence,
        too_many_questions: clarifying_questions.len() > config.max_questions,
        too_many_assumptions: assumptions.len() > config.max_assumptions,
    };

    ValidationOutcome::Pass(signals)
}

/// Build the repair prompt sent back to the model on a hard-fail (spec
/// §4.1's "one repair attempt" rule). Describes exactly what went wrong so
/// the model can self-correct without restating the whole task.
pub fn build_repair_prompt(reason: &HardFailReason, previous_output: &str) -> String {
    let truncated_previous = crate::util::truncate_for_display(previous_output, 2000);
    format!(
        "Your previous response did not satisfy the required output format: {reason}.\n\n\
         Previous response:\n{truncated_previous}\n\n\
         Respond again with corrected JSON matching the schema exactly. Do not include \
         any meta-commentary, placeholders, or the literal field names of the schema in \
         `improved_prompt`'s text.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    #[test]
    fn test_double_brace_placeholder_hard_fails() {
        let outcome = validate("Please do {{thing}} now.", &[], &[], 0.8, &config());
        assert!(matches!(
            outcome,
            ValidationOutcome::HardFail(HardFailReason::UnfilledPlaceholder(_))
        ));
    }

    #[test]
    fn test_json_like_angle_content_is_not_a_placeholder() {
        let outcome = validate(
            r#"Use this schema: {"x": []} and also <123, "a">."#,
            &[],
            &[],
            0.8,
            &config(),
        );
        assert!(matches!(outcome, ValidationOutcome::Pass(_)));
    }

    #[test]
    fn test_colon_prefixed_bracket_is_not_a_placeholder() {
        let outcome = validate("See the field named foo:[bar] below.", &[], &[], 0.8, &config());
        assert!(matches!(outcome, ValidationOutcome::Pass(_)));
    }

    #[test]
    fn test_bracket_ident_without_colon_hard_fails() {
        let outcome = validate("Fill in [NAME] before sending.", &[], &[], 0.8, &config());
        assert!(matches!(
            outcome,
            ValidationOutcome::HardFail(HardFailReason::UnfilledPlaceholder(_))
        ));
    }

    #[test]
    fn test_meta_line_starter_hard_fails() {
        let outcome = validate("Task: do the thing\nmore text", &[], &[], 0.8, &config());
        assert!(matches!(
            outcome,
            ValidationOutcome::HardFail(HardFailReason::MetaLineStart(_))
        ));
    }

    #[test]
    fn test_banned_phrase_hard_fails() {
        let outcome = validate("As an AI, I cannot help.", &[], &[], 0.8, &config());
        assert!(matches!(
            outcome,
            ValidationOutcome::HardFail(HardFailReason::BannedPhrase(_))
        ));
    }

    #[test]
    fn test_too_short_hard_fails() {
        let outcome = validate("hi", &[], &[], 0.8, &config());
        assert!(matches!(
            outcome,
            ValidationOutcome::HardFail(HardFailReason::TooShort { .. })
        ));
    }

    #[test]
    fn test_soft_signals_recorded_without_failing() {
        let mut cfg = config();
        cfg.min_confidence = 0.9;
        let outcome = validate("Write a clear and complete function.", &[], &[], 0.1, &cfg);
        match outcome {
            ValidationOutcome::Pass(signals) => assert!(signals.low_confidence),
            other => panic!("expected pass with soft signal, got {other:?}"),
        }
    }
}
