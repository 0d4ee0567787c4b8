//! Error-hint surface (spec §6).
//!
//! A pure function mapping `(error text, mode)` to one of a closed set of
//! hint strings, intended for consumption by a UI layer we don't implement.
//! On no match, returns nothing — callers should not treat the absence of a
//! hint as an error.

use crate::model::ExecutionMode;

/// Map an error's display text and the request's execution mode to a
/// user-facing hint, if we have one.
pub fn error_hint(error_text: &str, mode: ExecutionMode) -> Option<&'static str> {
    let lower = error_text.to_lowercase();

    if lower.contains("timed out") || lower.contains("timeout") {
        return Some(match mode {
            ExecutionMode::Local => {
                "The local model took too long to respond. Try a smaller model or raise the timeout."
            }
            ExecutionMode::Remote | ExecutionMode::Hybrid => {
                "The remote endpoint took too long to respond. Try again, or raise the timeout."
            }
        });
    }
    if lower.contains("connection error") || lower.contains("connection refused") {
        return Some(match mode {
            ExecutionMode::Local => {
                "Could not reach the local model server. Is it running?"
            }
            ExecutionMode::Remote | ExecutionMode::Hybrid => {
                "Could not reach the remote endpoint. Check your network and base URL."
            }
        });
    }
    if lower.contains("model not found") {
        return Some("The configured model id was not recognized. Check the model name, or set a fallback model.");
    }
    if lower.contains("unauthorized") {
        return Some("Authentication failed. Check your API key.");
    }
    if lower.contains("rate limited") {
        return Some("The provider is rate-limiting requests. Slow down or retry later.");
    }
    if lower.contains("did not return parseable json") || lower.contains("schema validation failed")
    {
        return Some("The model's response didn't match the expected format, even after a repair attempt. Try a different model.");
    }
    if lower.contains("quality gate failed") {
        return Some("The model's response leaked internal instructions or left placeholders unfilled.");
    }
    if lower.contains("cancelled") {
        return Some("The request was cancelled.");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_hint_varies_by_mode() {
        let local = error_hint("LLM request timed out after 5000ms", ExecutionMode::Local);
        let remote = error_hint("LLM request timed out after 5000ms", ExecutionMode::Remote);
        assert!(local.unwrap().contains("local model"));
        assert!(remote.unwrap().contains("remote endpoint"));
    }

    #[test]
    fn test_no_hint_for_unknown_error() {
        assert_eq!(error_hint("some totally novel failure", ExecutionMode::Remote), None);
    }
}
