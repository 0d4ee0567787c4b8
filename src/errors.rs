//! Our error taxonomy.
//!
//! The spec calls for "a single result-or-error sum type at every boundary"
//! (see `DESIGN.md`'s grounding for this module). [`PipelineError`] is that
//! type: every fallible public operation in this crate returns
//! `Result<T, PipelineError>`, never a bare string or a sentinel value.
//! `anyhow::Error` is still used internally (as the teacher uses it
//! throughout `prompt-scaler`) for `.context()`-style plumbing that never
//! crosses a public boundary.

use std::fmt;

use thiserror::Error;

/// Diagnostic metadata attached to most pipeline errors, per spec §7.
#[derive(Debug, Clone, Default)]
pub struct ErrorMeta {
    pub attempt: u8,
    pub used_repair: bool,
    pub used_extraction: bool,
    pub latency_ms: u64,
    pub extraction_method: Option<String>,
    pub validator_error: Option<String>,
}

/// Every error kind the pipeline can surface to a caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The idea was empty or shorter than the minimum length after trimming.
    #[error("idea must be at least {min_len} characters after trimming, got {actual_len}")]
    InputTooShort { min_len: usize, actual_len: usize },

    /// The LLM call did not complete within its deadline.
    #[error("LLM request timed out after {0}ms")]
    Timeout(u64),

    /// The transport could not reach the LLM endpoint.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The model id was not recognized by the provider.
    #[error("model not found: {model}")]
    ModelNotFound { model: String, meta: ErrorMeta },

    /// Schema validation failed after the repair attempt (or repair was
    /// disabled).
    #[error("schema validation failed: {reason}")]
    SchemaError { reason: String, meta: ErrorMeta },

    /// No JSON could be extracted from the model's response body, even after
    /// the repair attempt.
    #[error("model did not return parseable JSON")]
    NonJsonOutput { meta: ErrorMeta },

    /// The candidate output failed the quality gate on the final attempt.
    #[error("quality gate failed: {rule}")]
    QualityGateFailure { rule: String, meta: ErrorMeta },

    /// Authentication failed.
    #[error("unauthorized")]
    Unauthorized,

    /// The provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// The request was cancelled by the caller.
    #[error("cancelled")]
    Cancelled,

    /// A programmer error. The identifier is stable and safe to log; the
    /// message text is never derived from user or model content.
    #[error("internal error ({id})")]
    Internal { id: &'static str },
}

impl PipelineError {
    /// Is this one of the "fallback-worthy" errors named in spec §4.1 — i.e.
    /// should the engine retry the whole call against a fallback model, if
    /// one is configured?
    pub fn is_fallback_worthy(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelNotFound { .. }
                | PipelineError::NonJsonOutput { .. }
                | PipelineError::SchemaError { .. }
                | PipelineError::QualityGateFailure { .. }
        )
    }

    /// A stable kind name, used for logging and for the error-hint surface.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PipelineError::InputTooShort { .. } => "input_too_short",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::ConnectionError(_) => "connection_error",
            PipelineError::ModelNotFound { .. } => "model_not_found",
            PipelineError::SchemaError { .. } => "schema_error",
            PipelineError::NonJsonOutput { .. } => "non_json_output",
            PipelineError::QualityGateFailure { .. } => "quality_gate_failure",
            PipelineError::Unauthorized => "unauthorized",
            PipelineError::RateLimited => "rate_limited",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for ErrorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt={} used_repair={} used_extraction={} latency_ms={}",
            self.attempt, self.used_repair, self.used_extraction, self.latency_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_worthy() {
        assert!(
            PipelineError::ModelNotFound {
                model: "m".into(),
                meta: ErrorMeta::default()
            }
            .is_fallback_worthy()
        );
        assert!(!PipelineError::Timeout(1000).is_fallback_worthy());
        assert!(!PipelineError::RateLimited.is_fallback_worthy());
    }

    #[test]
    fn test_cancelled_is_distinct_kind() {
        assert_eq!(PipelineError::Cancelled.kind_name(), "cancelled");
    }
}
