//! Optimizers (spec §4.7): intent-conditioned strategies for turning an
//! assembled prompt into a validated [`crate::model::ImprovementResult`].
//!
//! Two independent strategies, selected by intent, with no shared base
//! class — exactly as spec §9's Design Notes call for ("two strategies
//! selected by intent. Both are bounded in iterations").

pub mod opro;
pub mod reflexion;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    assembler::AssembledPrompt,
    config::Config,
    errors::{ErrorMeta, PipelineError},
    llm::LlmTransport,
    model::ImprovementResult,
    quality::{self, ValidationOutcome},
};

/// A bounded-iteration strategy for producing an [`ImprovementResult`] from
/// an assembled prompt.
#[async_trait]
pub trait Optimizer: Send + Sync {
    async fn optimize(
        &self,
        transport: &dyn LlmTransport,
        prompt: &AssembledPrompt,
        model: &str,
        fallback_model: Option<&str>,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<ImprovementResult, PipelineError>;
}

/// The identity/no-LLM fallback mode (spec §4.7's last paragraph): used only
/// as a last resort when no LLM is available or optimization is disabled.
/// Returns the plain assembled request — never the few-shot/RaR/schema-contract
/// scaffolding in [`AssembledPrompt::user`] — as the `improved_prompt`, with
/// confidence set from whatever the caller already analyzed.
pub struct IdentityOptimizer {
    pub analysis_confidence: f64,
}

#[async_trait]
impl Optimizer for IdentityOptimizer {
    async fn optimize(
        &self,
        _transport: &dyn LlmTransport,
        prompt: &AssembledPrompt,
        _model: &str,
        _fallback_model: Option<&str>,
        config: &Config,
        _cancel: &CancellationToken,
    ) -> Result<ImprovementResult, PipelineError> {
        let confidence = self.analysis_confidence.clamp(0.0, 1.0);

        // No LLM call means no repair attempt is possible: a hard-fail here
        // is fatal immediately, same as attempt 2 of the repair loop
        // (spec §4.1).
        match quality::validate(&prompt.request_only, &[], &[], confidence, config) {
            ValidationOutcome::Pass(_) => Ok(ImprovementResult {
                improved_prompt: prompt.request_only.clone(),
                clarifying_questions: Vec::new(),
                assumptions: Vec::new(),
                confidence,
                metadata: Some(crate::model::ResultMetadata {
                    backend: "identity".to_owned(),
                    used_extraction: false,
                    used_repair: false,
                    attempt: 1,
                    extraction_method: None,
                    latency_ms: 0,
                }),
            }),
            ValidationOutcome::HardFail(reason) => Err(PipelineError::QualityGateFailure {
                rule: reason.to_string(),
                meta: ErrorMeta {
                    attempt: 1,
                    used_repair: false,
                    used_extraction: false,
                    latency_ms: 0,
                    extraction_method: None,
                    validator_error: None,
                },
            }),
        }
    }
}

/// A deterministic score in `[0, 1]` used by both optimizers to rank
/// candidates (spec §4.7's OPRO scoring rule; Reflexion reuses the
/// validator-pass/confidence half of it).
pub(crate) fn score_candidate(
    passed_validator: bool,
    confidence: f64,
    has_labeled_sections: bool,
    few_shot_adherence: bool,
) -> f64 {
    let base = if passed_validator { 1.0 } else { 0.0 };
    let confidence_term = confidence.clamp(0.0, 1.0) * 0.3;
    let structural_bonus = if has_labeled_sections { 0.1 } else { 0.0 };
    let adherence_bonus = if few_shot_adherence { 0.1 } else { 0.0 };
    (base * 0.5 + confidence_term + structural_bonus + adherence_bonus).min(1.0)
}

/// Does `text` contain at least one Markdown-style labeled section header?
pub(crate) fn has_labeled_sections(text: &str) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with('#') || trimmed.ends_with(':') && trimmed.len() > 1
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_caps_at_one() {
        let score = score_candidate(true, 1.0, true, true);
        assert!(score <= 1.0);
    }

    #[test]
    fn test_failed_validator_scores_lower() {
        let passed = score_candidate(true, 0.8, false, false);
        let failed = score_candidate(false, 0.8, false, false);
        assert!(passed > failed);
    }

    #[tokio::test]
    async fn test_identity_optimizer_never_emits_schema_scaffolding() {
        use crate::{assembler::PromptAssembler, llm::echo::EchoTransport, model::Intent};

        let assembler = PromptAssembler::new();
        let assembled = assembler.assemble(
            "write a function to reverse a string",
            None,
            Intent::Generate,
            crate::model::Complexity::Simple,
            &[],
        );

        let optimizer = IdentityOptimizer { analysis_confidence: 0.5 };
        let transport = EchoTransport::default();
        let result = optimizer
            .optimize(&transport, &assembled, "m", None, &Config::default(), &CancellationToken::new())
            .await
            .unwrap();

        for banned in crate::quality::BANNED_PHRASES {
            assert!(
                !result.improved_prompt.to_lowercase().contains(banned),
                "identity result leaked banned phrase {banned:?}: {}",
                result.improved_prompt
            );
        }
    }
}
