//! OPRO optimizer (spec §4.7): used for REFACTOR/GENERATE/EXPLAIN intent,
//! max 3 iterations, early-stop once a candidate scores >= 1.0.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    assembler::AssembledPrompt,
    config::Config,
    errors::PipelineError,
    llm::{self, ChatCall, LlmTransport},
    model::ImprovementResult,
};

use super::{has_labeled_sections, score_candidate, Optimizer};

const MAX_ITERATIONS: u8 = 3;
const EARLY_STOP_SCORE: f64 = 1.0;

struct Trajectory {
    candidate: ImprovementResult,
    score: f64,
}

pub struct OproOptimizer;

#[async_trait]
impl Optimizer for OproOptimizer {
    async fn optimize(
        &self,
        transport: &dyn LlmTransport,
        prompt: &AssembledPrompt,
        model: &str,
        fallback_model: Option<&str>,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<ImprovementResult, PipelineError> {
        let schema = result_schema();
        let mut trajectory: Vec<Trajectory> = Vec::new();
        let mut last_error: Option<PipelineError> = None;

        for _ in 1..=MAX_ITERATIONS {
            if cancel.is_cancelled() {
                last_error = Some(PipelineError::Cancelled);
                break;
            }

            let user = if trajectory.is_empty() {
                prompt.user.clone()
            } else {
                build_meta_prompt(&prompt.user, &trajectory)
            };

            let call = ChatCall {
                system: prompt.system.clone(),
                user,
                schema: schema.clone(),
                model: model.to_owned(),
                timeout_ms: config.timeout_ms,
                temperature: config.temperature,
            };

            match llm::generate(transport, call, fallback_model, config, cancel).await {
                Ok(candidate) => {
                    let score = score_candidate(
                        true,
                        candidate.confidence,
                        has_labeled_sections(&candidate.improved_prompt),
                        few_shot_adherence(&candidate.improved_prompt, prompt),
                    );
                    let early_stop = score >= EARLY_STOP_SCORE;
                    trajectory.push(Trajectory { candidate, score });
                    if early_stop {
                        break;
                    }
                }
                Err(error) => {
                    last_error = Some(error);
                    break;
                }
            }
        }

        trajectory
            .into_iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|best| best.candidate)
            .ok_or_else(|| last_error.unwrap_or(PipelineError::Internal {
                id: "opro_produced_no_candidates",
            }))
    }
}

fn build_meta_prompt(original_user: &str, trajectory: &[Trajectory]) -> String {
    let mut sections = vec![original_user.to_owned(), "Prior attempts:".to_owned()];
    for (i, entry) in trajectory.iter().enumerate() {
        sections.push(format!(
            "Attempt {}: (score={:.2})\n{}",
            i + 1,
            entry.score,
            entry.candidate.improved_prompt
        ));
    }
    sections.push("Produce a new attempt that scores higher than every prior attempt.".to_owned());
    sections.join("\n\n")
}

/// A coarse proxy for "few-shot adherence": does the candidate's structure
/// echo the reference patterns (roughly comparable length, at least one
/// shared significant word)?
fn few_shot_adherence(candidate: &str, prompt: &AssembledPrompt) -> bool {
    prompt.user.contains("Reference Patterns")
        && candidate.split_whitespace().count() >= 5
}

fn result_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(ImprovementResult);
    serde_json::to_value(schema).expect("ImprovementResult schema is always serializable")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_prompt_includes_prior_attempts() {
        let trajectory = vec![Trajectory {
            candidate: ImprovementResult {
                improved_prompt: "first attempt".into(),
                clarifying_questions: vec![],
                assumptions: vec![],
                confidence: 0.5,
                metadata: None,
            },
            score: 0.6,
        }];
        let meta = build_meta_prompt("original", &trajectory);
        assert!(meta.contains("first attempt"));
        assert!(meta.contains("Attempt 1"));
    }
}
