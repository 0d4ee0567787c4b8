//! Reflexion optimizer (spec §4.7): used for DEBUG intent, max 2 iterations.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    assembler::AssembledPrompt,
    config::Config,
    errors::PipelineError,
    llm::{self, ChatCall, LlmTransport},
    model::ImprovementResult,
};

use super::{Optimizer, has_labeled_sections, score_candidate};

/// Reflexion performs at most this many generation calls per request: one
/// initial attempt, plus one reflection-and-retry.
pub const MAX_ITERATIONS: u8 = 2;

pub struct ReflexionOptimizer {
    /// The error symptom the candidate is expected to mention verbatim
    /// (e.g. an exception name), if one was extracted from the idea.
    pub error_symptom: Option<String>,
}

#[async_trait]
impl Optimizer for ReflexionOptimizer {
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

        let call = ChatCall {
            system: prompt.system.clone(),
            user: prompt.user.clone(),
            schema: schema.clone(),
            model: model.to_owned(),
            timeout_ms: config.timeout_ms,
            temperature: config.temperature,
        };

        let first_result = llm::generate(transport, call, fallback_model, config, cancel).await?;

        if self.passes(&first_result) {
            return Ok(first_result);
        }

        let diagnosis = self.diagnose(&first_result);
        let iteration2_user = format!(
            "{}\n\nYour previous attempt:\n{}\n\nDiagnosis: {diagnosis}\n\nProduce an improved attempt that addresses the diagnosis.",
            prompt.user, first_result.improved_prompt,
        );
        let second_call = ChatCall {
            system: prompt.system.clone(),
            user: iteration2_user,
            schema,
            model: model.to_owned(),
            timeout_ms: config.timeout_ms,
            temperature: config.temperature,
        };

        let second_result = match llm::generate(transport, second_call, fallback_model, config, cancel).await {
            Ok(result) => Some(result),
            Err(_) => None,
        };

        Ok(self.better_of(first_result, second_result))
    }
}

impl ReflexionOptimizer {
    fn passes(&self, result: &ImprovementResult) -> bool {
        let mentions_symptom = match &self.error_symptom {
            Some(symptom) => result.improved_prompt.contains(symptom.as_str()),
            None => true,
        };
        mentions_symptom && result.confidence >= 0.5
    }

    fn diagnose(&self, result: &ImprovementResult) -> String {
        if let Some(symptom) = &self.error_symptom {
            if !result.improved_prompt.contains(symptom.as_str()) {
                return format!(
                    "the candidate does not mention the reported error symptom \"{symptom}\" verbatim"
                );
            }
        }
        "the candidate's self-reported confidence was too low".to_owned()
    }

    fn better_of(
        &self,
        first: ImprovementResult,
        second: Option<ImprovementResult>,
    ) -> ImprovementResult {
        let Some(second) = second else { return first };

        let first_score = score_candidate(
            self.passes(&first),
            first.confidence,
            has_labeled_sections(&first.improved_prompt),
            false,
        );
        let second_score = score_candidate(
            self.passes(&second),
            second.confidence,
            has_labeled_sections(&second.improved_prompt),
            false,
        );

        if second_score > first_score { second } else { first }
    }
}

fn result_schema() -> serde_json::Value {
    let schema = schemars::schema_for!(ImprovementResult);
    serde_json::to_value(schema).expect("ImprovementResult schema is always serializable")
}
