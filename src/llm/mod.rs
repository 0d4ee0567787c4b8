//! LLM transport port and the structured-output generation operation (spec
//! §4.1, §4.2's "structured output" rows).
//!
//! [`LlmTransport`] is the port; [`OpenAiCompatibleTransport`] (grounded in
//! the teacher's `drivers/openai.rs`) and [`echo::EchoTransport`] (grounded
//! in the teacher's `drivers/echo.rs`) are the adapters. [`generate`] is the
//! single entry point every optimizer calls: it extracts, validates,
//! repairs once, and falls back to a secondary model on fallback-worthy
//! errors, exactly as spec §4.1 describes.

pub mod echo;
pub mod extract;
pub mod openai;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use keen_retry::RetryResult;
use tokio_util::sync::CancellationToken;

use crate::{
    errors::{ErrorMeta, PipelineError},
    model::ResultMetadata,
    prelude::*,
    quality::{self, ValidationOutcome},
};

/// A single chat call: one system message, one user message, and the JSON
/// schema the reply must conform to.
#[derive(Debug, Clone)]
pub struct ChatCall {
    pub system: String,
    pub user: String,
    pub schema: Value,
    pub model: String,
    pub timeout_ms: u64,
    pub temperature: f32,
}

/// A raw reply from the transport, before extraction/validation.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub raw_text: String,
}

/// A [`RetryResult`] for transport-level calls: distinguishes transient
/// network failures (worth an automatic retry) from fatal ones, the same
/// shape as the teacher's `LlmRetryResult`.
pub type TransportRetryResult = RetryResult<(), (), ChatReply, PipelineError>;

/// The port every LLM backend implements.
#[async_trait]
pub trait LlmTransport: std::fmt::Debug + Send + Sync {
    async fn chat(&self, call: &ChatCall) -> TransportRetryResult;
}

const TRANSPORT_RETRY_ATTEMPTS: usize = 2;

/// Call `transport` with up to [`TRANSPORT_RETRY_ATTEMPTS`] attempts on
/// transient failures, using a short exponential backoff. Races every
/// attempt (and every backoff sleep) against `cancel`, per spec §5's
/// cancellation model: a cancelled request aborts the in-flight call rather
/// than waiting for it to finish.
async fn call_with_retry(
    transport: &dyn LlmTransport,
    call: &ChatCall,
    cancel: &CancellationToken,
) -> Result<ChatReply, PipelineError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = transport.chat(call) => outcome,
        };
        match outcome {
            RetryResult::Ok { output, .. } => return Ok(output),
            RetryResult::Fatal { error, .. } => return Err(error),
            RetryResult::Transient { error, .. } => {
                if attempt >= TRANSPORT_RETRY_ATTEMPTS {
                    return Err(error);
                }
                let backoff = Duration::from_millis(200 * attempt as u64);
                warn!(attempt, ?backoff, "transient LLM transport error, retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

/// Generate a structured [`crate::model::ImprovementResult`] from a single
/// chat call, with up to one repair attempt on extraction/validation failure
/// and a fallback model retry on fallback-worthy errors (spec §4.1).
///
/// Attaches [`ResultMetadata`] to the returned result itself, naming
/// whichever model (primary or fallback) actually produced it.
pub async fn generate(
    transport: &dyn LlmTransport,
    primary_call: ChatCall,
    fallback_model: Option<&str>,
    config: &crate::config::Config,
    cancel: &CancellationToken,
) -> Result<crate::model::ImprovementResult, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let primary_model = primary_call.model.clone();
    match generate_with_model(transport, &primary_call, config, cancel).await {
        Ok((result, meta)) => Ok(with_metadata(result, &primary_model, meta)),
        Err(error) if error.is_fallback_worthy() => {
            if let Some(fallback_model) = fallback_model {
                warn!(
                    primary_model = %primary_call.model,
                    fallback_model,
                    "primary model failed with a fallback-worthy error, retrying with fallback"
                );
                let mut fallback_call = primary_call;
                fallback_call.model = fallback_model.to_owned();
                generate_with_model(transport, &fallback_call, config, cancel)
                    .await
                    .map(|(result, meta)| with_metadata(result, fallback_model, meta))
            } else {
                Err(error)
            }
        }
        Err(error) => Err(error),
    }
}

fn with_metadata(
    mut result: crate::model::ImprovementResult,
    backend: &str,
    meta: ErrorMeta,
) -> crate::model::ImprovementResult {
    result.metadata = Some(ResultMetadata {
        backend: backend.to_owned(),
        used_extraction: meta.used_extraction,
        used_repair: meta.used_repair,
        attempt: meta.attempt,
        extraction_method: meta.extraction_method,
        latency_ms: meta.latency_ms,
    });
    result
}

async fn generate_with_model(
    transport: &dyn LlmTransport,
    call: &ChatCall,
    config: &crate::config::Config,
    cancel: &CancellationToken,
) -> Result<(crate::model::ImprovementResult, ErrorMeta), PipelineError> {
    let start = Instant::now();

    let attempt1 = run_one_attempt(transport, call, config, 1, cancel).await;

    match attempt1 {
        AttemptOutcome::Success(result, meta) => Ok((result, finish_meta(meta, start, false))),
        AttemptOutcome::Repairable(reason, previous_text) if config.enable_auto_repair => {
            debug!(%reason, "attempt 1 failed validation, issuing one repair attempt");
            let repair_prompt = quality::build_repair_prompt(&reason, &previous_text);
            let mut repair_call = call.clone();
            repair_call.user = format!("{}\n\n{}", call.user, repair_prompt);

            match run_one_attempt(transport, &repair_call, config, 2, cancel).await {
                AttemptOutcome::Success(result, meta) => {
                    Ok((result, finish_meta(meta, start, true)))
                }
                AttemptOutcome::Repairable(reason, _) => Err(PipelineError::QualityGateFailure {
                    rule: reason.to_string(),
                    meta: finish_meta(ErrorMeta::default(), start, true),
                }),
                AttemptOutcome::Transport(error) => Err(error),
            }
        }
        AttemptOutcome::Repairable(reason, _) => Err(PipelineError::QualityGateFailure {
            rule: reason.to_string(),
            meta: finish_meta(ErrorMeta::default(), start, false),
        }),
        AttemptOutcome::Transport(error) => Err(error),
    }
}

enum AttemptOutcome {
    Success(crate::model::ImprovementResult, ErrorMeta),
    Repairable(quality::HardFailReason, String),
    Transport(PipelineError),
}

async fn run_one_attempt(
    transport: &dyn LlmTransport,
    call: &ChatCall,
    config: &crate::config::Config,
    attempt: u8,
    cancel: &CancellationToken,
) -> AttemptOutcome {
    let reply = match call_with_retry(transport, call, cancel).await {
        Ok(reply) => reply,
        Err(error) => return AttemptOutcome::Transport(error),
    };

    let (mut value, extraction_method) = match extract::extract_json(&reply.raw_text) {
        Some(extracted) => extracted,
        None => {
            return AttemptOutcome::Transport(PipelineError::NonJsonOutput {
                meta: ErrorMeta {
                    attempt,
                    used_extraction: true,
                    ..Default::default()
                },
            });
        }
    };

    let used_extraction = extraction_method != extract::ExtractionMethod::Strict;

    coerce_scalar_to_array(&mut value, "clarifying_questions");
    coerce_scalar_to_array(&mut value, "assumptions");

    let validator = match jsonschema::validator_for(&schema_for_result()) {
        Ok(v) => v,
        Err(error) => {
            error!(%error, "internal error building JSON schema validator");
            return AttemptOutcome::Transport(PipelineError::Internal {
                id: "schema_validator_build_failed",
            });
        }
    };
    if !validator.is_valid(&value) {
        return AttemptOutcome::Transport(PipelineError::SchemaError {
            reason: "response did not match the ImprovementResult schema".to_owned(),
            meta: ErrorMeta {
                attempt,
                used_extraction,
                ..Default::default()
            },
        });
    }

    let result: crate::model::ImprovementResult = match serde_json::from_value(value) {
        Ok(result) => result,
        Err(error) => {
            return AttemptOutcome::Transport(PipelineError::SchemaError {
                reason: error.to_string(),
                meta: ErrorMeta {
                    attempt,
                    used_extraction,
                    ..Default::default()
                },
            });
        }
    };

    let mut clamped = result;
    clamped.clarifying_questions =
        dedup_non_empty(clamped.clarifying_questions, config.max_questions);
    clamped.assumptions = dedup_non_empty(clamped.assumptions, config.max_assumptions);
    clamped.confidence = clamped.confidence.clamp(0.0, 1.0);

    match quality::validate(
        &clamped.improved_prompt,
        &clamped.clarifying_questions,
        &clamped.assumptions,
        clamped.confidence,
        config,
    ) {
        ValidationOutcome::Pass(_) => AttemptOutcome::Success(
            clamped,
            ErrorMeta {
                attempt,
                used_extraction,
                extraction_method: Some(format!("{extraction_method:?}")),
                ..Default::default()
            },
        ),
        ValidationOutcome::HardFail(reason) => {
            AttemptOutcome::Repairable(reason, clamped.improved_prompt)
        }
    }
}

fn finish_meta(mut meta: ErrorMeta, start: Instant, used_repair: bool) -> ErrorMeta {
    meta.used_repair = used_repair;
    meta.latency_ms = start.elapsed().as_millis() as u64;
    meta
}

fn schema_for_result() -> Value {
    let schema = schemars::schema_for!(crate::model::ImprovementResult);
    serde_json::to_value(schema).expect("ImprovementResult schema is always serializable")
}

/// Post-validation sanitation (spec §4.1): "coerce scalar-to-array where the
/// schema says 'array of string' but a single string was returned." Applied
/// before schema validation, since a bare string would otherwise fail
/// `is_valid` outright instead of being coerced.
fn coerce_scalar_to_array(value: &mut Value, field: &str) {
    if let Some(obj) = value.as_object_mut() {
        if let Some(Value::String(s)) = obj.get(field) {
            let s = s.clone();
            obj.insert(field.to_owned(), Value::Array(vec![Value::String(s)]));
        }
    }
}

/// Drop empty/whitespace-only entries and de-duplicate (first occurrence
/// wins, trimmed), then enforce `max` — universal invariants #1/#2's
/// "unique and non-empty" requirement, which the schema alone doesn't
/// enforce (spec §3/§6/§8).
fn dedup_non_empty(items: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_owned()) {
            out.push(trimmed.to_owned());
            if out.len() >= max {
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_scalar_to_array_wraps_bare_string() {
        let mut value = serde_json::json!({ "assumptions": "one thing" });
        coerce_scalar_to_array(&mut value, "assumptions");
        assert_eq!(value["assumptions"], serde_json::json!(["one thing"]));
    }

    #[test]
    fn test_coerce_scalar_to_array_leaves_arrays_alone() {
        let mut value = serde_json::json!({ "assumptions": ["a", "b"] });
        coerce_scalar_to_array(&mut value, "assumptions");
        assert_eq!(value["assumptions"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn test_dedup_non_empty_drops_blanks_and_duplicates() {
        let items = vec![
            "first".to_owned(),
            "  ".to_owned(),
            "first".to_owned(),
            "second".to_owned(),
            "".to_owned(),
        ];
        assert_eq!(dedup_non_empty(items, 5), vec!["first", "second"]);
    }

    #[test]
    fn test_dedup_non_empty_respects_max() {
        let items = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
        assert_eq!(dedup_non_empty(items, 2), vec!["a", "b"]);
    }
}
