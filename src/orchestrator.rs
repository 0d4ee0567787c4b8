//! The orchestrator (spec §4, control-flow overview): composes every port
//! (LLM transport, few-shot retriever, result cache, history store) into the
//! single `improve` operation.
//!
//! `Engine` is built once per process and shared across requests (it's
//! `Sync`, and every port it owns is designed for concurrent use); each call
//! to [`Engine::improve`] is independent and cancellable via the
//! [`CancellationToken`] the caller passes in.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use crate::{
    assembler::PromptAssembler,
    cache::ResultCache,
    complexity::{self, ComplexityAnalysis},
    config::Config,
    errors::PipelineError,
    intent::{self, IntentClassification},
    knn::KnnProvider,
    llm::LlmTransport,
    model::{
        AnalyzedRequest, CacheKey, Complexity, EngineTag, HistoryEntry, ImproveRequest,
        ImprovementResult, Intent,
    },
    optimizers::{opro::OproOptimizer, reflexion::ReflexionOptimizer, Optimizer},
};

/// How many few-shot examples to retrieve per request, by complexity (spec
/// §4.4's "k scales with complexity" note).
fn knn_k(complexity: Complexity) -> usize {
    match complexity {
        Complexity::Simple | Complexity::Moderate => 3,
        Complexity::Complex => 5,
    }
}

/// Which [`EngineTag`] to stamp on history entries. We only ever run one
/// backend per process (the transport injected at construction), so this is
/// a construction-time choice rather than a per-request one.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Dspy,
    Ollama,
}

impl From<Backend> for EngineTag {
    fn from(value: Backend) -> Self {
        match value {
            Backend::Dspy => EngineTag::Dspy,
            Backend::Ollama => EngineTag::Ollama,
        }
    }
}

/// Every port the orchestrator composes, built once at process start.
pub struct Engine {
    pub transport: Arc<dyn LlmTransport>,
    pub knn: Arc<KnnProvider>,
    pub assembler: PromptAssembler,
    pub cache: Arc<ResultCache>,
    pub history: Option<Arc<crate::history::HistoryStore>>,
    pub config: Config,
    pub backend: Backend,
}

impl Engine {
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        knn: Arc<KnnProvider>,
        cache: Arc<ResultCache>,
        history: Option<Arc<crate::history::HistoryStore>>,
        config: Config,
        backend: Backend,
    ) -> Self {
        Self {
            transport,
            knn,
            assembler: PromptAssembler::new(),
            cache,
            history,
            config,
            backend,
        }
    }

    /// Analyze `request`'s combined idea+context text into an intent and
    /// complexity verdict (spec §4.2/§4.3), without touching the network or
    /// the cache. Exposed separately so the wizard can decide whether to
    /// open a session before paying for a full `improve` call.
    pub fn analyze(&self, request: &ImproveRequest) -> AnalyzedRequest {
        let combined = combined_text(request.trimmed_idea(), request.trimmed_context());
        let IntentClassification { intent, confidence: intent_confidence } = intent::classify_intent(&combined);
        let ComplexityAnalysis { level: complexity, confidence: complexity_confidence, .. } =
            complexity::analyze_complexity(&combined);

        AnalyzedRequest {
            request: request.clone(),
            intent,
            complexity,
            analysis_confidence: (intent_confidence + complexity_confidence) / 2.0,
        }
    }

    /// Run the full pipeline for `request`: validate, analyze, retrieve
    /// few-shot examples, assemble the prompt, optimize, and cache the
    /// result (single-flight on the request's content-addressed key). A
    /// best-effort history write follows on success; a history failure never
    /// fails the request (spec §9's Design Notes).
    pub async fn improve(
        &self,
        request: ImproveRequest,
        cancel: CancellationToken,
    ) -> Result<ImprovementResult, PipelineError> {
        let trimmed_idea = request.trimmed_idea();
        const MIN_IDEA_LEN: usize = 5;
        if trimmed_idea.chars().count() < MIN_IDEA_LEN {
            return Err(PipelineError::InputTooShort {
                min_len: MIN_IDEA_LEN,
                actual_len: trimmed_idea.chars().count(),
            });
        }

        let analyzed = self.analyze(&request);

        let key = CacheKey::compute(
            request.trimmed_idea(),
            request.trimmed_context(),
            request.mode,
            request.preset,
            &request.model,
        );

        let result = {
            let this_transport = self.transport.clone();
            let this_knn = self.knn.clone();
            let config = self.config.clone();
            let model = request.model.clone();
            let fallback_model = request.fallback_model.clone();
            let idea = request.trimmed_idea().to_owned();
            let context = request.trimmed_context().map(str::to_owned);
            let cancel_for_compute = cancel.clone();

            self.cache
                .get_or_compute(key, move || async move {
                    run_pipeline(
                        this_transport.as_ref(),
                        this_knn.as_ref(),
                        &idea,
                        context.as_deref(),
                        analyzed.intent,
                        analyzed.complexity,
                        &model,
                        fallback_model.as_deref(),
                        &config,
                        &cancel_for_compute,
                    )
                    .await
                })
                .await?
        };

        if let Some(history) = &self.history {
            let entry = HistoryEntry {
                id: uuid::Uuid::now_v7().to_string(),
                timestamp: chrono::Utc::now(),
                prompt: result.improved_prompt.clone(),
                confidence: Some(result.confidence),
                questions: result.clarifying_questions.clone(),
                assumptions: result.assumptions.clone(),
                source: self.backend.into(),
                input_length: request.trimmed_idea().chars().count(),
                preset: request.preset,
            };
            if let Err(error) = history.save(entry).await {
                warn!(%error, "failed to persist history entry, continuing anyway");
            }
        }

        Ok(result)
    }
}

/// Note: this runs inside the cache's single-flight slot, so it must not
/// reach back into `self` — every input it needs is captured by value or
/// `Arc` beforehand.
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    transport: &dyn LlmTransport,
    knn: &KnnProvider,
    idea: &str,
    context: Option<&str>,
    intent: Intent,
    complexity: Complexity,
    model: &str,
    fallback_model: Option<&str>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<ImprovementResult, PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    let query_text = combined_text(idea, context);
    let require_expected_output = intent == Intent::Refactor;
    let examples = knn.find_examples(
        &query_text,
        intent,
        complexity,
        knn_k(complexity),
        require_expected_output,
    );

    let assembler = PromptAssembler::new();
    let assembled = assembler.assemble(idea, context, intent, complexity, &examples);

    let optimizer: Box<dyn Optimizer> = match intent {
        Intent::Debug => Box::new(ReflexionOptimizer {
            error_symptom: extract_error_symptom(idea),
        }),
        Intent::Refactor | Intent::Generate | Intent::Explain => Box::new(OproOptimizer),
    };

    // Identity is a last-resort mode for when no LLM/optimization is
    // available at all (spec §4.7's last paragraph) — it is not a recovery
    // path for a real optimizer failure. Every optimizer error here (timeout,
    // rate limit, or a schema/quality-gate failure surviving repair and
    // fallback) is propagated verbatim, per spec §7's propagation policy.
    optimizer
        .optimize(transport, &assembled, model, fallback_model, config, cancel)
        .await
}

fn combined_text(idea: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.is_empty() => format!("{idea} {context}"),
        _ => idea.to_owned(),
    }
}

static ERROR_SYMPTOM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_.]*(?:Error|Exception)\b").unwrap()
});

/// Pull out a verbatim error/exception identifier from the idea text, if one
/// is present (e.g. `NullPointerException`, `ValueError`). Used by
/// [`ReflexionOptimizer`] to check that its candidate still names the actual
/// symptom rather than drifting into a generic description.
fn extract_error_symptom(idea: &str) -> Option<String> {
    ERROR_SYMPTOM_RE.find(idea).map(|m| m.as_str().to_owned())
}

/// A transport that always fails fatally, used to verify that a genuine
/// optimizer failure is propagated rather than papered over by
/// [`crate::optimizers::IdentityOptimizer`].
#[cfg(test)]
#[derive(Debug, Default)]
struct AlwaysTimesOutTransport;

#[cfg(test)]
#[async_trait::async_trait]
impl LlmTransport for AlwaysTimesOutTransport {
    async fn chat(&self, _call: &crate::llm::ChatCall) -> crate::llm::TransportRetryResult {
        keen_retry::RetryResult::Fatal { input: (), error: PipelineError::Timeout(5_000) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::Catalog,
        llm::echo::EchoTransport,
        model::{ExecutionMode, Preset},
    };

    fn engine() -> Engine {
        let catalog = Catalog::load_bundled().unwrap();
        let knn = Arc::new(KnnProvider::build(&catalog));
        let transport: Arc<dyn LlmTransport> = Arc::new(EchoTransport::default());
        let cache = Arc::new(ResultCache::new(Default::default()));
        Engine::new(transport, knn, cache, None, Config::default(), Backend::Ollama)
    }

    fn request(idea: &str) -> ImproveRequest {
        ImproveRequest {
            idea: idea.to_owned(),
            context: None,
            preset: Preset::Default,
            mode: ExecutionMode::Remote,
            timeout_ms: 5_000,
            model: "echo".to_owned(),
            fallback_model: None,
        }
    }

    #[test]
    fn test_extract_error_symptom_finds_exception_name() {
        assert_eq!(
            extract_error_symptom("fix the NullPointerException in my login flow"),
            Some("NullPointerException".to_owned())
        );
        assert_eq!(extract_error_symptom("fix my broken login flow"), None);
    }

    #[tokio::test]
    async fn test_improve_rejects_too_short_idea() {
        let engine = engine();
        let result = engine.improve(request("hi"), CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::InputTooShort { .. })));
    }

    #[tokio::test]
    async fn test_improve_returns_a_result_for_a_valid_idea() {
        let engine = engine();
        let result = engine
            .improve(request("write a function that parses CSV files"), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.improved_prompt.is_empty());
        assert!(result.metadata.is_some());
    }

    #[tokio::test]
    async fn test_improve_respects_cancellation() {
        let engine = engine();
        let token = CancellationToken::new();
        token.cancel();
        let result = engine.improve(request("write a function that parses CSV files"), token).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_improve_propagates_genuine_optimizer_failure() {
        let catalog = Catalog::load_bundled().unwrap();
        let knn = Arc::new(KnnProvider::build(&catalog));
        let transport: Arc<dyn LlmTransport> = Arc::new(AlwaysTimesOutTransport);
        let cache = Arc::new(ResultCache::new(Default::default()));
        let engine = Engine::new(transport, knn, cache, None, Config::default(), Backend::Ollama);

        let result = engine
            .improve(
                request("write a function that parses CSV files"),
                CancellationToken::new(),
            )
            .await;
        assert!(
            matches!(result, Err(PipelineError::Timeout(_))),
            "expected a propagated Timeout, got {result:?}"
        );
    }

    #[test]
    fn test_knn_k_matches_spec_defaults() {
        assert_eq!(knn_k(Complexity::Simple), 3);
        assert_eq!(knn_k(Complexity::Moderate), 3);
        assert_eq!(knn_k(Complexity::Complex), 5);
    }

    #[tokio::test]
    async fn test_improve_is_cached_on_repeat_calls() {
        let engine = engine();
        let first = engine
            .improve(request("explain how binary search works"), CancellationToken::new())
            .await
            .unwrap();
        let second = engine
            .improve(request("explain how binary search works"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.improved_prompt, second.improved_prompt);
    }
}
