//! Shared CLI wiring: building an [`Engine`] from [`Config`] and CLI flags.

use std::sync::Arc;

use crate::{
    cache::{EvictionPolicy, ResultCache},
    catalog::Catalog,
    config::Config,
    history::HistoryStore,
    knn::KnnProvider,
    llm::{LlmTransport, echo::EchoTransport, openai::OpenAiCompatibleTransport},
    model::EngineTag,
    orchestrator::{Backend, Engine},
    prelude::*,
};

/// Build the shared [`Engine`] used by every request-handling subcommand.
///
/// `offline` swaps in [`EchoTransport`] instead of a real OpenAI-compatible
/// backend, for demos and tests that shouldn't need network access.
pub fn build_engine(config: Config, offline: bool, backend_tag: EngineTag) -> Result<Engine> {
    let catalog = Catalog::load_bundled().context("failed to load bundled few-shot catalog")?;
    let knn = Arc::new(KnnProvider::build(&catalog));

    let transport: Arc<dyn LlmTransport> = if offline {
        Arc::new(EchoTransport::new())
    } else {
        Arc::new(OpenAiCompatibleTransport::new())
    };

    let cache = Arc::new(ResultCache::new(EvictionPolicy {
        max_entries: Some(256),
        ttl: None,
    }));

    let history = HistoryStore::default_path().map(|path| Arc::new(HistoryStore::new(path)));

    let backend = match backend_tag {
        EngineTag::Dspy => Backend::Dspy,
        EngineTag::Ollama => Backend::Ollama,
    };

    Ok(Engine::new(transport, knn, cache, history, config, backend))
}
