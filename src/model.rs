//! Our core data model.
//!
//! These types are shared by every component in the pipeline: the
//! orchestrator builds an [`AnalyzedRequest`] from an [`ImproveRequest`], the
//! assembler and optimizers exchange [`ImprovementResult`]s, and the cache
//! and history store key off [`CacheKey`] and persist [`HistoryEntry`]
//! records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;

use crate::prelude::*;

/// Which preset the caller selected. Presets alter the assembler's
/// expectations (see `assembler.rs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum Preset {
    Default,
    Specific,
    Structured,
    Coding,
}

impl Default for Preset {
    fn default() -> Self {
        Preset::Default
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Preset::Default => "default",
            Preset::Specific => "specific",
            Preset::Structured => "structured",
            Preset::Coding => "coding",
        };
        write!(f, "{s}")
    }
}

/// Where the request should be executed. The orchestrator itself is
/// execution-mode-agnostic; this flows through to the injected
/// [`crate::llm::transport::LlmTransport`] and into the cache key, since the
/// same idea may produce different results locally vs. remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum ExecutionMode {
    Local,
    Remote,
    Hybrid,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Remote
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Remote => "remote",
            ExecutionMode::Hybrid => "hybrid",
        };
        write!(f, "{s}")
    }
}

/// The inferred purpose of the caller's idea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    Debug,
    Refactor,
    Generate,
    Explain,
}

/// The inferred complexity of the caller's idea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// A raw request to improve a prompt.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImproveRequest {
    /// The caller's rough idea. Must be at least 5 characters after
    /// trimming.
    pub idea: String,

    /// Optional extra context.
    #[serde(default)]
    pub context: Option<String>,

    /// Which preset to assemble under.
    #[serde(default)]
    pub preset: Preset,

    /// Where this should run.
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Per-call deadline, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// The primary model id.
    pub model: String,

    /// An optional fallback model id, tried on fallback-worthy errors.
    #[serde(default)]
    pub fallback_model: Option<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl ImproveRequest {
    /// The idea, trimmed. This is what every length check and cache key
    /// computation actually uses.
    pub fn trimmed_idea(&self) -> &str {
        self.idea.trim()
    }

    /// The context, trimmed, if any non-empty context was supplied.
    pub fn trimmed_context(&self) -> Option<&str> {
        self.context
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// An [`ImproveRequest`] enriched with derived intent and complexity.
#[derive(Debug, Clone)]
pub struct AnalyzedRequest {
    pub request: ImproveRequest,
    pub intent: Intent,
    pub complexity: Complexity,
    /// Confidence in the combined intent+complexity analysis, in [0, 1].
    pub analysis_confidence: f64,
}

/// A curated few-shot exemplar used as a reference pattern.
///
/// Loaded once at startup from the catalog file; immutable at runtime. Two
/// fields (`has_expected_output`, `validator_score`) are documented but not
/// fully specified upstream, so they default defensively (`false`, `0.0`)
/// per an explicit Open Question resolution (see `DESIGN.md`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FewShotExample {
    pub id: String,
    pub input: String,
    pub output: String,
    pub role: String,
    pub framework: Option<String>,
    #[serde(default)]
    pub guardrails: Vec<String>,
    pub domain: String,
    pub intent: Intent,
    pub complexity: Complexity,
    #[serde(default)]
    pub validator_score: f64,
    #[serde(default)]
    pub has_expected_output: bool,
}

/// The structured output we ask the LLM for, and return to the caller.
///
/// This is the exact schema described in spec §6: no extra fields are
/// tolerated by the application layer, though [`crate::llm`] ignores unknown
/// fields during extraction per the spec's schema-validation rule.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct ImprovementResult {
    /// The improved prompt. Never empty, never starts with a meta-line, never
    /// contains an unfilled placeholder.
    pub improved_prompt: String,

    /// Up to 3 unique, non-empty clarifying questions.
    #[serde(default)]
    pub clarifying_questions: Vec<String>,

    /// Up to 5 unique, non-empty assumptions.
    #[serde(default)]
    pub assumptions: Vec<String>,

    /// Self-reported confidence, clamped to [0, 1].
    pub confidence: f64,

    /// Metadata about how this result was produced. Not part of the LLM's
    /// structured-output schema; attached by the engine afterwards.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<ResultMetadata>,
}

/// Bookkeeping about how an [`ImprovementResult`] was produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub backend: String,
    pub used_extraction: bool,
    pub used_repair: bool,
    pub attempt: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    pub latency_ms: u64,
}

/// A deterministic digest of a normalized `(idea, context, mode, preset,
/// model)` tuple. Two requests with byte-identical normalized fields produce
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub String);

impl CacheKey {
    pub fn compute(
        idea: &str,
        context: Option<&str>,
        mode: ExecutionMode,
        preset: Preset,
        model: &str,
    ) -> Self {
        use sha2::{Digest, Sha256};

        let normalized_idea = crate::util::collapse_whitespace(idea.trim());
        let normalized_context = context
            .map(|c| crate::util::collapse_whitespace(c.trim()))
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(normalized_idea.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalized_context.as_bytes());
        hasher.update([0u8]);
        hasher.update(mode.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(preset.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(model.as_bytes());

        CacheKey(hex::encode(hasher.finalize()))
    }
}

/// An entry in the result cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: ImprovementResult,
    pub inserted_at: DateTime<Utc>,
}

/// Who authored a message in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A single message in a wizard session transcript.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ambiguous: Option<bool>,
}

/// Which engine produced a [`HistoryEntry`]. Named `source` in spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum EngineTag {
    Dspy,
    Ollama,
}

/// An append-only record of a past improvement, used by the history store.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub source: EngineTag,
    pub input_length: usize,
    pub preset: Preset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_normalizes_whitespace() {
        let a = CacheKey::compute(
            "  write   a function ",
            Some("ctx"),
            ExecutionMode::Remote,
            Preset::Default,
            "gpt-4o-mini",
        );
        let b = CacheKey::compute(
            "write a function",
            Some("ctx"),
            ExecutionMode::Remote,
            Preset::Default,
            "gpt-4o-mini",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_distinguishes_model() {
        let a = CacheKey::compute("idea", None, ExecutionMode::Remote, Preset::Default, "a");
        let b = CacheKey::compute("idea", None, ExecutionMode::Remote, Preset::Default, "b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_trimmed_idea() {
        let req = ImproveRequest {
            idea: "  hi  ".to_owned(),
            context: Some("  ".to_owned()),
            preset: Preset::Default,
            mode: ExecutionMode::Remote,
            timeout_ms: 1000,
            model: "m".to_owned(),
            fallback_model: None,
        };
        assert_eq!(req.trimmed_idea(), "hi");
        assert_eq!(req.trimmed_context(), None);
    }
}
