//! The `improve` subcommand: a single-shot call into the orchestrator.

use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::{
    model::{EngineTag, ExecutionMode, ImproveRequest, ImprovementResult, Preset},
    prelude::*,
};

#[derive(Debug, Args)]
pub struct ImproveOpts {
    /// The rough idea to improve.
    pub idea: String,

    /// Optional extra context.
    #[clap(long)]
    pub context: Option<String>,

    /// Which preset to assemble under.
    #[clap(long, value_enum, default_value = "default")]
    pub preset: Preset,

    /// Where this should run (affects the cache key and error hints).
    #[clap(long, value_enum, default_value = "remote")]
    pub mode: ExecutionMode,

    /// The primary model id.
    #[clap(short = 'm', long, default_value = "gpt-4o-mini")]
    pub model: String,

    /// An optional fallback model id, tried on fallback-worthy errors.
    #[clap(long)]
    pub fallback_model: Option<String>,

    /// Per-call deadline, in milliseconds.
    #[clap(long, default_value = "30000")]
    pub timeout_ms: u64,

    /// Which engine tag to stamp on the history entry.
    #[clap(long, value_enum, default_value = "ollama")]
    pub engine: EngineTag,

    /// Skip the network and synthesize a deterministic reply, for demos and
    /// offline testing.
    #[clap(long)]
    pub offline: bool,

    /// Print the raw JSON result instead of a human-readable rendering.
    #[clap(long)]
    pub json: bool,
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_improve(opts: &ImproveOpts, config: crate::config::Config) -> Result<()> {
    let engine = super::common::build_engine(config, opts.offline, opts.engine)?;

    let request = ImproveRequest {
        idea: opts.idea.clone(),
        context: opts.context.clone(),
        preset: opts.preset,
        mode: opts.mode,
        timeout_ms: opts.timeout_ms,
        model: opts.model.clone(),
        fallback_model: opts.fallback_model.clone(),
    };

    let result = engine
        .improve(request, CancellationToken::new())
        .await
        .map_err(|error| {
            let hint = crate::hints::error_hint(&error.to_string(), opts.mode);
            match hint {
                Some(hint) => anyhow!("{error}\nhint: {hint}"),
                None => anyhow!("{error}"),
            }
        })?;

    print_result(&result, opts.json)
}

pub fn print_result(result: &ImprovementResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", result.improved_prompt);
    if !result.clarifying_questions.is_empty() {
        println!("\nClarifying questions:");
        for question in &result.clarifying_questions {
            println!("  - {question}");
        }
    }
    if !result.assumptions.is_empty() {
        println!("\nAssumptions:");
        for assumption in &result.assumptions {
            println!("  - {assumption}");
        }
    }
    println!("\nConfidence: {:.2}", result.confidence);
    if let Some(metadata) = &result.metadata {
        println!(
            "Backend: {} (attempt {}, repaired: {}, {}ms)",
            metadata.backend, metadata.attempt, metadata.used_repair, metadata.latency_ms
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_improve_produces_output() {
        let opts = ImproveOpts {
            idea: "write a function that reverses a string".to_owned(),
            context: None,
            preset: Preset::Default,
            mode: ExecutionMode::Remote,
            model: "gpt-4o-mini".to_owned(),
            fallback_model: None,
            timeout_ms: 5_000,
            engine: EngineTag::Ollama,
            offline: true,
            json: true,
        };
        cmd_improve(&opts, crate::config::Config::default()).await.unwrap();
    }
}
