use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use prompt_improve::{cmd, config::Config, prelude::*};

/// Turn a rough prompt idea into a structured, validated improved prompt.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - PROMPT_IMPROVE_BASE_URL (optional): Override the server URL.
  - PROMPT_IMPROVE_MODEL (optional): Override the default model.
  - PROMPT_IMPROVE_FALLBACK_MODEL (optional): Override the fallback model.
  - PROMPT_IMPROVE_TIMEOUT_MS (optional): Override the per-call deadline.
  - OPENAI_API_KEY: The API key to use for remote calls.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    /// Path to a TOML configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Improve a single prompt idea in one shot.
    Improve(cmd::improve::ImproveOpts),
    /// Improve a prompt idea through a multi-turn clarifying conversation.
    Wizard(cmd::wizard::WizardOpts),
    /// List, show, or clear past improvements.
    History(cmd::history::HistoryOpts),
    /// Print the JSON Schema for the structured LLM output contract.
    Schema(cmd::schema::SchemaOpts),
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive = Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    let config = Config::load(opts.config.as_deref()).await?;

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Improve(improve_opts) => {
            cmd::improve::cmd_improve(improve_opts, config).await?;
        }
        Cmd::Wizard(wizard_opts) => {
            cmd::wizard::cmd_wizard(wizard_opts, config).await?;
        }
        Cmd::History(history_opts) => {
            cmd::history::cmd_history(history_opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
