//! The `wizard` subcommand: a multi-turn, interactive ambiguity resolver
//! that re-enters the orchestrator once per turn (spec §4.9).

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::{
    model::{EngineTag, ExecutionMode, ImproveRequest, Preset},
    wizard::{SessionManager, runner::{WizardRunner, WizardStep}},
    prelude::*,
};

#[derive(Debug, Args)]
pub struct WizardOpts {
    /// The rough idea to start the conversation with.
    pub idea: String,

    #[clap(long, value_enum)]
    pub preset: Option<Preset>,

    #[clap(long, value_enum, default_value = "remote")]
    pub mode: ExecutionMode,

    #[clap(short = 'm', long, default_value = "gpt-4o-mini")]
    pub model: String,

    #[clap(long)]
    pub fallback_model: Option<String>,

    #[clap(long, default_value = "30000")]
    pub timeout_ms: u64,

    #[clap(long, value_enum, default_value = "ollama")]
    pub engine: EngineTag,

    #[clap(long)]
    pub offline: bool,

    #[clap(long)]
    pub json: bool,
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_wizard(opts: &WizardOpts, config: crate::config::Config) -> Result<()> {
    let session_dir = SessionManager::default_base_dir()
        .unwrap_or_else(|| PathBuf::from(".prompt-improve-sessions"));
    let sessions = SessionManager::new(session_dir);
    let engine = super::common::build_engine(config, opts.offline, opts.engine)?;
    let runner = WizardRunner::new(&engine, &sessions);

    let request_template = ImproveRequest {
        idea: String::new(),
        context: None,
        preset: opts.preset.unwrap_or_default(),
        mode: opts.mode,
        timeout_ms: opts.timeout_ms,
        model: opts.model.clone(),
        fallback_model: opts.fallback_model.clone(),
    };

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let mut step = runner
        .start(opts.idea.clone(), None, request_template.clone(), CancellationToken::new())
        .await?;

    loop {
        match step {
            WizardStep::Final(result) => {
                return super::improve::print_result(&result, opts.json);
            }
            WizardStep::Question { session_id, question } => {
                println!("{question}");
                print!("> ");
                use std::io::Write as _;
                std::io::stdout().flush().ok();

                let reply = match stdin.next_line().await? {
                    Some(line) => line,
                    None => {
                        println!("(no more input; stopping wizard)");
                        return Ok(());
                    }
                };

                step = runner
                    .reply(
                        &session_id,
                        reply,
                        opts.idea.clone(),
                        request_template.clone(),
                        CancellationToken::new(),
                    )
                    .await?;
            }
        }
    }
}
