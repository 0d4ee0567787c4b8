//! The `schema` subcommand: print the JSON Schema for [`ImprovementResult`],
//! the structured-output contract the LLM must satisfy (spec §6).

use clap::Args;
use tokio::io::AsyncWriteExt as _;

use crate::{model::ImprovementResult, prelude::*};

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// Write the schema to this file instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(opts: &SchemaOpts) -> Result<()> {
    let schema = schemars::schema_for!(ImprovementResult);
    let schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;

    match &opts.output_path {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {:?}", path))?;
            file.write_all(schema_str.as_bytes())
                .await
                .context("failed to write schema")?;
            file.flush().await.context("failed to flush schema")?;
            Ok(())
        }
        None => {
            println!("{schema_str}");
            Ok(())
        }
    }
}
