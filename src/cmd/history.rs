//! The `history` subcommand: list, show, and clear past improvements (spec
//! §4.10).

use clap::{Args, Subcommand};

use crate::{history::HistoryStore, prelude::*};

#[derive(Debug, Args)]
pub struct HistoryOpts {
    #[clap(subcommand)]
    pub action: HistoryAction,
}

#[derive(Debug, Subcommand)]
pub enum HistoryAction {
    /// List recent history entries, newest first.
    List {
        #[clap(long, default_value = "20")]
        limit: usize,
    },
    /// Show a single entry by id.
    Show { id: String },
    /// Delete all history.
    Clear,
}

#[instrument(level = "debug", skip_all)]
pub async fn cmd_history(opts: &HistoryOpts) -> Result<()> {
    let path = HistoryStore::default_path().ok_or_else(|| anyhow!("could not determine a home directory for the history file"))?;
    let store = HistoryStore::new(path);

    match &opts.action {
        HistoryAction::List { limit } => {
            let entries = store.list(*limit).await?;
            if entries.is_empty() {
                println!("No history yet.");
            }
            for entry in entries {
                println!(
                    "{}  {}  confidence={}  {}",
                    entry.id,
                    entry.timestamp.to_rfc3339(),
                    entry
                        .confidence
                        .map(|c| format!("{c:.2}"))
                        .unwrap_or_else(|| "-".to_owned()),
                    crate::util::truncate_for_display(&entry.prompt, 80),
                );
            }
        }
        HistoryAction::Show { id } => match store.get_by_id(id).await? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("No history entry with id {id:?}."),
        },
        HistoryAction::Clear => {
            store.clear().await?;
            println!("History cleared.");
        }
    }

    Ok(())
}
