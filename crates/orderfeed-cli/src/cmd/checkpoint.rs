//! `orderfeed checkpoint` - inspect the stored cursor

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use orderfeed_store::{Checkpoint, CheckpointStore};

use crate::config::Config;

#[derive(Args, Debug)]
pub struct CheckpointArgs {
    #[command(subcommand)]
    pub command: CheckpointCommand,
}

#[derive(Subcommand, Debug)]
pub enum CheckpointCommand {
    /// Show the last committed order
    Show {
        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn run(args: CheckpointArgs, config: &Config) -> Result<()> {
    let pipeline_config = config.pipeline_config();
    let blobs = pipeline_config.storage.open()?;
    let store = CheckpointStore::new(
        blobs,
        &pipeline_config.checkpoint_prefix,
        pipeline_config.retry,
    );

    match args.command {
        CheckpointCommand::Show { json } => {
            let checkpoint = store
                .load()
                .with_context(|| format!("Failed to load {}", store.location()))?;
            match checkpoint {
                None => eprintln!("No checkpoint at {}", store.location()),
                Some(cp) if json => println!("{}", serde_json::to_string_pretty(&cp)?),
                Some(cp) => eprintln!("{}", format_checkpoint(&cp, &store.location())),
            }
            Ok(())
        }
    }
}

fn format_checkpoint(cp: &Checkpoint, location: &str) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Checkpoint").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

    table.add_row(vec!["Location", location]);
    table.add_row(vec!["Order", &cp.id]);
    table.add_row(vec![
        "Cursor",
        &or_dash(cp.cursor().map(|c| c.to_string())),
    ]);
    table.add_row(vec!["Name", &or_dash(cp.name.clone())]);
    table.add_row(vec![
        "Created",
        &or_dash(cp.created_at.map(|t| t.to_rfc3339())),
    ]);
    table.add_row(vec![
        "Committed",
        &or_dash(cp.committed_at.map(|t| t.to_rfc3339())),
    ]);
    table.add_row(vec!["Orders in run", &cp.order_count.to_string()]);
    table.add_row(vec!["Output", &or_dash(cp.output.clone())]);
    table.add_row(vec!["blake3", &or_dash(cp.content_hash.clone())]);

    format!("\n{table}")
}
