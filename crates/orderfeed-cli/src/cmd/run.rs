//! `orderfeed run` - one incremental feed run from the command line

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use orderfeed_core::ProgressContext;
use orderfeed_core::progress::fmt_num;
use orderfeed_shopify::RunSummary;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Also upload the raw order JSON next to the CSV
    #[arg(long)]
    pub publish_raw: bool,

    /// Override shopify.initial_lookback_days for a first run
    #[arg(long)]
    pub lookback_days: Option<u32>,
}

pub fn run(args: RunArgs, config: &Config, progress: &ProgressContext) -> Result<()> {
    let mut pipeline_config = config.pipeline_config();
    pipeline_config.publish_raw |= args.publish_raw;
    if args.lookback_days.is_some() {
        pipeline_config.initial_lookback_days = args.lookback_days;
    }

    let pipeline = pipeline_config
        .build()
        .context("Invalid pipeline configuration")?;

    let summary = pipeline.run(progress)?;
    if progress.is_tty() {
        progress.println(format_summary(&summary));
    } else {
        log_summary(&summary);
    }
    Ok(())
}

fn cursor_cell(cursor: Option<u64>) -> String {
    cursor.map_or_else(|| "none".to_string(), |c| c.to_string())
}

fn format_summary(summary: &RunSummary) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Order feed")
                .fg(Color::Cyan)
                .add_attribute(comfy_table::Attribute::Bold),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    table.add_row(vec![
        Cell::new("Orders fetched"),
        Cell::new(fmt_num(summary.orders_fetched)),
    ]);
    table.add_row(vec![
        Cell::new("Orders excluded"),
        Cell::new(fmt_num(summary.orders_excluded)),
    ]);
    table.add_row(vec![
        Cell::new("Rows written").fg(Color::Green),
        Cell::new(fmt_num(summary.rows)).fg(Color::Green),
    ]);
    table.add_row(vec![
        Cell::new("Cursor"),
        Cell::new(format!(
            "{} -> {}",
            cursor_cell(summary.previous_cursor),
            cursor_cell(summary.cursor)
        )),
    ]);
    match &summary.output {
        Some(receipt) => {
            table.add_row(vec![
                Cell::new("Output"),
                Cell::new(&receipt.output_location),
            ]);
            table.add_row(vec![
                Cell::new("blake3"),
                Cell::new(&receipt.content_hash),
            ]);
            if let Some(raw) = &receipt.raw_key {
                table.add_row(vec![Cell::new("Raw"), Cell::new(raw)]);
            }
        }
        None => {
            table.add_row(vec![Cell::new("Output"), Cell::new("none (no new orders)")]);
        }
    }
    table.add_row(vec![
        Cell::new("Elapsed"),
        Cell::new(format!("{:.1}s", summary.elapsed_secs)),
    ]);

    format!("\n{table}")
}

fn log_summary(summary: &RunSummary) {
    match &summary.output {
        Some(receipt) => log::info!(
            "Run complete: {} orders, {} rows -> {} (cursor {})",
            fmt_num(summary.orders_fetched),
            fmt_num(summary.rows),
            receipt.output_location,
            cursor_cell(summary.cursor)
        ),
        None => log::info!(
            "Run complete: no new orders (cursor {})",
            cursor_cell(summary.cursor)
        ),
    }
}
