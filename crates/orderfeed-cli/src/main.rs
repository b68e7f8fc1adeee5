//! orderfeed - incremental Shopify order feed
//!
//! Fetches new orders from the Shopify Admin API, flattens them into a CSV
//! feed and publishes it to a blob store, either once from the command line
//! or on demand behind an HTTP trigger.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "orderfeed")]
#[command(about = "Incremental Shopify order feed")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./orderfeed.toml or ~/.config/orderfeed/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Maximum retry attempts for transient failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Local directory for files staged before upload
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch new orders, publish the feed and advance the checkpoint
    Run(cmd::run::RunArgs),
    /// Serve the HTTP trigger (/create_feed, /health)
    Serve(cmd::serve::ServeArgs),
    /// Inspect the stored checkpoint
    Checkpoint(cmd::checkpoint::CheckpointArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(orderfeed_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug, the stage spinner shows activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    // The server is long-running and always logs.
    let serving = matches!(cli.command, Command::Serve(_));
    let is_tty = progress.is_tty() && !serving;
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = is_tty && !cli.debug;
    if let Err(e) = orderfeed_core::init_logging(quiet, cli.debug, multi) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match run(cli, &progress) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: &orderfeed_core::ProgressContext) -> Result<()> {
    let mut config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    // CLI overrides
    if let Some(retries) = cli.max_retries {
        config.http.max_retries = retries;
    }
    if let Some(dir) = cli.staging_dir {
        config.output.staging_dir = dir;
    }

    orderfeed_core::set_http_config(config.http.http_config());

    if let Err(e) = orderfeed_core::install_signal_handlers() {
        log::warn!("Signal handlers not installed: {e}");
    }

    match cli.command {
        Command::Run(args) => cmd::run::run(args, &config, progress),
        Command::Serve(args) => cmd::serve::run(args, &config),
        Command::Checkpoint(args) => cmd::checkpoint::run(args, &config),
        Command::Config => {
            eprintln!("{}", format_config(&config));
            Ok(())
        }
    }
}

fn format_config(config: &Config) -> String {
    use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

    let configured = |set: bool| if set { "configured" } else { "not set" };

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);

    let shopify = &config.shopify;
    let storage = &config.storage;
    let store = if shopify.store.is_empty() {
        "not set"
    } else {
        shopify.store.as_str()
    };
    table.add_row(vec!["Shopify store", store]);
    table.add_row(vec!["API version", &shopify.api_version]);
    table.add_row(vec![
        "Shopify token",
        configured(shopify.access_token.is_some()),
    ]);
    table.add_row(vec!["Page size", &shopify.page_size.to_string()]);
    table.add_row(vec!["Page delay", &format!("{}ms", shopify.page_delay_ms)]);
    table.add_row(vec![
        "Fulfillment filter",
        &if shopify.fulfillment_statuses.is_empty() {
            "all".to_string()
        } else {
            shopify.fulfillment_statuses.join(", ")
        },
    ]);
    table.add_row(vec!["Storage", &storage.describe()]);
    table.add_row(vec![
        "Storage token",
        if storage.anonymous {
            "anonymous"
        } else if storage.access_token.is_some() {
            "configured"
        } else {
            "metadata server"
        },
    ]);
    table.add_row(vec![
        "Checkpoint",
        &format!("{}/{}", storage.checkpoint_prefix, orderfeed_store::CHECKPOINT_FILE),
    ]);
    table.add_row(vec![
        "Output",
        &format!("{}/{}_<first>-<last>.csv", storage.output_prefix, storage.file_prefix),
    ]);
    table.add_row(vec!["Publish raw JSON", &storage.publish_raw.to_string()]);
    table.add_row(vec![
        "Staging directory",
        &config.output.staging_dir.display().to_string(),
    ]);
    table.add_row(vec![
        "Gender rules",
        &format!(
            "{} ({} match)",
            config.gender.rules.len(),
            config.gender.match_mode
        ),
    ]);
    table.add_row(vec![
        "Timeouts",
        &format!(
            "connect {}s, request {}s",
            config.http.connect_timeout, config.http.request_timeout
        ),
    ]);
    table.add_row(vec!["Max retries", &config.http.max_retries.to_string()]);
    table.add_row(vec!["Backoff", &format!("{}ms", config.http.backoff_ms)]);
    table.add_row(vec!["Server bind", &config.server.bind]);

    format!("\n{table}")
}
