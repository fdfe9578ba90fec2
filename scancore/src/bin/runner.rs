// SPDX-License-Identifier: Apache-2.0

//! `scan-runner`: runs every enabled plugin against the configured target
//! and writes a manifest describing what it produced.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;
use scan_common::{config::Config, logging::PluginLogger};
use scancore::build_plugin_table;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "scan-runner", about = "Run enabled scan plugins and emit a manifest")]
struct Args {
    /// Path to the configuration document.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Path to write the run manifest to.
    #[arg(long)]
    output: PathBuf,

    /// Directory to write per-plugin raw output files into. Defaults to the
    /// manifest's own directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Directory to write per-plugin and container log files into.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    PluginLogger::init(&args.log_dir, LevelFilter::Info)?;

    let config = Config::load(&args.config)?;
    if config.scan_config.clear_logs {
        let names: Vec<&str> = config.enabled_plugins().map(|p| p.name.as_str()).collect();
        PluginLogger::clear_logs(&args.log_dir, &names)?;
    }

    let table = build_plugin_table();
    let table: &'static scan_common::plugin::PluginTable = Box::leak(Box::new(table));

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| args.output.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));

    // A handful of plugins consult the target registry mid-scan (e.g. nikto
    // reading ports nmap discovered). A pool here is a best-effort
    // convenience, not a hard requirement — a plugin without registry
    // access simply falls back to its own configured target list.
    let registry_pool = PgPoolOptions::new()
        .max_connections(3)
        .connect(&config.database.connection_string())
        .await
        .ok();

    let manifest = scancore::runner::run_all(&config, table, &output_dir, registry_pool.as_ref()).await?;
    manifest.write_to(&args.output)?;

    log::info!(
        target: "scancore::runner",
        "wrote manifest with {} artifact(s) to {}",
        manifest.artifacts.len(),
        args.output.display()
    );

    Ok(())
}
