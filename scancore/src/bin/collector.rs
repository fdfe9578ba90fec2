// SPDX-License-Identifier: Apache-2.0

//! `scan-collector`: ingests a runner's manifest into Postgres, or purges
//! prior run data. Exactly one of `--temp-file` / `--purge-only`
//! must be given.

use std::path::PathBuf;

use clap::Parser;
use scan_common::{config::Config, error::Error, manifest::Manifest};
use scancore::build_plugin_table;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(name = "scan-collector", about = "Ingest a scan manifest or purge prior data")]
struct Args {
    /// Path to the configuration document.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Path to a manifest written by `scan-runner`, to ingest.
    #[arg(long)]
    temp_file: Option<PathBuf>,

    /// Delete all prior scan data instead of ingesting anything.
    #[arg(long)]
    purge_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    env_logger::init();

    if args.temp_file.is_some() == args.purge_only {
        return Err(Error::AmbiguousCollectorMode.into());
    }

    let config = Config::load(&args.config)?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database.connection_string())
        .await
        .map_err(Error::CollectorDbConnectFailed)?;

    scancore::collector::ensure_schema(&pool).await?;

    if config.scan_config.clear_db {
        scancore::collector::purge_all(&pool).await?;
    }

    if args.purge_only {
        scancore::collector::purge_all(&pool).await?;
        return Ok(());
    }

    let manifest_path = args.temp_file.expect("temp_file present in this branch");
    let manifest = Manifest::read_from(&manifest_path)?;
    let table = build_plugin_table();
    let written = scancore::collector::process_manifest(&pool, &table, &manifest, &manifest_path).await?;

    log::info!(target: "scancore::collector", "ingested {written} finding(s) from {}", manifest_path.display());

    Ok(())
}
