//! One-shot CLI around the synchronization engine.
//!
//! Meant to be invoked periodically by cron or a systemd timer; each
//! invocation performs one full run and exits. Exit code 0 on success
//! (including the no-op case), non-zero on any aborted run.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use updater::{RunOutcome, Updater, UpdaterConfig};

#[derive(Parser)]
#[command(
    name = "factorio-mod-updater",
    about = "Keeps a Factorio server's mod archives in sync with the mod portal",
    version
)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Verbose logging (DEBUG)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = UpdaterConfig::load(&args.config)
        .with_context(|| format!("loading config '{}'", args.config.display()))?;
    config.validate_paths()?;

    match Updater::new(config).run().await {
        Ok(RunOutcome::UpToDate) => {
            info!("run complete, nothing to update");
            Ok(())
        }
        Ok(RunOutcome::Updated { mods }) => {
            info!("run complete, updated: {}", mods.join(", "));
            Ok(())
        }
        Err(e) => {
            error!("run aborted: {e}");
            Err(e.into())
        }
    }
}
