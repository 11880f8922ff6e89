// SPDX-License-Identifier: GPL-3.0-only

//! Local Storage Service - reconciliation daemon for mounts and unions

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::time::MissedTickBehavior;

use storage_service::config::DEFAULT_CONFIG_PATH;
use storage_service::{Collaborators, Config, StorageService, logging};
use storage_sys::SystemCommandRunner;

const REQUIRED_TOOLS: &[&str] = &["mount", "umount", "lsblk", "mergerfs"];

#[derive(Debug, Parser)]
#[command(version, about = "Storage reconciliation daemon")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    logging::init(&config.app);

    tracing::info!(
        "Starting Local Storage Service v{} (config {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    // Check if running as root
    if !nix::unistd::geteuid().is_root() {
        tracing::error!("Storage service must run as root");
        anyhow::bail!("Service must run with root privileges");
    }

    for tool in REQUIRED_TOOLS {
        if !SystemCommandRunner::is_available(tool) {
            tracing::warn!("{} not found on PATH; related operations will fail", tool);
        }
    }

    let service = Arc::new(StorageService::new(config.clone(), Collaborators::system())?);

    match service.ensure_default_merge() {
        Ok(Some(merge)) => tracing::info!("Default merge at {}", merge.mount_point),
        Ok(None) => {}
        Err(e) => tracing::error!("Failed to register default merge: {}", e),
    }

    run_sweep(&service).await;
    if args.once {
        return Ok(());
    }

    let mut interval = tokio::time::interval(config.merge.sweep_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the startup sweep already ran.
    interval.tick().await;

    tracing::info!(
        "Service ready, sweeping every {}s",
        config.merge.sweep_interval_secs
    );
    loop {
        tokio::select! {
            _ = interval.tick() => run_sweep(&service).await,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Received shutdown signal");
                break;
            }
        }
    }

    tracing::info!("Local Storage Service shutting down");
    Ok(())
}

async fn run_sweep(service: &Arc<StorageService>) {
    let service = service.clone();
    match tokio::task::spawn_blocking(move || service.sweep()).await {
        Ok(report) => tracing::info!(
            "Sweep: {} created, {} updated, {} unchanged, {} conflicting, {} failed, {} volume state change(s)",
            report.created,
            report.updated,
            report.unchanged,
            report.conflicting,
            report.failed,
            report.volumes_changed
        ),
        Err(e) => tracing::error!("Sweep task failed: {}", e),
    }
}
