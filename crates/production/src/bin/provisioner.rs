//! Fleet provisioner daemon.
//!
//! Runs one provisioner against the in-process [`LocalBus`] and an
//! in-memory handle store, logging its status until interrupted. No
//! network transport is wired in: nodes in other processes cannot reach
//! it. Networked deployments plug their own [`MessageBus`] implementation
//! into [`ProductionRunner`].
//!
//! [`MessageBus`]: fleet_production::MessageBus

use anyhow::Context;
use clap::Parser;
use fleet_production::{init_logging, FileConfig, LocalBus, MemoryHandleStore, ProductionRunner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleet-provisioner")]
#[command(about = "Provisioner for a fleet of service nodes (in-process bus only; no network transport)")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service name; overrides the config file
    #[arg(long)]
    service_name: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds to wait for a node reply
    #[arg(long)]
    node_timeout_secs: Option<u64>,

    /// Place instances even on nodes scoring zero
    #[arg(long)]
    allow_over_provisioning: bool,

    /// Seconds between status log lines
    #[arg(long, default_value = "60")]
    status_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FileConfig::default(),
    };
    if let Some(service_name) = cli.service_name {
        config.service_name = service_name;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    if let Some(secs) = cli.node_timeout_secs {
        config.node_timeout_secs = secs;
    }
    if cli.allow_over_provisioning {
        config.allow_over_provisioning = true;
    }
    config.validate()?;

    init_logging(&config.log_level).context("initializing logging")?;

    let runner = ProductionRunner::new(
        config.provisioner_config(),
        Arc::new(config.scorer()),
        Arc::new(LocalBus::new()),
        Arc::new(MemoryHandleStore::new()),
    );
    let (handle, task) = runner.spawn().await?;
    info!(service = %config.service_name, "Provisioner started");

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.status_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => match handle.status().await {
                Ok(status) => {
                    let json = serde_json::to_string(&status)?;
                    info!(status = %json, "Provisioner status");
                }
                Err(e) => {
                    warn!(error = %e, "Runner stopped");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown();
    task.await.context("joining runner")?;
    Ok(())
}
