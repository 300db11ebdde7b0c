use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, Level};

use mscgate::config::GatewayConfig;
use mscgate::gateway::Gateway;

/// UDP command gateway: accepts JSON commands on the control port, fans
/// them out to the configured MSC endpoints and returns one aggregated
/// response per command.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// path to the JSON configuration file
    config: PathBuf,

    /// verbose configuration and command parse logging
    #[arg(long)]
    test_mode: bool,
}

fn init_logging(test_mode: bool) {
    let level = if test_mode { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();
}

/// Graceful teardown gets one second after a shutdown signal; a stuck
/// shutdown must not leave the process behind.
fn spawn_exit_watchdog() {
    std::thread::spawn(|| {
        std::thread::sleep(Duration::from_secs(1));
        std::process::exit(1);
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.test_mode);

    let config = Arc::new(GatewayConfig::load(&args.config, args.test_mode)?);
    info!("configuration loaded");

    let gateway = Gateway::bind(config, args.test_mode).await?;

    let mut sigint = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;

    gateway
        .run(async move {
            select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
            spawn_exit_watchdog();
        })
        .await?;

    info!("gateway shutdown complete");
    Ok(())
}
