use anyhow::Result;
use clap::Parser;
use gate_cli::{daemon_cli::DaemonArgs, init_tracing, spawn_verbosity_signals};
use server_core::run_daemon;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonArgs::parse();
    init_tracing(args.log_level.as_deref());
    spawn_verbosity_signals()?;

    tokio::select! {
        res = run_daemon(args.to_run_config()) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
