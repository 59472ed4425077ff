use anyhow::Result;
use clap::Parser;
use gate_cli::{init_tracing, proxy_cli::ProxyArgs, spawn_verbosity_signals};
use server_core::run_proxy;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ProxyArgs::parse();
    init_tracing(args.log_level.as_deref());
    spawn_verbosity_signals()?;

    tokio::select! {
        res = run_proxy(args.to_run_config()) => res?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
