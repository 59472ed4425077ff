pub mod daemon_cli;
pub mod proxy_cli;

use clap::Args;
use signal_hook::{
    consts::{SIGUSR1, SIGUSR2}, iterator::Signals
};
use ssh_core::{crypto::AlgorithmAllowlist, logging};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

/// Install the global subscriber behind a reloadable filter.
///
/// `RUST_LOG` wins over `log_level`; both fall back to `info`.
pub fn init_tracing(log_level: Option<&str>) {
    let initial = log_level.map(logging::parse_level).unwrap_or(LevelFilter::INFO);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(initial.to_string()));
    let (filter, handle) = reload::Layer::new(env_filter);
    let _ = tracing_subscriber::registry().with(filter).with(fmt::layer()).try_init();
    logging::set_reload_handle(handle, initial);
}

/// SIGUSR1 raises and SIGUSR2 lowers the log level.
pub fn spawn_verbosity_signals() -> std::io::Result<()> {
    let mut signals = Signals::new([SIGUSR1, SIGUSR2])?;
    std::thread::Builder::new()
        .name("log-level-signals".into())
        .spawn(move || {
            for signal in signals.forever() {
                let changed = match signal {
                    SIGUSR1 => logging::increase_verbosity(),
                    SIGUSR2 => logging::decrease_verbosity(),
                    _ => None,
                };
                if let Some(level) = changed {
                    tracing::info!(%level, "log level changed");
                }
            }
        })?;
    Ok(())
}

/// Comma-separated algorithm allowlists shared by both binaries.
#[derive(Debug, Args, Default, Clone)]
pub struct AlgorithmArgs {
    /// Allowed ciphers (empty for defaults)
    #[arg(long, value_name = "LIST", default_value = "")]
    pub allowed_ciphers: String,
    /// Allowed MACs (empty for defaults)
    #[arg(long, value_name = "LIST", default_value = "")]
    pub allowed_macs: String,
    /// Allowed key exchanges (empty for defaults)
    #[arg(long, value_name = "LIST", default_value = "")]
    pub allowed_key_exchanges: String,
}

impl AlgorithmArgs {
    pub fn to_allowlist(&self) -> AlgorithmAllowlist {
        AlgorithmAllowlist::from_csv(&self.allowed_ciphers, &self.allowed_macs, &self.allowed_key_exchanges)
    }
}
