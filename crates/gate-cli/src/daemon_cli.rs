use std::{path::PathBuf, time::Duration};

use clap::Parser;
use secrecy::SecretString;
use server_core::{
    DaemonConfig, config::{DEFAULT_DAEMON_ADDRESS, DEFAULT_SFTP_SERVER_PATH}
};

use crate::AlgorithmArgs;

#[derive(Debug, Parser)]
#[command(name = "gate-sshd", about = "SSH daemon serving shell, exec, scp, sftp and direct-tcpip")]
pub struct DaemonArgs {
    /// Listen address
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_DAEMON_ADDRESS)]
    pub address: String,
    /// Host key (PEM or OpenSSH); an ephemeral ed25519 key is generated when unset
    #[arg(long, value_name = "PEM", env = "SSHD_HOSTKEY", hide_env_values = true)]
    pub host_key: Option<String>,
    /// Public key allowed to connect, in authorized_keys format
    #[arg(long, value_name = "KEY")]
    pub authorized_key: Option<String>,
    /// Accept clients without authentication
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub allow_unauthenticated_clients: bool,
    /// Seed sessions with the daemon's environment (minus PATH)
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub inherit_daemon_env: bool,
    #[command(flatten)]
    pub algorithms: AlgorithmArgs,
    /// Seconds between keepalive checks on pty sessions
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub keepalive_interval: u64,
    /// sftp-server binary used for the sftp subsystem
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SFTP_SERVER_PATH)]
    pub sftp_server_path: PathBuf,
    /// Initial log level when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl DaemonArgs {
    pub fn to_run_config(&self) -> DaemonConfig {
        DaemonConfig {
            address: self.address.clone(),
            host_key: self.host_key.clone().map(SecretString::from),
            authorized_key: self.authorized_key.clone(),
            allow_unauthenticated_clients: self.allow_unauthenticated_clients,
            inherit_daemon_env: self.inherit_daemon_env,
            allowlist: self.algorithms.to_allowlist(),
            keepalive_interval: Duration::from_secs(self.keepalive_interval),
            sftp_server_path: self.sftp_server_path.clone(),
        }
    }
}
