use clap::Parser;
use client_core::TargetConfig;
use secrecy::SecretString;
use server_core::{ProxyConfig, config::DEFAULT_DAEMON_ADDRESS};

use crate::AlgorithmArgs;

#[derive(Debug, Parser)]
#[command(name = "gate-proxy", about = "SSH proxy relaying clients to a fixed target")]
pub struct ProxyArgs {
    /// Listen address
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_DAEMON_ADDRESS)]
    pub address: String,
    /// Host key (PEM or OpenSSH); an ephemeral ed25519 key is generated when unset
    #[arg(long, value_name = "PEM", env = "PROXY_HOSTKEY", hide_env_values = true)]
    pub host_key: Option<String>,
    #[command(flatten)]
    pub algorithms: AlgorithmArgs,
    /// Target host:port
    #[arg(long, value_name = "ADDR")]
    pub backend_address: String,
    /// User on the target
    #[arg(long, value_name = "USER", default_value = "")]
    pub backend_user: String,
    /// Password on the target
    #[arg(long, value_name = "PASSWORD", env = "PROXY_BACKEND_PASSWORD", hide_env_values = true, default_value = "")]
    pub backend_password: String,
    /// Private key for the target (PEM or OpenSSH)
    #[arg(long, value_name = "PEM", env = "PROXY_BACKEND_PRIVATE_KEY", hide_env_values = true, default_value = "")]
    pub backend_private_key: String,
    /// Expected MD5 or SHA1 fingerprint of the target's host key
    #[arg(long, value_name = "FINGERPRINT", default_value = "")]
    pub backend_host_fingerprint: String,
    /// Password clients must present
    #[arg(long, value_name = "PASSWORD", env = "PROXY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Public key clients may present, in authorized_keys format
    #[arg(long, value_name = "KEY")]
    pub authorized_key: Option<String>,
    /// Correlation guid for app-log lines
    #[arg(long, value_name = "GUID")]
    pub log_guid: Option<String>,
    /// Initial log level when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl ProxyArgs {
    pub fn to_run_config(&self) -> ProxyConfig {
        ProxyConfig {
            address: self.address.clone(),
            host_key: self.host_key.clone().map(SecretString::from),
            allowlist: self.algorithms.to_allowlist(),
            backend: TargetConfig {
                address: self.backend_address.clone(),
                host_fingerprint: self.backend_host_fingerprint.clone(),
                user: self.backend_user.clone(),
                password: self.backend_password.clone(),
                private_key: self.backend_private_key.clone(),
            },
            password: self.password.clone().map(SecretString::from),
            authorized_key: self.authorized_key.clone(),
            log_guid: self.log_guid.clone(),
        }
    }
}
