//! Plain run configuration for the daemon and the proxy.
//!
//! The CLI crate parses flags into these structs; everything below them only
//! sees validated values.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use client_core::TargetConfig;
use russh::keys::{PrivateKey, PublicKey};
use secrecy::{ExposeSecret, SecretString};
use ssh_core::{crypto::AlgorithmAllowlist, keys};

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_DAEMON_ADDRESS: &str = "0.0.0.0:2222";
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_SFTP_SERVER_PATH: &str = "/usr/lib/openssh/sftp-server";

#[derive(Debug)]
pub struct DaemonConfig {
    pub address: String,
    /// PEM or OpenSSH encoded host key; a fresh ed25519 key is generated when absent.
    pub host_key: Option<SecretString>,
    /// Single `authorized_keys` line accepted for public key auth.
    pub authorized_key: Option<String>,
    pub allow_unauthenticated_clients: bool,
    pub inherit_daemon_env: bool,
    pub allowlist: AlgorithmAllowlist,
    pub keepalive_interval: Duration,
    pub sftp_server_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_DAEMON_ADDRESS.to_string(),
            host_key: None,
            authorized_key: None,
            allow_unauthenticated_clients: false,
            inherit_daemon_env: false,
            allowlist: AlgorithmAllowlist::default(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            sftp_server_path: PathBuf::from(DEFAULT_SFTP_SERVER_PATH),
        }
    }
}

impl DaemonConfig {
    /// Check the flag combination and parse the key material.
    pub fn validate(&self) -> ServerResult<ValidatedKeys> {
        let host_key = parse_host_key(self.host_key.as_ref())?;
        let authorized_key = match self.authorized_key.as_deref().map(str::trim) {
            Some(line) if !line.is_empty() => Some(keys::parse_authorized_key(line)?),
            _ => None,
        };
        if authorized_key.is_none() && !self.allow_unauthenticated_clients {
            return Err(ServerError::invalid_config(
                "authorized key required unless unauthenticated clients are allowed",
            ));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ServerError::invalid_config("keepalive interval must be positive"));
        }
        Ok(ValidatedKeys { host_key, authorized_key })
    }

    /// Environment every session starts from.
    pub fn default_env(&self) -> HashMap<String, String> {
        if self.inherit_daemon_env {
            std::env::vars().filter(|(name, _)| name != "PATH").collect()
        } else {
            HashMap::new()
        }
    }
}

#[derive(Debug)]
pub struct ProxyConfig {
    pub address: String,
    pub host_key: Option<SecretString>,
    pub allowlist: AlgorithmAllowlist,
    pub backend: TargetConfig,
    pub password: Option<SecretString>,
    pub authorized_key: Option<String>,
    pub log_guid: Option<String>,
}

impl ProxyConfig {
    pub fn validate(&self) -> ServerResult<ValidatedKeys> {
        let host_key = parse_host_key(self.host_key.as_ref())?;
        let authorized_key = match self.authorized_key.as_deref().map(str::trim) {
            Some(line) if !line.is_empty() => Some(keys::parse_authorized_key(line)?),
            _ => None,
        };
        let has_password = self.password.as_ref().is_some_and(|p| !p.expose_secret().is_empty());
        if authorized_key.is_none() && !has_password {
            return Err(ServerError::invalid_config("proxy needs a password or an authorized key"));
        }
        if self.backend.address.is_empty() {
            return Err(ServerError::invalid_config("backend address is required"));
        }
        client_core::split_address(&self.backend.address)?;
        Ok(ValidatedKeys { host_key, authorized_key })
    }
}

/// Key material checked at startup.
#[derive(Debug)]
pub struct ValidatedKeys {
    pub host_key: Option<PrivateKey>,
    pub authorized_key: Option<PublicKey>,
}

fn parse_host_key(raw: Option<&SecretString>) -> ServerResult<Option<PrivateKey>> {
    match raw {
        Some(pem) if !pem.expose_secret().trim().is_empty() => Ok(Some(keys::load_private_key_from_str(pem.expose_secret())?)),
        _ => Ok(None),
    }
}
