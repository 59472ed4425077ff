//! Server startup for both modes.
//!
//! Validates the run configuration, loads or generates the host key, builds
//! the russh server config and runs the accept loop until it fails.

use std::{sync::Arc, time::Duration};

use russh::{
    MethodSet, Preferred, keys::{Algorithm, PrivateKey, ssh_key::rand_core::OsRng}, server::{self as ssh_server, Server}
};
use ssh_core::{crypto, forwarding::TcpDialer};
use tracing::info;

use crate::{
    config::{DaemonConfig, ProxyConfig}, daemon::{DaemonAuth, DaemonServer, DaemonState}, error::ServerResult, proxy::{ProxyServer, ProxyState, StaticAuthenticator}, session::SessionContext, tcpip::DirectTcpipHandler
};

/// Run the session daemon until its listener fails.
pub async fn run_daemon(config: DaemonConfig) -> ServerResult<()> {
    let keys = config.validate()?;
    let preferred = crypto::filtered_preferred(&config.allowlist)?;
    let host_key = host_key_or_generate(keys.host_key)?;

    let auth = DaemonAuth::new(keys.authorized_key, config.allow_unauthenticated_clients);
    let server_config = server_config(preferred, auth.methods(), host_key, Some(config.keepalive_interval));

    let sessions = SessionContext::local(config.default_env(), config.keepalive_interval, config.sftp_server_path.clone());
    let mut server = DaemonServer::new(DaemonState {
        auth,
        sessions: Arc::new(sessions),
        tcpip: DirectTcpipHandler::new(Arc::new(TcpDialer)),
    });

    info!(address = %config.address, "starting ssh daemon");
    server.run_on_address(Arc::new(server_config), config.address.as_str()).await?;
    Ok(())
}

/// Run the proxy until its listener fails.
pub async fn run_proxy(config: ProxyConfig) -> ServerResult<()> {
    let keys = config.validate()?;
    let preferred = crypto::filtered_preferred(&config.allowlist)?;
    let host_key = host_key_or_generate(keys.host_key)?;

    let authenticator = StaticAuthenticator::new(&config.backend, config.password.clone(), keys.authorized_key, config.log_guid.clone())?;
    let state = ProxyState::new(Arc::new(authenticator), preferred.clone());
    let server_config = server_config(preferred, state.authenticator.methods(), host_key, None);
    let mut server = ProxyServer::new(Arc::new(state));

    info!(address = %config.address, backend = %config.backend.address, "starting ssh proxy");
    server.run_on_address(Arc::new(server_config), config.address.as_str()).await?;
    Ok(())
}

/// Unanswered `keepalive@openssh.com` requests tolerated before the connection is dropped.
const KEEPALIVE_MAX: usize = 3;

fn server_config(preferred: Preferred, methods: MethodSet, host_key: PrivateKey, keepalive: Option<Duration>) -> ssh_server::Config {
    let mut config = ssh_server::Config {
        preferred,
        methods,
        auth_rejection_time: Duration::from_millis(250),
        auth_rejection_time_initial: Some(Duration::from_millis(0)),
        keepalive_interval: keepalive,
        keepalive_max: KEEPALIVE_MAX,
        nodelay: true,
        ..Default::default()
    };
    config.keys.push(host_key);
    config
}

/// Use the configured host key, or generate a throwaway ed25519 key.
pub fn host_key_or_generate(configured: Option<PrivateKey>) -> ServerResult<PrivateKey> {
    match configured {
        Some(key) => {
            info!(algorithm = %key.algorithm(), "using configured host key");
            Ok(key)
        }
        None => {
            let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
            info!("generated ephemeral ed25519 host key");
            Ok(key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    #[test]
    fn missing_host_key_is_generated() {
        let key = host_key_or_generate(None).unwrap();
        assert_eq!(key.algorithm(), Algorithm::Ed25519);
    }

    #[test]
    fn configured_host_key_is_kept() {
        let configured = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let fingerprint = configured.public_key().fingerprint(Default::default());
        let key = host_key_or_generate(Some(configured)).unwrap();
        assert_eq!(key.public_key().fingerprint(Default::default()), fingerprint);
    }

    #[test]
    fn daemon_config_sends_keepalives_at_the_interval() {
        let key = host_key_or_generate(None).unwrap();
        let config = server_config(crypto::default_preferred(), MethodSet::empty(), key, Some(Duration::from_secs(5)));
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.keepalive_max, KEEPALIVE_MAX);
    }

    #[tokio::test]
    async fn invalid_daemon_config_fails_before_binding() {
        let err = run_daemon(DaemonConfig::default()).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig(_)));
    }
}
