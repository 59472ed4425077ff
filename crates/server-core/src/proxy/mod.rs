//! Proxy mode: pair each authenticated client with a fresh connection to
//! the target named in its permissions, and relay everything between them.

mod auth;
mod backend;
mod handler;
mod relay;
mod telemetry;

use std::{net::SocketAddr, sync::Arc, time::Duration};

pub use auth::{Authenticator, StaticAuthenticator};
pub use handler::ProxyHandler;
pub use relay::{ForwardedRequest, RelaySender};
use russh::{Preferred, client};
pub use telemetry::{CONNECTIONS_METRIC, ConnectionGauge, emit_app_log, ended_message};
use tracing::{info, warn};

use crate::daemon::display_addr;

/// Shared by every proxied connection.
pub struct ProxyState {
    pub authenticator: Arc<dyn Authenticator>,
    pub client_config: Arc<client::Config>,
    pub connections: ConnectionGauge,
}

impl ProxyState {
    pub fn new(authenticator: Arc<dyn Authenticator>, preferred: Preferred) -> Self {
        Self {
            authenticator,
            client_config: Arc::new(backend_client_config(preferred)),
            connections: ConnectionGauge::default(),
        }
    }
}

/// Client settings for target connections.
pub fn backend_client_config(preferred: Preferred) -> client::Config {
    client::Config {
        preferred,
        nodelay: true,
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        ..Default::default()
    }
}

#[derive(Clone)]
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub fn new(state: Arc<ProxyState>) -> Self {
        Self { state }
    }
}

impl russh::server::Server for ProxyServer {
    type Handler = ProxyHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = %display_addr(addr), "client connected to proxy");
        ProxyHandler::new(addr, self.state.clone())
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        warn!(?error, "proxied connection ended with error");
    }
}
