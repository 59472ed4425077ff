//! Direct-serve mode: sessions run local commands, `direct-tcpip` dials out.

mod auth;
mod handler;

use std::{net::SocketAddr, sync::Arc};

pub use auth::DaemonAuth;
pub use handler::DaemonHandler;
use tracing::{info, warn};

use crate::{session::SessionContext, tcpip::DirectTcpipHandler};

/// Everything a daemon connection needs, shared across connections.
pub struct DaemonState {
    pub auth: DaemonAuth,
    pub sessions: Arc<SessionContext>,
    pub tcpip: DirectTcpipHandler,
}

/// russh `Server` that hands each connection to a [`DaemonHandler`].
#[derive(Clone)]
pub struct DaemonServer {
    state: Arc<DaemonState>,
}

impl DaemonServer {
    pub fn new(state: DaemonState) -> Self {
        Self { state: Arc::new(state) }
    }
}

impl russh::server::Server for DaemonServer {
    type Handler = DaemonHandler;

    fn new_client(&mut self, addr: Option<SocketAddr>) -> Self::Handler {
        info!(peer = %display_addr(addr), "client connected");
        DaemonHandler::new(addr, self.state.clone())
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        warn!(?error, "daemon connection ended with error");
    }
}

/// Socket address for logs, or a placeholder when russh did not provide one.
pub(crate) fn display_addr(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "<unknown>".into())
}
