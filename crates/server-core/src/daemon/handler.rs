//! Per-connection russh handler for the daemon.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Instant};

use russh::{
    Channel, ChannelId, Pty, Sig, keys::PublicKey, server::{Auth, Msg, Session as Connection}
};
use ssh_core::{
    signals, wire::{self, EnvMsg, ExecMsg, PtyRequestMsg, SignalMsg, SubsysMsg, WindowChangeMsg}
};
use tracing::{debug, info, warn};

use super::{DaemonState, display_addr};
use crate::{
    session::{ChannelIo, RusshChannel, Session, SessionRequest}, tcpip::DirectTcpipHandler
};

/// Tracks one daemon connection and the session channels opened on it.
pub struct DaemonHandler {
    state: Arc<DaemonState>,
    peer_addr: Option<SocketAddr>,
    user: Option<String>,
    sessions: HashMap<ChannelId, Session>,
    connected_at: Instant,
}

impl DaemonHandler {
    pub(super) fn new(peer_addr: Option<SocketAddr>, state: Arc<DaemonState>) -> Self {
        Self {
            state,
            peer_addr,
            user: None,
            sessions: HashMap::new(),
            connected_at: Instant::now(),
        }
    }

    /// Route a channel request to its session and send the reply.
    fn dispatch(&mut self, channel: ChannelId, request: SessionRequest, connection: &mut Connection) -> Result<(), russh::Error> {
        let ok = match self.sessions.get(&channel) {
            Some(session) => session.handle(request),
            None => {
                debug!(%channel, request = request.name(), "request on a non-session channel");
                false
            }
        };
        reply(connection, channel, ok)
    }
}

fn reply(connection: &mut Connection, channel: ChannelId, ok: bool) -> Result<(), russh::Error> {
    if ok {
        connection.channel_success(channel)
    } else {
        connection.channel_failure(channel)
    }
}

impl Drop for DaemonHandler {
    fn drop(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.channel_closed();
        }
        info!(
            peer = %display_addr(self.peer_addr),
            user = %self.user.as_deref().unwrap_or("<unauthenticated>"),
            duration = ?self.connected_at.elapsed(),
            "client disconnected",
        );
    }
}

impl russh::server::Handler for DaemonHandler {
    type Error = russh::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.state.auth.check_none(user))
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        Ok(self.state.auth.check_publickey(user, public_key))
    }

    async fn auth_succeeded(&mut self, _connection: &mut Connection) -> Result<(), Self::Error> {
        info!(peer = %display_addr(self.peer_addr), "client authenticated");
        Ok(())
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, connection: &mut Connection) -> Result<bool, Self::Error> {
        let id = channel.id();
        let control = RusshChannel::new(connection.handle(), id);
        let label = format!("{}/{id}", display_addr(self.peer_addr));
        let session = Session::new(label, self.state.sessions.clone(), control, ChannelIo::from_stream(channel.into_stream()));
        self.sessions.insert(id, session);
        debug!(channel = %id, "session channel opened");
        Ok(true)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        connection: &mut Connection,
    ) -> Result<bool, Self::Error> {
        let msg = wire::ChannelOpenDirectTcpipMsg {
            target_addr: host_to_connect.to_string(),
            target_port: port_to_connect,
            origin_addr: originator_address.to_string(),
            origin_port: originator_port,
        };
        match self.state.tcpip.open(&msg).await {
            Ok(target) => {
                tokio::spawn(DirectTcpipHandler::bridge(channel, target, connection.handle()));
                Ok(true)
            }
            Err(rejection) => {
                // russh picks the failure reason on its own; keep the detail in the log.
                warn!(reason = ?rejection.reason, message = %rejection.message, "direct-tcpip rejected");
                Ok(false)
            }
        }
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        connection: &mut Connection,
    ) -> Result<(), Self::Error> {
        let msg = EnvMsg {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.dispatch(channel, SessionRequest::Env(msg), connection)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        connection: &mut Connection,
    ) -> Result<(), Self::Error> {
        let msg = PtyRequestMsg {
            term: term.to_string(),
            columns: col_width,
            rows: row_height,
            width: pix_width,
            height: pix_height,
            modelist: wire::encode_modelist(modes),
        };
        self.dispatch(channel, SessionRequest::Pty(msg), connection)
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        connection: &mut Connection,
    ) -> Result<(), Self::Error> {
        let msg = WindowChangeMsg {
            columns: col_width,
            rows: row_height,
            width_px: pix_width,
            height_px: pix_height,
        };
        self.dispatch(channel, SessionRequest::WindowChange(msg), connection)
    }

    async fn signal(&mut self, channel: ChannelId, signal: Sig, connection: &mut Connection) -> Result<(), Self::Error> {
        let msg = SignalMsg {
            signal: signals::sig_name(&signal),
        };
        self.dispatch(channel, SessionRequest::Signal(msg), connection)
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], connection: &mut Connection) -> Result<(), Self::Error> {
        let msg = ExecMsg {
            command: String::from_utf8_lossy(data).into_owned(),
        };
        self.dispatch(channel, SessionRequest::Exec(msg), connection)
    }

    async fn shell_request(&mut self, channel: ChannelId, connection: &mut Connection) -> Result<(), Self::Error> {
        self.dispatch(channel, SessionRequest::Shell, connection)
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, connection: &mut Connection) -> Result<(), Self::Error> {
        let msg = SubsysMsg {
            subsystem: name.to_string(),
        };
        self.dispatch(channel, SessionRequest::Subsystem(msg), connection)
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        connection: &mut Connection,
    ) -> Result<(), Self::Error> {
        self.dispatch(channel, SessionRequest::Unsupported("x11-req".into()), connection)
    }

    async fn agent_request(&mut self, channel: ChannelId, _connection: &mut Connection) -> Result<bool, Self::Error> {
        debug!(%channel, "agent forwarding refused");
        Ok(false)
    }

    async fn channel_close(&mut self, channel: ChannelId, _connection: &mut Connection) -> Result<(), Self::Error> {
        if let Some(session) = self.sessions.remove(&channel) {
            session.channel_closed();
        }
        Ok(())
    }
}
