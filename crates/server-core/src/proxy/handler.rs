//! Per-connection russh handler for the proxy.

use std::{
    collections::HashMap, net::SocketAddr, sync::{
        Arc, atomic::{AtomicBool, Ordering}
    }, time::Instant
};

use client_core::{LogMessage, Permissions, TargetConfig, new_client_conn, parse_log_message};
use russh::{
    Channel, ChannelId, Disconnect, Pty, Sig, client, keys::PublicKey, server::{self, Auth, Msg, Session as Connection}
};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use super::{
    ProxyState, backend::BackendHandler, relay::{self, ForwardedRequest, RelaySender}, telemetry
};
use crate::daemon::display_addr;

/// The target connection paired with one client connection.
struct BackendLink {
    handle: Mutex<client::Handle<BackendHandler>>,
    frontend: server::Handle,
    state: Arc<ProxyState>,
    target: TargetConfig,
    user: String,
    log_message: Option<LogMessage>,
    torn_down: AtomicBool,
}

impl BackendLink {
    /// Close both connections once, whichever side ended first.
    fn teardown(self: &Arc<Self>, reason: &'static str) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.connections.decrement();
        if let Some(start) = &self.log_message {
            telemetry::emit_app_log(&telemetry::ended_message(start, &self.user));
        }
        info!(user = %self.user, target = %self.target.address, reason, "proxied connection closed");

        let link = self.clone();
        tokio::spawn(async move {
            if let Err(err) = link.handle.lock().await.disconnect(Disconnect::ByApplication, reason, "en").await {
                debug!(error = %err, "target disconnect failed");
            }
            if let Err(err) = link
                .frontend
                .disconnect(Disconnect::ByApplication, reason.to_string(), "en".to_string())
                .await
            {
                debug!(error = %err, "client disconnect failed");
            }
        });
    }
}

/// Tracks one inbound connection, its target link and its relayed channels.
pub struct ProxyHandler {
    state: Arc<ProxyState>,
    peer_addr: Option<SocketAddr>,
    user: Option<String>,
    permissions: Option<Permissions>,
    link: Option<Arc<BackendLink>>,
    relays: HashMap<ChannelId, RelaySender>,
    connected_at: Instant,
}

impl ProxyHandler {
    pub(super) fn new(peer_addr: Option<SocketAddr>, state: Arc<ProxyState>) -> Self {
        Self {
            state,
            peer_addr,
            user: None,
            permissions: None,
            link: None,
            relays: HashMap::new(),
            connected_at: Instant::now(),
        }
    }

    fn granted(&mut self, user: &str, permissions: Option<Permissions>) -> Auth {
        match permissions {
            Some(permissions) => {
                self.user = Some(user.to_string());
                self.permissions = Some(permissions);
                Auth::Accept
            }
            None => Auth::Reject {
                proceed_with_methods: Some(self.state.authenticator.methods()),
                partial_success: false,
            },
        }
    }

    /// Dial and authenticate the target, then start watching it.
    async fn connect_backend(&mut self, frontend: server::Handle) -> Result<(), client_core::ClientError> {
        let permissions = self.permissions.take();
        let log_message = match parse_log_message(permissions.as_ref()) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "ignoring malformed log message");
                None
            }
        };

        let (gone_tx, gone_rx) = oneshot::channel();
        let backend_frontend = frontend.clone();
        let (handle, target) = new_client_conn(permissions.as_ref(), self.state.client_config.clone(), move |check| {
            BackendHandler::new(check, backend_frontend, gone_tx)
        })
        .await?;

        self.state.connections.increment();
        if let Some(message) = &log_message {
            telemetry::emit_app_log(message);
        }

        let user = self.user.clone().unwrap_or_default();
        info!(user = %user, target = %target.address, "proxying connection");
        let link = Arc::new(BackendLink {
            handle: Mutex::new(handle),
            frontend,
            state: self.state.clone(),
            target,
            user,
            log_message,
            torn_down: AtomicBool::new(false),
        });

        let watcher = link.clone();
        tokio::spawn(async move {
            let _ = gone_rx.await;
            watcher.teardown("target connection closed");
        });
        self.link = Some(link);
        Ok(())
    }

    async fn forward(&mut self, channel: ChannelId, request: ForwardedRequest, connection: &mut Connection) -> Result<(), russh::Error> {
        let ok = match self.relays.get(&channel) {
            Some(relay) => relay::forward(relay, request).await,
            None => false,
        };
        if ok {
            connection.channel_success(channel)
        } else {
            connection.channel_failure(channel)
        }
    }
}

impl Drop for ProxyHandler {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            link.teardown("client connection closed");
        }
        info!(
            peer = %display_addr(self.peer_addr),
            user = %self.user.as_deref().unwrap_or("<unauthenticated>"),
            duration = ?self.connected_at.elapsed(),
            "client disconnected from proxy",
        );
    }
}

impl russh::server::Handler for ProxyHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let permissions = match self.state.authenticator.password(user, password).await {
            Ok(permissions) => permissions,
            Err(err) => {
                warn!(user, error = %err, "password authentication error");
                None
            }
        };
        Ok(self.granted(user, permissions))
    }

    async fn auth_publickey(&mut self, user: &str, public_key: &PublicKey) -> Result<Auth, Self::Error> {
        let permissions = match self.state.authenticator.public_key(user, public_key).await {
            Ok(permissions) => permissions,
            Err(err) => {
                warn!(user, error = %err, "public key authentication error");
                None
            }
        };
        Ok(self.granted(user, permissions))
    }

    async fn auth_succeeded(&mut self, connection: &mut Connection) -> Result<(), Self::Error> {
        if let Err(err) = self.connect_backend(connection.handle()).await {
            warn!(peer = %display_addr(self.peer_addr), error = %err, "failed to connect to target");
            connection.disconnect(Disconnect::ByApplication, "target unavailable", "en")?;
        }
        Ok(())
    }

    async fn channel_open_session(&mut self, channel: Channel<Msg>, connection: &mut Connection) -> Result<bool, Self::Error> {
        let Some(link) = self.link.clone() else {
            return Ok(false);
        };
        let opened = link.handle.lock().await.channel_open_session().await;
        match opened {
            Ok(back) => {
                let id = channel.id();
                self.relays.insert(id, relay::spawn(channel, connection.handle(), back));
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "target refused session channel");
                Ok(false)
            }
        }
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
        let Some(link) = self.link.clone() else {
            return Ok(false);
        };
        let opened = link
            .handle
            .lock()
            .await
            .channel_open_direct_tcpip(host_to_connect, port_to_connect, originator_address, originator_port)
            .await;
        match opened {
            Ok(back) => {
                let id = channel.id();
                self.relays.insert(id, relay::spawn(channel, connection.handle(), back));
                Ok(true)
            }
            Err(err) => {
                warn!(target = %format!("{host_to_connect}:{port_to_connect}"), error = %err, "target refused direct-tcpip channel");
                Ok(false)
            }
        }
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
        let request = ForwardedRequest::Pty {
            term: term.to_string(),
            columns: col_width,
            rows: row_height,
            width: pix_width,
            height: pix_height,
            modes: modes.to_vec(),
        };
        self.forward(channel, request, connection).await
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        connection: &mut Connection,
    ) -> Result<(), Self::Error> {
        let request = ForwardedRequest::Env {
            name: variable_name.to_string(),
            value: variable_value.to_string(),
        };
        self.forward(channel, request, connection).await
    }

    async fn shell_request(&mut self, channel: ChannelId, connection: &mut Connection) -> Result<(), Self::Error> {
        self.forward(channel, ForwardedRequest::Shell, connection).await
    }

    async fn exec_request(&mut self, channel: ChannelId, data: &[u8], connection: &mut Connection) -> Result<(), Self::Error> {
        self.forward(channel, ForwardedRequest::Exec(data.to_vec()), connection).await
    }

    async fn subsystem_request(&mut self, channel: ChannelId, name: &str, connection: &mut Connection) -> Result<(), Self::Error> {
        self.forward(channel, ForwardedRequest::Subsystem(name.to_string()), connection)
            .await
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
        let request = ForwardedRequest::WindowChange {
            columns: col_width,
            rows: row_height,
            width: pix_width,
            height: pix_height,
        };
        self.forward(channel, request, connection).await
    }

    async fn signal(&mut self, channel: ChannelId, signal: Sig, connection: &mut Connection) -> Result<(), Self::Error> {
        self.forward(channel, ForwardedRequest::Signal(signal), connection).await
    }

    async fn tcpip_forward(&mut self, address: &str, port: &mut u32, _connection: &mut Connection) -> Result<bool, Self::Error> {
        let Some(link) = self.link.clone() else {
            return Ok(false);
        };
        let result = link.handle.lock().await.tcpip_forward(address, *port).await;
        match result {
            Ok(bound) => {
                if bound != 0 {
                    *port = bound;
                }
                info!(address, port = *port, "remote forward established on target");
                Ok(true)
            }
            Err(err) => {
                warn!(address, port = *port, error = %err, "target refused tcpip-forward");
                Ok(false)
            }
        }
    }

    async fn cancel_tcpip_forward(&mut self, address: &str, port: u32, _connection: &mut Connection) -> Result<bool, Self::Error> {
        let Some(link) = self.link.clone() else {
            return Ok(false);
        };
        let result = link.handle.lock().await.cancel_tcpip_forward(address, port).await;
        match result {
            Ok(()) => Ok(true),
            Err(err) => {
                warn!(address, port, error = %err, "target refused cancel-tcpip-forward");
                Ok(false)
            }
        }
    }

    async fn channel_close(&mut self, channel: ChannelId, _connection: &mut Connection) -> Result<(), Self::Error> {
        self.relays.remove(&channel);
        Ok(())
    }
}
