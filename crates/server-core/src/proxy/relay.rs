//! Byte and request relay between a client channel and its target channel.
//!
//! One task per channel pair. Data, extended data and EOF flow both ways.
//! Requests from the client arrive as [`RelayCommand`]s; their replies come
//! back from the target in order. Client requests are forwarded for the whole
//! life of the pair; only the first exit status or signal from the target is
//! passed on to the client.

use std::collections::VecDeque;

use russh::{
    Channel, ChannelId, ChannelMsg, CryptoVec, Pty, Sig, client, server
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A channel request to replay on the target side.
#[derive(Debug, Clone)]
pub enum ForwardedRequest {
    Pty {
        term: String,
        columns: u32,
        rows: u32,
        width: u32,
        height: u32,
        modes: Vec<(Pty, u32)>,
    },
    Env {
        name: String,
        value: String,
    },
    Shell,
    Exec(Vec<u8>),
    Subsystem(String),
    WindowChange {
        columns: u32,
        rows: u32,
        width: u32,
        height: u32,
    },
    Signal(Sig),
}

impl ForwardedRequest {
    /// Requests whose result the client may be waiting for.
    pub fn wants_reply(&self) -> bool {
        !matches!(self, Self::WindowChange { .. } | Self::Signal(_))
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Pty { .. } => "pty-req",
            Self::Env { .. } => "env",
            Self::Shell => "shell",
            Self::Exec(_) => "exec",
            Self::Subsystem(_) => "subsystem",
            Self::WindowChange { .. } => "window-change",
            Self::Signal(_) => "signal",
        }
    }
}

pub struct RelayCommand {
    request: ForwardedRequest,
    reply: Option<oneshot::Sender<bool>>,
}

pub type RelaySender = mpsc::UnboundedSender<RelayCommand>;

/// Queue `request` on the relay and wait for the target's answer.
///
/// Requests that carry no reply report success as soon as they are queued.
pub async fn forward(relay: &RelaySender, request: ForwardedRequest) -> bool {
    if !request.wants_reply() {
        return relay.send(RelayCommand { request, reply: None }).is_ok();
    }
    let (tx, rx) = oneshot::channel();
    if relay.send(RelayCommand { request, reply: Some(tx) }).is_err() {
        return false;
    }
    rx.await.unwrap_or(false)
}

/// Start relaying between `front` (client side) and `back` (target side).
pub fn spawn(front: Channel<server::Msg>, front_handle: server::Handle, back: Channel<client::Msg>) -> RelaySender {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(front, front_handle, back, rx));
    tx
}

async fn run(
    mut front: Channel<server::Msg>,
    front_handle: server::Handle,
    mut back: Channel<client::Msg>,
    mut commands: mpsc::UnboundedReceiver<RelayCommand>,
) {
    let front_id = front.id();
    let mut pending: VecDeque<oneshot::Sender<bool>> = VecDeque::new();
    let mut exit_forwarded = false;
    let mut commands_open = true;

    loop {
        tokio::select! {
            msg = front.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if back.data(&data[..]).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if back.extended_data(ext, &data[..]).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        let _ = back.eof().await;
                    }
                    Some(ChannelMsg::Close) | None => {
                        debug!(channel = %front_id, "client closed channel");
                        let _ = back.close().await;
                        break;
                    }
                    _ => {}
                }
            }
            msg = back.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if front_handle.data(front_id, CryptoVec::from_slice(&data)).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        if front_handle.extended_data(front_id, ext, CryptoVec::from_slice(&data)).await.is_err() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Eof) => {
                        let _ = front_handle.eof(front_id).await;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        if !exit_forwarded {
                            exit_forwarded = true;
                            if front_handle.exit_status_request(front_id, exit_status).await.is_err() {
                                warn!(channel = %front_id, "failed to forward exit-status");
                            }
                        }
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, core_dumped, error_message, lang_tag }) => {
                        if !exit_forwarded {
                            exit_forwarded = true;
                            if front_handle
                                .exit_signal_request(front_id, signal_name, core_dumped, error_message, lang_tag)
                                .await
                                .is_err()
                            {
                                warn!(channel = %front_id, "failed to forward exit-signal");
                            }
                        }
                    }
                    Some(ChannelMsg::Success) => resolve(&mut pending, true),
                    Some(ChannelMsg::Failure) => resolve(&mut pending, false),
                    Some(ChannelMsg::Close) | None => {
                        debug!(channel = %front_id, "target closed channel");
                        let _ = front_handle.close(front_id).await;
                        break;
                    }
                    _ => {}
                }
            }
            command = commands.recv(), if commands_open => {
                match command {
                    Some(command) => forward_request(&back, front_id, command, &mut pending).await,
                    None => commands_open = false,
                }
            }
        }
    }
}

async fn forward_request(
    back: &Channel<client::Msg>,
    channel: ChannelId,
    command: RelayCommand,
    pending: &mut VecDeque<oneshot::Sender<bool>>,
) {
    let RelayCommand { request, reply } = command;
    let want_reply = reply.is_some();
    let name = request.name();
    let sent = match request {
        ForwardedRequest::Pty {
            term,
            columns,
            rows,
            width,
            height,
            modes,
        } => back.request_pty(want_reply, &term, columns, rows, width, height, &modes).await,
        ForwardedRequest::Env { name, value } => back.set_env(want_reply, name, value).await,
        ForwardedRequest::Shell => back.request_shell(want_reply).await,
        ForwardedRequest::Exec(command) => back.exec(want_reply, command).await,
        ForwardedRequest::Subsystem(name) => back.request_subsystem(want_reply, name).await,
        ForwardedRequest::WindowChange {
            columns,
            rows,
            width,
            height,
        } => back.window_change(columns, rows, width, height).await,
        ForwardedRequest::Signal(sig) => back.signal(sig).await,
    };

    match (sent, reply) {
        (Ok(()), Some(reply)) => pending.push_back(reply),
        (Ok(()), None) => {}
        (Err(err), reply) => {
            warn!(%channel, request = name, error = %err, "failed to forward request");
            if let Some(reply) = reply {
                let _ = reply.send(false);
            }
        }
    }
}

fn resolve(pending: &mut VecDeque<oneshot::Sender<bool>>, ok: bool) {
    match pending.pop_front() {
        Some(reply) => {
            let _ = reply.send(ok);
        }
        None => debug!(ok, "unexpected request reply from target"),
    }
}
