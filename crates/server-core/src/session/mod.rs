//! Session channel handling: env, pty, signals, exec/shell/subsystem dispatch.
//!
//! A [`Session`] owns the state of one `"session"` channel. Requests are fed
//! to [`Session::handle`], which returns the reply for the client. Commands
//! run in background tasks that report the exit status and then call
//! [`Session::destroy`].

mod command;
mod control;
mod keepalive;
mod piped;
mod pty;
mod request;

use std::{
    collections::HashMap, io, mem, sync::{Arc, Mutex, MutexGuard, PoisonError}, time::Duration
};

pub use command::{build_environment, is_scp_command, session_environment};
pub use control::{ChannelControl, RusshChannel};
use nix::sys::signal::Signal;
pub use piped::PipedCopies;
use pty::PtyMaster;
pub use request::SessionRequest;
use ssh_core::wire::{PtyRequestMsg, SignalMsg, SubsysMsg, WindowChangeMsg};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt}, process::{Child, Command}, sync::oneshot, task::JoinHandle
};
use tracing::{debug, info, warn};

use crate::{
    error::{ServerError, ServerResult}, runner::{DefaultShellLocator, ExitReport, ProcessRunner, Runner, ShellLocator}, scp::{ProcessScpCopier, ScpCopier}, sftp::{ProcessSftpServer, SftpServer}
};

pub type ChannelReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ChannelWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The data stream of a session channel, split into halves.
pub struct ChannelIo {
    pub reader: ChannelReader,
    pub writer: ChannelWriter,
}

impl ChannelIo {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Collaborators and settings shared by every session of a daemon.
pub struct SessionContext {
    pub runner: Arc<dyn Runner>,
    pub shell: Arc<dyn ShellLocator>,
    pub scp: Arc<dyn ScpCopier>,
    pub sftp: Arc<dyn SftpServer>,
    pub default_env: HashMap<String, String>,
    pub keepalive_interval: Duration,
}

impl SessionContext {
    /// Local process execution with the stock SCP and SFTP engines.
    pub fn local(default_env: HashMap<String, String>, keepalive_interval: Duration, sftp_server_path: impl Into<std::path::PathBuf>) -> Self {
        let runner: Arc<dyn Runner> = Arc::new(ProcessRunner);
        Self {
            scp: Arc::new(ProcessScpCopier::new(runner.clone())),
            sftp: Arc::new(ProcessSftpServer::new(sftp_server_path, runner.clone())),
            runner,
            shell: Arc::new(DefaultShellLocator),
            default_env,
            keepalive_interval,
        }
    }
}

#[derive(Default)]
struct State {
    env: HashMap<String, String>,
    alloc_pty: bool,
    pty_request: PtyRequestMsg,
    started: bool,
    pid: Option<u32>,
    pty_master: Option<Arc<PtyMaster>>,
    keepalive_stop: Option<oneshot::Sender<()>>,
}

struct Shared {
    label: String,
    ctx: Arc<SessionContext>,
    control: Arc<dyn ChannelControl>,
    state: Mutex<State>,
    io: Mutex<Option<ChannelIo>>,
    // Joined by destroy before the channel closes.
    tracked: Mutex<Vec<JoinHandle<()>>>,
    // Aborted by destroy.
    detached: Mutex<Vec<JoinHandle<()>>>,
    complete: tokio::sync::Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State of one `"session"` channel.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(label: impl Into<String>, ctx: Arc<SessionContext>, control: Arc<dyn ChannelControl>, io: ChannelIo) -> Self {
        let state = State {
            env: ctx.default_env.clone(),
            ..Default::default()
        };
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                ctx,
                control,
                state: Mutex::new(state),
                io: Mutex::new(Some(io)),
                tracked: Mutex::new(Vec::new()),
                detached: Mutex::new(Vec::new()),
                complete: tokio::sync::Mutex::new(false),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.shared.state)
    }

    /// Apply a request and return whether it succeeded.
    pub fn handle(&self, request: SessionRequest) -> bool {
        debug!(session = %self.shared.label, request = request.name(), "received request");
        match request {
            SessionRequest::Env(msg) => {
                self.state().env.insert(msg.name, msg.value);
                true
            }
            SessionRequest::Signal(msg) => {
                self.handle_signal(&msg);
                true
            }
            SessionRequest::Pty(msg) => {
                let mut state = self.state();
                state.alloc_pty = true;
                state.env.insert("TERM".to_string(), msg.term.clone());
                state.pty_request = msg;
                true
            }
            SessionRequest::WindowChange(msg) => {
                self.handle_window_change(&msg);
                true
            }
            SessionRequest::Exec(msg) if is_scp_command(&msg.command) => self.execute_scp(msg.command),
            SessionRequest::Exec(msg) => self.execute_shell(vec!["-c".to_string(), msg.command]),
            SessionRequest::Shell => self.execute_shell(Vec::new()),
            SessionRequest::Subsystem(msg) => self.handle_subsystem(msg),
            SessionRequest::Unsupported(name) => {
                debug!(session = %self.shared.label, request = %name, "rejecting unsupported request");
                false
            }
        }
    }

    fn handle_signal(&self, msg: &SignalMsg) {
        let Some(pid) = self.state().pid else {
            debug!(signal = %msg.signal, "no running command to signal");
            return;
        };
        let Some(signal) = ssh_core::signals::from_ssh_name(&msg.signal) else {
            warn!(signal = %msg.signal, "unknown signal name");
            return;
        };
        if let Err(err) = self.shared.ctx.runner.signal(pid, signal) {
            warn!(pid, signal = %msg.signal, error = %err, "process signal failed");
        }
    }

    fn handle_window_change(&self, msg: &WindowChangeMsg) {
        let mut state = self.state();
        if state.alloc_pty {
            state.pty_request.columns = msg.columns;
            state.pty_request.rows = msg.rows;
            state.pty_request.width = msg.width_px;
            state.pty_request.height = msg.height_px;
        }
        if let Some(master) = &state.pty_master {
            let req = &state.pty_request;
            master.resize(req.columns, req.rows, req.width, req.height);
        }
    }

    fn handle_subsystem(&self, msg: SubsysMsg) -> bool {
        if msg.subsystem != "sftp" {
            info!(subsystem = %msg.subsystem, "unsupported subsystem");
            return false;
        }
        if !self.shared.ctx.sftp.available() {
            warn!("sftp server is not available");
            return false;
        }
        let io = match self.begin_execution() {
            Ok(io) => io,
            Err(err) => {
                warn!(error = %err, "cannot start sftp subsystem");
                return false;
            }
        };

        let session = self.clone();
        tokio::spawn(async move {
            info!(session = %session.shared.label, "starting sftp server");
            let control = session.shared.control.clone();
            if let Err(err) = session.shared.ctx.sftp.serve(io, control).await {
                warn!(error = %err, "sftp server ended with error");
            }
            session.destroy().await;
        });
        true
    }

    fn execute_scp(&self, command: String) -> bool {
        let prepared = {
            let mut state = self.state();
            self.take_io(&mut state).map(|io| (io, session_environment(&state.env)))
        };
        let (io, env) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(error = %err, "cannot start scp");
                return false;
            }
        };

        let session = self.clone();
        tokio::spawn(async move {
            info!(session = %session.shared.label, command = %command, "handling scp command");
            let control = session.shared.control.clone();
            let result = session.shared.ctx.scp.copy(&command, &env, io, control).await;
            if let Err(err) = &result {
                warn!(error = %err, "scp failed");
            }
            session.send_exit(ExitReport::from_copy(&result)).await;
            session.destroy().await;
        });
        true
    }

    fn execute_shell(&self, args: Vec<String>) -> bool {
        let prepared = {
            let mut state = self.state();
            self.take_io(&mut state).map(|io| {
                let shell = self.shared.ctx.shell.shell_path();
                let command = command::shell_command(&shell, &args, &state.env);
                (command, state.alloc_pty.then(|| state.pty_request.clone()), io)
            })
        };
        let (command, pty_request, io) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(session = %self.shared.label, error = %err, "failed to create command");
                return false;
            }
        };

        let session = self.clone();
        tokio::spawn(async move { session.run(command, pty_request, io).await });
        true
    }

    /// Claim the channel stream for the single command this session may run.
    fn begin_execution(&self) -> ServerResult<ChannelIo> {
        let mut state = self.state();
        self.take_io(&mut state)
    }

    fn take_io(&self, state: &mut State) -> ServerResult<ChannelIo> {
        if state.started {
            return Err(ServerError::CommandAlreadyStarted);
        }
        let io = lock(&self.shared.io).take().ok_or(ServerError::ChannelClosed)?;
        state.started = true;
        Ok(io)
    }

    async fn run(&self, command: Command, pty_request: Option<PtyRequestMsg>, io: ChannelIo) {
        let started = match &pty_request {
            Some(request) => self.start_with_pty(command, request, io).map(|child| (child, None)),
            None => self.start_piped(command, io).map(|(child, copies)| (child, Some(copies))),
        };
        let (mut child, copies) = match started {
            Ok(started) => started,
            Err(err) => {
                warn!(session = %self.shared.label, error = %err, "failed to start command");
                self.send_exit(ExitReport::FAILED).await;
                self.destroy().await;
                return;
            }
        };

        let result = self.shared.ctx.runner.wait(&mut child).await;
        self.state().pid = None;
        if let Err(err) = &result {
            warn!(session = %self.shared.label, error = %err, "wait failed");
        }
        if let Some(copies) = copies {
            copies.finish().await;
        }
        self.send_exit(ExitReport::from_wait(&result)).await;
        self.destroy().await;
    }

    fn start_with_pty(&self, mut command: Command, request: &PtyRequestMsg, io: ChannelIo) -> io::Result<Child> {
        let master = Arc::new(pty::attach(&mut command, request)?);
        self.state().pty_master = Some(master.clone());

        let ChannelIo { mut reader, mut writer } = io;
        let to_pty = {
            let master = master.clone();
            tokio::spawn(async move { copy_to_pty(&mut reader, &master).await })
        };
        lock(&self.shared.detached).push(to_pty);

        let from_pty = tokio::spawn(async move {
            copy_from_pty(&master, &mut writer).await;
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, "close-write failed");
            }
        });
        lock(&self.shared.tracked).push(from_pty);

        let child = self.shared.ctx.runner.start(command)?;
        if let Some(pid) = child.id() {
            let (stop_tx, stop_rx) = oneshot::channel();
            let ticker = keepalive::spawn(
                self.shared.control.clone(),
                self.shared.ctx.runner.clone(),
                pid,
                self.shared.ctx.keepalive_interval,
                stop_rx,
            );
            lock(&self.shared.detached).push(ticker);
            let mut state = self.state();
            state.pid = Some(pid);
            state.keepalive_stop = Some(stop_tx);
        }
        Ok(child)
    }

    fn start_piped(&self, mut command: Command, io: ChannelIo) -> io::Result<(Child, PipedCopies)> {
        command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        let mut child = self.shared.ctx.runner.start(command)?;
        self.state().pid = child.id();
        let copies = PipedCopies::wire(&mut child, io, self.shared.control.clone());
        Ok((child, copies))
    }

    async fn send_exit(&self, report: ExitReport) {
        let control = &self.shared.control;
        let result = match &report {
            ExitReport::Status(status) => control.exit_status(*status).await,
            ExitReport::Signal(msg) => control.exit_signal(msg).await,
        };
        match result {
            Ok(()) => info!(session = %self.shared.label, ?report, "sent exit message"),
            Err(err) => warn!(session = %self.shared.label, error = %err, "failed to send exit message"),
        }
    }

    /// The peer closed the channel; tear the session down in the background.
    pub fn channel_closed(&self) {
        self.shared.control.mark_closed();
        let session = self.clone();
        tokio::spawn(async move { session.destroy().await });
    }

    /// Release everything the session holds. Safe to call repeatedly.
    ///
    /// Hangs up a pty command if the peer is gone, waits for the pty-to-channel
    /// copy, closes the channel, drops the pty master and stops the keepalive.
    pub async fn destroy(&self) {
        let mut complete = self.shared.complete.lock().await;
        if *complete {
            return;
        }
        *complete = true;

        let peer_gone = self.shared.control.is_closed();
        if peer_gone {
            self.hang_up();
        }

        let tracked = mem::take(&mut *lock(&self.shared.tracked));
        for handle in tracked {
            if peer_gone {
                handle.abort();
            }
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    debug!(session = %self.shared.label, error = %err, "copy task failed");
                }
            }
        }

        if let Err(err) = self.shared.control.close().await {
            debug!(session = %self.shared.label, error = %err, "channel close failed");
        }

        let (master, stop) = {
            let mut state = self.state();
            (state.pty_master.take(), state.keepalive_stop.take())
        };
        if let Some(stop) = stop {
            if stop.send(()).is_err() {
                debug!(session = %self.shared.label, "keepalive already stopped");
            }
        }
        for handle in mem::take(&mut *lock(&self.shared.detached)) {
            handle.abort();
        }
        drop(master);
        lock(&self.shared.io).take();
        debug!(session = %self.shared.label, "session destroyed");
    }

    /// Send SIGHUP to a running pty command once its peer has gone away.
    fn hang_up(&self) {
        let pid = {
            let state = self.state();
            state.pty_master.as_ref().and(state.pid)
        };
        let Some(pid) = pid else {
            return;
        };
        match self.shared.ctx.runner.signal(pid, Signal::SIGHUP) {
            Ok(()) => info!(session = %self.shared.label, pid, "peer gone; process hung up"),
            Err(err) => warn!(session = %self.shared.label, pid, error = %err, "peer gone; hangup signal failed"),
        }
    }

    pub fn is_started(&self) -> bool {
        self.state().started
    }
}

async fn copy_to_pty(reader: &mut ChannelReader, master: &PtyMaster) {
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = master.write_all(&buf[..n]).await {
                    debug!(error = %err, "write to pty failed");
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "channel read ended with error");
                break;
            }
        }
    }
}

async fn copy_from_pty(master: &PtyMaster, writer: &mut ChannelWriter) {
    let mut buf = vec![0u8; 8192];
    loop {
        match master.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = writer.write_all(&buf[..n]).await {
                    debug!(error = %err, "channel write failed");
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "pty read ended with error");
                break;
            }
        }
    }
    if let Err(err) = writer.flush().await {
        debug!(error = %err, "channel flush failed");
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
