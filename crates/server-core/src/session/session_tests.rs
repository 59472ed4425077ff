use std::{
    collections::HashMap, process::ExitStatus, sync::{
        Mutex as StdMutex, atomic::{AtomicBool, AtomicUsize, Ordering}
    }, time::Duration
};

use async_trait::async_trait;
use ssh_core::wire::{EnvMsg, ExecMsg, ExitSignalMsg, PtyRequestMsg, SignalMsg, SubsysMsg, WindowChangeMsg};
use tokio::{
    io::{AsyncReadExt, DuplexStream}, sync::watch, time::timeout
};

use super::*;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Stderr(Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    Close,
}

struct RecordingControl {
    events: StdMutex<Vec<Event>>,
    closed_tx: watch::Sender<bool>,
    peer_closed: AtomicBool,
    fail_keepalive: AtomicBool,
    keepalives: AtomicUsize,
}

impl RecordingControl {
    fn new() -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            events: StdMutex::new(Vec::new()),
            closed_tx,
            peer_closed: Default::default(),
            fail_keepalive: Default::default(),
            keepalives: Default::default(),
        })
    }

    fn keepalives(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    async fn wait_closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        timeout(Duration::from_secs(10), rx.wait_for(|closed| *closed))
            .await
            .expect("session did not close in time")
            .unwrap();
    }

    fn stderr_text(&self) -> String {
        let bytes: Vec<u8> = self
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Stderr(data) => Some(data),
                _ => None,
            })
            .flatten()
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[async_trait]
impl ChannelControl for RecordingControl {
    async fn stderr(&self, data: &[u8]) -> ServerResult<()> {
        self.push(Event::Stderr(data.to_vec()));
        Ok(())
    }

    async fn exit_status(&self, status: u32) -> ServerResult<()> {
        self.push(Event::ExitStatus(status));
        Ok(())
    }

    async fn exit_signal(&self, message: &ExitSignalMsg) -> ServerResult<()> {
        self.push(Event::ExitSignal(message.signal.clone()));
        Ok(())
    }

    async fn keepalive(&self) -> ServerResult<()> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        if self.fail_keepalive.load(Ordering::SeqCst) {
            return Err(ServerError::ChannelClosed);
        }
        Ok(())
    }

    async fn close(&self) -> ServerResult<()> {
        self.push(Event::Close);
        self.closed_tx.send_replace(true);
        Ok(())
    }

    fn mark_closed(&self) {
        self.peer_closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.peer_closed.load(Ordering::SeqCst)
    }
}

/// Local processes, with every signal recorded.
#[derive(Default)]
struct RecordingRunner {
    signals: StdMutex<Vec<(u32, Signal)>>,
}

impl RecordingRunner {
    fn signals(&self) -> Vec<(u32, Signal)> {
        self.signals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Runner for RecordingRunner {
    fn start(&self, command: Command) -> io::Result<Child> {
        ProcessRunner.start(command)
    }

    async fn wait(&self, child: &mut Child) -> io::Result<ExitStatus> {
        ProcessRunner.wait(child).await
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        self.signals.lock().unwrap().push((pid, signal));
        ProcessRunner.signal(pid, signal)
    }
}

/// Records the command and environment instead of running scp.
#[derive(Default)]
struct RecordingScp {
    calls: StdMutex<Vec<(String, Vec<(String, String)>)>>,
}

#[async_trait]
impl ScpCopier for RecordingScp {
    async fn copy(
        &self,
        command: &str,
        env: &[(String, String)],
        _io: ChannelIo,
        _control: Arc<dyn ChannelControl>,
    ) -> ServerResult<()> {
        self.calls.lock().unwrap().push((command.to_string(), env.to_vec()));
        Ok(())
    }
}

struct UnavailableSftp;

#[async_trait]
impl SftpServer for UnavailableSftp {
    fn available(&self) -> bool {
        false
    }

    async fn serve(&self, _io: ChannelIo, _control: Arc<dyn ChannelControl>) -> ServerResult<()> {
        Err(ServerError::Other("unavailable".into()))
    }
}

fn context_with(runner: Arc<dyn Runner>, scp: Option<Arc<dyn ScpCopier>>, keepalive_interval: Duration) -> Arc<SessionContext> {
    let scp = match scp {
        Some(scp) => scp,
        None => Arc::new(ProcessScpCopier::new(runner.clone())),
    };
    Arc::new(SessionContext {
        scp,
        sftp: Arc::new(UnavailableSftp),
        runner,
        shell: Arc::new(DefaultShellLocator),
        default_env: HashMap::new(),
        keepalive_interval,
    })
}

fn session_in(ctx: Arc<SessionContext>) -> (Session, Arc<RecordingControl>, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let control = RecordingControl::new();
    let session = Session::new("test", ctx, control.clone(), ChannelIo::from_stream(server));
    (session, control, client)
}

fn session() -> (Session, Arc<RecordingControl>, DuplexStream) {
    session_in(context_with(Arc::new(ProcessRunner), None, Duration::from_secs(3600)))
}

fn env(name: &str, value: &str) -> SessionRequest {
    SessionRequest::Env(EnvMsg {
        name: name.into(),
        value: value.into(),
    })
}

fn pty(columns: u32, rows: u32) -> SessionRequest {
    SessionRequest::Pty(PtyRequestMsg {
        term: "xterm".into(),
        columns,
        rows,
        ..Default::default()
    })
}

async fn wait_for_pid(session: &Session) -> u32 {
    for _ in 0..200 {
        if let Some(pid) = session.state().pid {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("command did not start");
}

fn exec(command: &str) -> SessionRequest {
    SessionRequest::Exec(ExecMsg {
        command: command.to_string(),
    })
}

async fn read_all(client: &mut DuplexStream) -> String {
    let mut output = Vec::new();
    timeout(Duration::from_secs(10), client.read_to_end(&mut output))
        .await
        .expect("channel output did not end")
        .unwrap();
    String::from_utf8_lossy(&output).into_owned()
}

#[tokio::test]
async fn exec_reports_exit_status_and_closes() {
    let (session, control, mut client) = session();
    assert!(session.handle(exec("echo out; echo err >&2; exit 3")));

    assert_eq!(read_all(&mut client).await, "out\n");
    control.wait_closed().await;

    assert_eq!(control.stderr_text(), "err\n");
    let events = control.events();
    let tail: Vec<_> = events.iter().filter(|e| !matches!(e, Event::Stderr(_))).cloned().collect();
    assert_eq!(tail, vec![Event::ExitStatus(3), Event::Close]);
}

#[tokio::test]
async fn signaled_process_reports_exit_signal() {
    let (session, control, _client) = session();
    assert!(session.handle(exec("kill -USR2 $$")));
    control.wait_closed().await;

    assert!(control.events().contains(&Event::ExitSignal("USR2".to_string())));
}

#[tokio::test]
async fn second_execution_is_rejected() {
    let (session, control, _client) = session();
    assert!(session.handle(exec("sleep 0.2")));
    assert!(!session.handle(exec("true")));
    assert!(!session.handle(SessionRequest::Shell));
    control.wait_closed().await;
    assert!(session.is_started());
}

#[tokio::test]
async fn client_env_cannot_override_home_or_user() {
    let (session, control, mut client) = session();
    for (name, value) in [("FOO", "bar"), ("HOME", "/evil"), ("PATH", "/nowhere")] {
        assert!(session.handle(SessionRequest::Env(EnvMsg {
            name: name.into(),
            value: value.into(),
        })));
    }
    assert!(session.handle(exec("echo \"$FOO $HOME $PATH\"")));

    let output = read_all(&mut client).await;
    let home = std::env::var("HOME").unwrap_or_default();
    assert_eq!(output, format!("bar {home} /nowhere\n"));
    control.wait_closed().await;
}

#[tokio::test]
async fn stdin_reaches_command() {
    let (session, control, client) = session();
    let (mut read_half, mut write_half) = tokio::io::split(client);
    assert!(session.handle(exec("cat")));

    write_half.write_all(b"ping\n").await.unwrap();
    write_half.shutdown().await.unwrap();

    let mut output = String::new();
    timeout(Duration::from_secs(10), read_half.read_to_string(&mut output))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(output, "ping\n");
    control.wait_closed().await;
    assert!(control.events().contains(&Event::ExitStatus(0)));
}

#[tokio::test]
async fn pty_command_sees_requested_geometry() {
    let (session, control, mut client) = session();
    assert!(session.handle(SessionRequest::Pty(PtyRequestMsg {
        term: "xterm".into(),
        columns: 132,
        rows: 50,
        ..Default::default()
    })));
    assert!(session.handle(exec("stty size; echo $TERM")));

    let output = read_all(&mut client).await;
    assert!(output.contains("50 132"), "{output}");
    assert!(output.contains("xterm"), "{output}");
    control.wait_closed().await;
    assert!(control.events().contains(&Event::ExitStatus(0)));
}

#[tokio::test]
async fn window_change_before_start_updates_pty_request() {
    let (session, _control, _client) = session();
    assert!(session.handle(SessionRequest::Pty(PtyRequestMsg::default())));
    assert!(session.handle(SessionRequest::WindowChange(WindowChangeMsg {
        columns: 90,
        rows: 30,
        width_px: 0,
        height_px: 0,
    })));
    let state = session.state();
    assert_eq!((state.pty_request.columns, state.pty_request.rows), (90, 30));
}

#[tokio::test]
async fn window_change_without_pty_is_ignored() {
    let (session, _control, _client) = session();
    assert!(session.handle(SessionRequest::WindowChange(WindowChangeMsg {
        columns: 90,
        rows: 30,
        width_px: 0,
        height_px: 0,
    })));
    assert_eq!(session.state().pty_request.columns, 0);
}

#[tokio::test]
async fn signal_without_process_is_accepted() {
    let (session, control, _client) = session();
    assert!(session.handle(SessionRequest::Signal(SignalMsg { signal: "TERM".into() })));
    assert!(control.events().is_empty());
}

#[tokio::test]
async fn unsupported_requests_and_subsystems_are_refused() {
    let (session, _control, _client) = session();
    assert!(!session.handle(SessionRequest::Unsupported("x11-req".into())));
    assert!(!session.handle(SessionRequest::Subsystem(SubsysMsg {
        subsystem: "netconf".into(),
    })));
    // sftp with no server binary
    assert!(!session.handle(SessionRequest::Subsystem(SubsysMsg { subsystem: "sftp".into() })));
    assert!(!session.is_started());
}

#[tokio::test]
async fn destroy_is_idempotent() {
    let (session, control, _client) = session();
    session.destroy().await;
    session.destroy().await;
    assert_eq!(control.events(), vec![Event::Close]);
    assert!(!session.handle(exec("true")));
}

#[tokio::test]
async fn peer_close_tears_down_running_command() {
    let (session, control, _client) = session();
    assert!(session.handle(SessionRequest::Pty(PtyRequestMsg::default())));
    assert!(session.handle(exec("sleep 0.5")));
    session.channel_closed();
    control.wait_closed().await;
    assert!(control.is_closed());
}

#[tokio::test]
async fn client_user_is_replaced_while_other_variables_pass_through() {
    let (session, control, mut client) = session();
    assert!(session.handle(env("USER", "intruder")));
    assert!(session.handle(env("ENV1", "value1")));
    assert!(session.handle(exec("echo \"$USER $ENV1\"")));

    let user = std::env::var("USER").unwrap_or_default();
    assert_eq!(read_all(&mut client).await, format!("{user} value1\n"));
    control.wait_closed().await;
}

#[tokio::test]
async fn unsupported_request_leaves_session_usable() {
    let (session, control, mut client) = session();
    assert!(!session.handle(SessionRequest::Unsupported("x11-req".into())));
    assert!(session.handle(exec("echo ok")));

    assert_eq!(read_all(&mut client).await, "ok\n");
    control.wait_closed().await;
    assert!(control.events().contains(&Event::ExitStatus(0)));
}

#[tokio::test]
async fn signal_reaches_running_command() {
    let (session, control, _client) = session();
    assert!(session.handle(exec("exec sleep 10")));
    wait_for_pid(&session).await;

    assert!(session.handle(SessionRequest::Signal(SignalMsg { signal: "TERM".into() })));
    control.wait_closed().await;

    let events = control.events();
    assert!(events.contains(&Event::ExitSignal("TERM".to_string())), "{events:?}");
    assert!(!events.iter().any(|e| matches!(e, Event::ExitStatus(_))));
}

#[tokio::test]
async fn window_change_resizes_running_pty() {
    let (session, control, mut client) = session();
    assert!(session.handle(pty(80, 24)));
    assert!(session.handle(exec("stty size; sleep 1; stty size")));

    let mut seen = Vec::new();
    let mut buf = [0u8; 1024];
    while !String::from_utf8_lossy(&seen).contains("24 80") {
        let n = timeout(Duration::from_secs(10), client.read(&mut buf))
            .await
            .expect("initial size not printed")
            .unwrap();
        assert!(n > 0, "pty closed early: {}", String::from_utf8_lossy(&seen));
        seen.extend_from_slice(&buf[..n]);
    }

    assert!(session.handle(SessionRequest::WindowChange(WindowChangeMsg {
        columns: 132,
        rows: 50,
        width_px: 0,
        height_px: 0,
    })));
    let rest = read_all(&mut client).await;
    assert!(rest.contains("50 132"), "{rest}");
    control.wait_closed().await;
}

#[tokio::test]
async fn failed_keepalive_hangs_up_pty_command() {
    let runner = Arc::new(RecordingRunner::default());
    let (session, control, _client) = session_in(context_with(runner.clone(), None, Duration::from_millis(200)));
    control.fail_keepalive.store(true, Ordering::SeqCst);
    assert!(session.handle(pty(80, 24)));
    assert!(session.handle(exec("exec sleep 5")));
    let pid = wait_for_pid(&session).await;

    control.wait_closed().await;
    assert!(runner.signals().contains(&(pid, Signal::SIGHUP)));
    assert!(control.events().contains(&Event::ExitSignal("HUP".to_string())));
    assert_eq!(control.keepalives(), 1);
}

#[tokio::test]
async fn keepalive_stops_when_session_ends() {
    let (session, control, _client) = session_in(context_with(Arc::new(ProcessRunner), None, Duration::from_millis(20)));
    assert!(session.handle(pty(80, 24)));
    assert!(session.handle(exec("sleep 0.3")));

    control.wait_closed().await;
    let sent = control.keepalives();
    assert!(sent > 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(control.keepalives(), sent);
}

#[tokio::test]
async fn peer_gone_hangs_up_pty_command() {
    let runner = Arc::new(RecordingRunner::default());
    let (session, control, _client) = session_in(context_with(runner.clone(), None, Duration::from_secs(3600)));
    assert!(session.handle(pty(80, 24)));
    assert!(session.handle(exec("exec sleep 5")));
    let pid = wait_for_pid(&session).await;

    session.channel_closed();
    control.wait_closed().await;
    assert_eq!(runner.signals(), vec![(pid, Signal::SIGHUP)]);
}

#[tokio::test]
async fn scp_runs_with_session_environment() {
    let scp = Arc::new(RecordingScp::default());
    let engine: Arc<dyn ScpCopier> = scp.clone();
    let (session, control, _client) = session_in(context_with(Arc::new(ProcessRunner), Some(engine), Duration::from_secs(3600)));
    assert!(session.handle(env("FOO", "bar")));
    assert!(session.handle(env("USER", "intruder")));
    assert!(session.handle(exec("scp -t /tmp")));
    control.wait_closed().await;

    let calls = scp.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (command, env) = &calls[0];
    assert_eq!(command, "scp -t /tmp");
    let user = std::env::var("USER").unwrap_or_default();
    assert!(env.contains(&("FOO".to_string(), "bar".to_string())));
    assert!(env.contains(&("USER".to_string(), user)));
    assert!(!env.contains(&("USER".to_string(), "intruder".to_string())));
    assert!(control.events().contains(&Event::ExitStatus(0)));
}
