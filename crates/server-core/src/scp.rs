//! SCP transfers served by the host's `scp` binary in sink/source mode.

use std::{process::Stdio, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{
    error::{ServerError, ServerResult}, runner::Runner, session::{ChannelControl, ChannelIo, PipedCopies}
};

/// Runs one SCP transfer over a session channel.
#[async_trait]
pub trait ScpCopier: Send + Sync + 'static {
    /// Serve `command` (the client's `scp ...` line) until the transfer ends.
    ///
    /// `env` is the session's computed environment and replaces the daemon's.
    async fn copy(
        &self,
        command: &str,
        env: &[(String, String)],
        io: ChannelIo,
        control: Arc<dyn ChannelControl>,
    ) -> ServerResult<()>;
}

pub struct ProcessScpCopier {
    runner: Arc<dyn Runner>,
}

impl ProcessScpCopier {
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self { runner }
    }
}

/// Split an `scp` command line into its arguments.
///
/// Only server-side invocations (`-t` sink or `-f` source) are accepted.
pub fn scp_arguments(command: &str) -> ServerResult<Vec<String>> {
    let mut words = command.split_whitespace();
    if words.next() != Some("scp") {
        return Err(ServerError::Process(format!("not an scp command: {command}")));
    }
    let args: Vec<String> = words.map(str::to_string).collect();

    let server_mode = args
        .iter()
        .take_while(|arg| *arg != "--")
        .filter(|arg| arg.starts_with('-') && !arg.starts_with("--"))
        .any(|arg| arg.contains('t') || arg.contains('f'));
    if !server_mode {
        return Err(ServerError::Process("scp requires -t or -f".to_string()));
    }
    Ok(args)
}

fn scp_command(args: &[String], env: &[(String, String)]) -> Command {
    let mut process = Command::new("scp");
    process
        .args(args)
        .env_clear()
        .envs(env.iter().map(|(name, value)| (name, value)))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    process
}

#[async_trait]
impl ScpCopier for ProcessScpCopier {
    async fn copy(
        &self,
        command: &str,
        env: &[(String, String)],
        io: ChannelIo,
        control: Arc<dyn ChannelControl>,
    ) -> ServerResult<()> {
        let args = scp_arguments(command)?;
        debug!(?args, "starting scp");

        let mut child = self.runner.start(scp_command(&args, env))?;
        let copies = PipedCopies::wire(&mut child, io, control);
        let status = self.runner.wait(&mut child).await;
        copies.finish().await;

        let status = status?;
        if status.success() {
            Ok(())
        } else {
            Err(ServerError::Process(format!("scp exited with {status}")))
        }
    }
}
