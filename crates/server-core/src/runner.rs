//! Process control behind injectable strategy traits.

use std::{
    io, os::unix::process::ExitStatusExt, path::Path, process::ExitStatus
};

use async_trait::async_trait;
use nix::{sys::signal::Signal, unistd::Pid};
use ssh_core::{signals, wire::ExitSignalMsg};
use tokio::process::{Child, Command};

/// Starts, waits for and signals session commands.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Spawn `command`. The command is consumed so the parent's copies of
    /// any inherited descriptors are closed once the child is running.
    fn start(&self, command: Command) -> io::Result<Child>;

    async fn wait(&self, child: &mut Child) -> io::Result<ExitStatus>;

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()>;
}

/// Runs commands as local processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl Runner for ProcessRunner {
    fn start(&self, mut command: Command) -> io::Result<Child> {
        command.spawn()
    }

    async fn wait(&self, child: &mut Child) -> io::Result<ExitStatus> {
        child.wait().await
    }

    fn signal(&self, pid: u32, signal: Signal) -> io::Result<()> {
        let pid = i32::try_from(pid).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        nix::sys::signal::kill(Pid::from_raw(pid), signal).map_err(io::Error::from)
    }
}

pub trait ShellLocator: Send + Sync + 'static {
    fn shell_path(&self) -> String;
}

/// Prefers bash and falls back to `/bin/sh`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultShellLocator;

impl ShellLocator for DefaultShellLocator {
    fn shell_path(&self) -> String {
        if Path::new("/bin/bash").exists() {
            "/bin/bash".to_string()
        } else {
            "/bin/sh".to_string()
        }
    }
}

/// How a finished command is reported to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReport {
    Status(u32),
    Signal(ExitSignalMsg),
}

impl ExitReport {
    /// Status reported when the process could not be started or waited on.
    pub const FAILED: ExitReport = ExitReport::Status(255);

    pub fn from_wait(result: &io::Result<ExitStatus>) -> Self {
        let status = match result {
            Ok(status) => status,
            Err(_) => return Self::FAILED,
        };
        if status.success() {
            return ExitReport::Status(0);
        }
        if let Some(raw) = status.signal() {
            let name = Signal::try_from(raw)
                .map(signals::ssh_name)
                .unwrap_or_else(|_| raw.to_string());
            return ExitReport::Signal(ExitSignalMsg {
                signal: name,
                core_dumped: status.core_dumped(),
                error: String::new(),
                lang: String::new(),
            });
        }
        match status.code() {
            Some(code) => ExitReport::Status(code as u32),
            None => Self::FAILED,
        }
    }

    /// SCP transfers only distinguish success from failure.
    pub fn from_copy<E>(result: &Result<(), E>) -> Self {
        match result {
            Ok(()) => ExitReport::Status(0),
            Err(_) => ExitReport::Status(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_map_to_status() {
        assert_eq!(ExitReport::from_wait(&Ok(ExitStatus::from_raw(0))), ExitReport::Status(0));
        assert_eq!(ExitReport::from_wait(&Ok(ExitStatus::from_raw(3 << 8))), ExitReport::Status(3));
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(ExitReport::from_wait(&Err(err)), ExitReport::Status(255));
    }

    #[test]
    fn signals_map_to_exit_signal() {
        let report = ExitReport::from_wait(&Ok(ExitStatus::from_raw(libc::SIGUSR2)));
        assert_eq!(
            report,
            ExitReport::Signal(ExitSignalMsg {
                signal: "USR2".into(),
                core_dumped: false,
                error: String::new(),
                lang: String::new(),
            })
        );

        let report = ExitReport::from_wait(&Ok(ExitStatus::from_raw(libc::SIGSEGV | 0x80)));
        assert!(matches!(report, ExitReport::Signal(ExitSignalMsg { core_dumped: true, .. })));
    }

    #[test]
    fn copy_results_map_to_zero_or_one() {
        assert_eq!(ExitReport::from_copy::<()>(&Ok(())), ExitReport::Status(0));
        assert_eq!(ExitReport::from_copy(&Err("boom")), ExitReport::Status(1));
    }

    #[tokio::test]
    async fn process_runner_waits_and_signals() {
        let runner = ProcessRunner;
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "sleep 5"]);
        let mut child = runner.start(command).unwrap();
        runner.signal(child.id().unwrap(), Signal::SIGTERM).unwrap();
        let status = runner.wait(&mut child).await.unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }

    #[test]
    fn shell_locator_returns_existing_shell() {
        let path = DefaultShellLocator.shell_path();
        assert!(Path::new(&path).exists());
    }
}
