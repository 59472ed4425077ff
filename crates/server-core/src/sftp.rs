//! SFTP subsystem served by an external `sftp-server` binary.

use std::{path::PathBuf, process::Stdio, sync::Arc};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    error::ServerResult, runner::Runner, session::{ChannelControl, ChannelIo, PipedCopies}
};

#[async_trait]
pub trait SftpServer: Send + Sync + 'static {
    /// Whether requests for the subsystem should be accepted at all.
    fn available(&self) -> bool;

    /// Serve SFTP over the channel until the client disconnects.
    async fn serve(&self, io: ChannelIo, control: Arc<dyn ChannelControl>) -> ServerResult<()>;
}

pub struct ProcessSftpServer {
    path: PathBuf,
    runner: Arc<dyn Runner>,
}

impl ProcessSftpServer {
    pub fn new(path: impl Into<PathBuf>, runner: Arc<dyn Runner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }
}

#[async_trait]
impl SftpServer for ProcessSftpServer {
    fn available(&self) -> bool {
        self.path.is_file()
    }

    async fn serve(&self, io: ChannelIo, control: Arc<dyn ChannelControl>) -> ServerResult<()> {
        let mut command = Command::new(&self.path);
        command
            .arg("-e")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = self.runner.start(command)?;
        debug!(path = %self.path.display(), pid = ?child.id(), "sftp server started");

        let copies = PipedCopies::wire(&mut child, io, control);
        let status = self.runner.wait(&mut child).await;
        copies.finish().await;
        info!(status = ?status.as_ref().ok(), "sftp server exited");
        status?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ProcessRunner;

    #[test]
    fn missing_binary_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let server = ProcessSftpServer::new(dir.path().join("sftp-server"), Arc::new(ProcessRunner));
        assert!(!server.available());

        let present = dir.path().join("present");
        std::fs::write(&present, b"").unwrap();
        assert!(ProcessSftpServer::new(present, Arc::new(ProcessRunner)).available());
    }
}
