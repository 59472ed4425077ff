use std::sync::Arc;

use ssh_core::forwarding::copy_and_close_write;
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt}, process::{Child, ChildStderr}, task::JoinHandle
};
use tracing::debug;

use super::{ChannelIo, ChannelWriter, control::ChannelControl};

/// Copies between a piped child and a session channel.
///
/// stdin is fed from the channel and closed at channel EOF. stdout goes to
/// the channel stream and stderr to the channel's extended data.
pub struct PipedCopies {
    stdin: Option<JoinHandle<()>>,
    stdout: Option<JoinHandle<ChannelWriter>>,
    stderr: Option<JoinHandle<()>>,
    writer: Option<ChannelWriter>,
}

impl PipedCopies {
    pub fn wire(child: &mut Child, io: ChannelIo, control: Arc<dyn ChannelControl>) -> Self {
        let ChannelIo { mut reader, mut writer } = io;

        let stdin = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let n = copy_and_close_write(&mut reader, &mut stdin).await;
                debug!(bytes = n, "stdin copy finished");
            })
        });

        let (stdout, writer) = match child.stdout.take() {
            Some(mut stdout) => {
                let handle = tokio::spawn(async move {
                    if let Err(err) = io::copy(&mut stdout, &mut writer).await {
                        debug!(error = %err, "stdout copy ended with error");
                    }
                    writer
                });
                (Some(handle), None)
            }
            None => (None, Some(writer)),
        };

        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(copy_to_extended(stderr, control)));

        Self {
            stdin,
            stdout,
            stderr,
            writer,
        }
    }

    /// Wait for stdout and stderr to drain, then send EOF on the channel.
    pub async fn finish(mut self) {
        if let Some(stdin) = self.stdin.take() {
            stdin.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            let _ = stderr.await;
        }
        let writer = match self.stdout.take() {
            Some(stdout) => stdout.await.ok(),
            None => self.writer.take(),
        };
        if let Some(mut writer) = writer {
            if let Err(err) = writer.shutdown().await {
                debug!(error = %err, "close-write failed");
            }
        }
    }
}

async fn copy_to_extended(mut stderr: ChildStderr, control: Arc<dyn ChannelControl>) {
    let mut buf = vec![0u8; 8192];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(err) = control.stderr(&buf[..n]).await {
                    debug!(error = %err, "stderr copy stopped");
                    break;
                }
            }
            Err(err) => {
                debug!(error = %err, "stderr read ended with error");
                break;
            }
        }
    }
}
