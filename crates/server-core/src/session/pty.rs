//! Pseudo-terminal allocation for interactive sessions.
//!
//! The master side is wrapped in `AsyncFd` so reads and writes integrate with
//! the tokio reactor. The slave side is handed to the child as its stdio and
//! controlling terminal.

use std::{
    fs::File, io::{self, Read, Write}, os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd}, process::Stdio
};

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use ssh_core::{terminal, wire::PtyRequestMsg};
use tokio::{io::unix::AsyncFd, process::Command};
use tracing::{debug, warn};

/// Master side of an allocated pty.
pub struct PtyMaster {
    fd: AsyncFd<File>,
}

impl PtyMaster {
    /// Write all of `data` to the terminal.
    pub async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| inner.get_ref().write(data)) {
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Read terminal output. Returns `Ok(0)` once every slave descriptor is closed.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => {
                    debug!("pty read returned EIO; slave closed");
                    return Ok(0);
                }
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
    }

    pub fn resize(&self, columns: u32, rows: u32, width_px: u32, height_px: u32) {
        if let Err(err) = terminal::set_window_size(self.as_fd(), columns, rows, width_px, height_px) {
            warn!(error = %err, "failed to set window size");
        } else {
            debug!(columns, rows, "pty resized");
        }
    }
}

impl AsFd for PtyMaster {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.get_ref().as_fd()
    }
}

/// Allocate a pty configured from `request` and attach its slave to `command`.
///
/// The command becomes a session leader with the slave as its controlling
/// terminal. The returned master must outlive the child's output.
pub fn attach(command: &mut Command, request: &PtyRequestMsg) -> io::Result<PtyMaster> {
    let pair = nix::pty::openpty(None, None).map_err(io::Error::from)?;

    terminal::apply_modelist(&pair.master, &request.modelist);
    if let Err(err) = terminal::set_window_size(&pair.master, request.columns, request.rows, request.width, request.height) {
        warn!(error = %err, "failed to set initial window size");
    }

    let slave = pair.slave;
    command
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave));

    // SAFETY: only async-signal-safe calls run between fork and exec.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    wrap_master(pair.master)
}

fn wrap_master(master: OwnedFd) -> io::Result<PtyMaster> {
    let flags = fcntl(master.as_raw_fd(), FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
    Ok(PtyMaster {
        fd: AsyncFd::new(File::from(master))?,
    })
}
