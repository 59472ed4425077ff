use std::sync::{
    Arc, atomic::{AtomicBool, Ordering}
};

use async_trait::async_trait;
use russh::{ChannelId, CryptoVec, server::Handle};
use ssh_core::{signals, wire::ExitSignalMsg};
use tracing::debug;

use crate::error::{ServerError, ServerResult};

/// Out-of-band operations on a session channel.
///
/// Stdout and stdin travel over the channel stream itself; everything else
/// goes through here.
#[async_trait]
pub trait ChannelControl: Send + Sync + 'static {
    async fn stderr(&self, data: &[u8]) -> ServerResult<()>;

    async fn exit_status(&self, status: u32) -> ServerResult<()>;

    async fn exit_signal(&self, message: &ExitSignalMsg) -> ServerResult<()>;

    /// Liveness check; fails once the channel or its connection is gone.
    async fn keepalive(&self) -> ServerResult<()>;

    async fn close(&self) -> ServerResult<()>;

    /// Record that the peer closed the channel.
    fn mark_closed(&self);

    fn is_closed(&self) -> bool;
}

/// [`ChannelControl`] over a russh server connection handle.
pub struct RusshChannel {
    handle: Handle,
    id: ChannelId,
    closed: AtomicBool,
}

impl RusshChannel {
    pub fn new(handle: Handle, id: ChannelId) -> Arc<Self> {
        Arc::new(Self {
            handle,
            id,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> ServerResult<()> {
        if self.is_closed() { Err(ServerError::ChannelClosed) } else { Ok(()) }
    }
}

#[async_trait]
impl ChannelControl for RusshChannel {
    async fn stderr(&self, data: &[u8]) -> ServerResult<()> {
        self.ensure_open()?;
        self.handle
            .extended_data(self.id, 1, CryptoVec::from_slice(data))
            .await
            .map_err(|_| ServerError::ChannelClosed)
    }

    async fn exit_status(&self, status: u32) -> ServerResult<()> {
        self.ensure_open()?;
        self.handle
            .exit_status_request(self.id, status)
            .await
            .map_err(|_| ServerError::ChannelClosed)
    }

    async fn exit_signal(&self, message: &ExitSignalMsg) -> ServerResult<()> {
        self.ensure_open()?;
        self.handle
            .exit_signal_request(
                self.id,
                signals::to_sig(&message.signal),
                message.core_dumped,
                message.error.clone(),
                message.lang.clone(),
            )
            .await
            .map_err(|_| ServerError::ChannelClosed)
    }

    // On the wire this is russh's `keepalive@openssh.com`, driven by the server
    // config. An empty data message never leaves the process; it only fails
    // once the connection task has ended.
    async fn keepalive(&self) -> ServerResult<()> {
        self.ensure_open()?;
        self.handle
            .data(self.id, CryptoVec::new())
            .await
            .map_err(|_| ServerError::ChannelClosed)
    }

    async fn close(&self) -> ServerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(channel = %self.id, "channel already closed");
            return Ok(());
        }
        self.handle.close(self.id).await.map_err(|_| ServerError::ChannelClosed)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
