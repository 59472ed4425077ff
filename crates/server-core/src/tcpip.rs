//! `direct-tcpip` channels: dial the requested target and bridge the bytes.

use std::sync::Arc;

use russh::{Channel, ChannelOpenFailure, server::{Handle, Msg}};
use ssh_core::{
    forwarding::{Dialer, ForwardStream, bridge_half_close}, wire::{ChannelOpenDirectTcpipMsg, WireMessage}
};
use tracing::{debug, info};

/// Why a channel open was refused.
#[derive(Debug)]
pub struct ChannelRejection {
    pub reason: ChannelOpenFailure,
    pub message: String,
}

impl ChannelRejection {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self {
            reason: ChannelOpenFailure::ConnectFailed,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct DirectTcpipHandler {
    dialer: Arc<dyn Dialer>,
}

impl DirectTcpipHandler {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self { dialer }
    }

    /// Decode the open payload and dial its target.
    pub async fn open_raw(&self, payload: &[u8]) -> Result<ForwardStream, ChannelRejection> {
        let msg = ChannelOpenDirectTcpipMsg::from_bytes(payload).map_err(|err| ChannelRejection::connection_failed(err.to_string()))?;
        self.open(&msg).await
    }

    /// Dial the target named by `msg`.
    pub async fn open(&self, msg: &ChannelOpenDirectTcpipMsg) -> Result<ForwardStream, ChannelRejection> {
        debug!(
            target = %format!("{}:{}", msg.target_addr, msg.target_port),
            origin = %format!("{}:{}", msg.origin_addr, msg.origin_port),
            "direct-tcpip open"
        );
        self.dialer
            .dial(&msg.target_addr, msg.target_port)
            .await
            .map_err(|err| ChannelRejection::connection_failed(err.to_string()))
    }

    /// Relay between an accepted channel and its target, then close the channel.
    pub async fn bridge(channel: Channel<Msg>, target: ForwardStream, handle: Handle) {
        let id = channel.id();
        let stats = bridge_half_close(channel.into_stream(), target).await;
        info!(channel = %id, to_target = stats.a_to_b, from_target = stats.b_to_a, "direct-tcpip closed");
        if handle.close(id).await.is_err() {
            debug!(channel = %id, "close after direct-tcpip failed; connection gone");
        }
    }
}
