use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{SshCoreError, SshResult};

/// Trait for streams that can be used for forwarding.
pub trait ForwardStreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ForwardStreamIo for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type alias for boxed forward streams.
pub type ForwardStream = Box<dyn ForwardStreamIo>;

/// Opens outbound connections for `direct-tcpip` tunnels.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, host: &str, port: u32) -> SshResult<ForwardStream>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u32) -> SshResult<ForwardStream> {
        let address = format!("{host}:{port}");
        let port = u16::try_from(port).map_err(|_| SshCoreError::ConnectionFailed {
            address: address.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "port out of range"),
        })?;
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| SshCoreError::ConnectionFailed { address, source })?;
        let _ = stream.set_nodelay(true);
        Ok(Box::new(stream))
    }
}
