use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bytes moved in each direction by [`bridge_half_close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Copy `reader` into `writer` until EOF, then shut down the write side.
///
/// Copy errors end the stream like EOF does; they are only logged at debug
/// level. Returns the bytes written before the stream ended.
pub async fn copy_and_close_write<R, W>(reader: &mut R, writer: &mut W) -> u64
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; 8192];
    let mut copied = 0u64;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                debug!(error = %err, copied, "read ended with error");
                break;
            }
        };
        if let Err(err) = writer.write_all(&buf[..n]).await {
            debug!(error = %err, copied, "write ended with error");
            break;
        }
        copied += n as u64;
    }
    if let Err(err) = writer.shutdown().await {
        debug!(error = %err, "close-write failed");
    }
    copied
}

/// Pump bytes between `a` and `b` in both directions.
///
/// Each direction half-closes its destination when its source reaches EOF, so
/// the other direction keeps flowing. Returns after both directions finish.
pub async fn bridge_half_close<A, B>(a: A, b: B) -> BridgeStats
where
    A: AsyncRead + AsyncWrite + Send,
    B: AsyncRead + AsyncWrite + Send,
{
    let (mut a_read, mut a_write) = io::split(a);
    let (mut b_read, mut b_write) = io::split(b);

    let (a_to_b, b_to_a) = tokio::join!(
        copy_and_close_write(&mut a_read, &mut b_write),
        copy_and_close_write(&mut b_read, &mut a_write),
    );
    BridgeStats { a_to_b, b_to_a }
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin, task::{Context, Poll}
    };

    use tokio::io::{ReadBuf, duplex};

    use super::*;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        }
    }

    #[tokio::test]
    async fn half_close_lets_reply_flow_after_request_eof() {
        let (client, bridge_a) = duplex(64);
        let (bridge_b, server) = duplex(64);

        let bridge = tokio::spawn(bridge_half_close(bridge_a, bridge_b));

        let (mut client_read, mut client_write) = io::split(client);
        let (mut server_read, mut server_write) = io::split(server);

        client_write.write_all(b"ping").await.unwrap();
        client_write.shutdown().await.unwrap();

        let mut request = Vec::new();
        server_read.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"ping");

        server_write.write_all(b"pong").await.unwrap();
        server_write.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client_read.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"pong");

        let stats = bridge.await.unwrap();
        assert_eq!(stats, BridgeStats { a_to_b: 4, b_to_a: 4 });
    }

    #[tokio::test]
    async fn copy_shuts_down_writer() {
        let mut source: &[u8] = b"hello";
        let (mut sink, mut peer) = duplex(16);
        let copied = copy_and_close_write(&mut source, &mut sink).await;
        assert_eq!(copied, 5);

        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn read_error_keeps_count_of_bytes_already_copied() {
        let mut source = (&b"hello"[..]).chain(FailingReader);
        let (mut sink, mut peer) = duplex(16);
        let copied = copy_and_close_write(&mut source, &mut sink).await;
        assert_eq!(copied, 5);

        let mut out = Vec::new();
        peer.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello");
    }
}
