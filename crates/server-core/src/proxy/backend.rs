//! Client-side handler for the proxy's connection to its target.

use client_core::{ClientError, FingerprintCheck};
use russh::{Channel, client, keys::PublicKey, server};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::relay;

/// Enforces the host fingerprint, relays `forwarded-tcpip` channels to the
/// client, and reports when the target connection goes away.
pub struct BackendHandler {
    check: FingerprintCheck,
    frontend: server::Handle,
    gone: Option<oneshot::Sender<()>>,
}

impl BackendHandler {
    pub fn new(check: FingerprintCheck, frontend: server::Handle, gone: oneshot::Sender<()>) -> Self {
        Self {
            check,
            frontend,
            gone: Some(gone),
        }
    }
}

impl Drop for BackendHandler {
    fn drop(&mut self) {
        if let Some(gone) = self.gone.take() {
            let _ = gone.send(());
        }
    }
}

impl client::Handler for BackendHandler {
    type Error = ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verdict = self.check.verify(server_public_key).map(|_| true);
        async move { verdict }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        debug!(connected_address, connected_port, originator_address, originator_port, "target opened forwarded-tcpip");
        let frontend = self.frontend.clone();
        let connected_address = connected_address.to_string();
        let originator_address = originator_address.to_string();
        tokio::spawn(async move {
            match frontend
                .channel_open_forwarded_tcpip(connected_address, connected_port, originator_address, originator_port)
                .await
            {
                Ok(front) => {
                    relay::spawn(front, frontend, channel);
                }
                Err(err) => {
                    warn!(error = %err, "client refused forwarded-tcpip channel");
                    let _ = channel.close().await;
                }
            }
        });
        Ok(())
    }
}
