//! Outbound side of the relay: turns connection permissions into an
//! authenticated SSH client connection to the target host.

mod auth;
pub mod error;
mod hostkeys;
pub mod target;

use std::sync::Arc;

pub use auth::authenticate_target;
pub use error::{ClientError, ClientResult};
pub use hostkeys::{FingerprintCheck, TargetClientHandler};
use russh::client::{self, Handle};
pub use target::{
    LOG_MESSAGE_OPTION, LogMessage, PROXY_TARGET_CONFIG_OPTION, Permissions, TargetConfig, parse_log_message, parse_target_config, split_address
};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Establish the outbound connection described by `permissions`.
///
/// `make_handler` receives the host key check for the target and must
/// enforce it in `check_server_key`. Every failure is reported with its own
/// [`ClientError`] variant.
pub async fn new_client_conn<H, F>(
    permissions: Option<&Permissions>,
    config: Arc<client::Config>,
    make_handler: F,
) -> ClientResult<(Handle<H>, TargetConfig)>
where
    H: client::Handler<Error = ClientError> + Send + 'static,
    F: FnOnce(FingerprintCheck) -> H,
{
    let target = parse_target_config(permissions)?;
    let handle = connect_target(&target, config, make_handler).await?;
    Ok((handle, target))
}

/// Dial, handshake and authenticate against an already parsed target.
pub async fn connect_target<H, F>(target: &TargetConfig, config: Arc<client::Config>, make_handler: F) -> ClientResult<Handle<H>>
where
    H: client::Handler<Error = ClientError> + Send + 'static,
    F: FnOnce(FingerprintCheck) -> H,
{
    let (host, port) = split_address(&target.address)?;
    debug!(address = %target.address, "dialing target");
    let stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|source| ClientError::Dial {
            address: target.address.clone(),
            source,
        })?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "set_nodelay failed");
    }

    let handler = make_handler(FingerprintCheck::new(&target.host_fingerprint));
    let mut handle = client::connect_stream(config, stream, handler)
        .await
        .map_err(|err| ClientError::Handshake {
            address: target.address.clone(),
            source: Box::new(err),
        })?;

    authenticate_target(&mut handle, target).await?;
    info!(address = %target.address, user = %target.user, "connected to target");
    Ok(handle)
}
