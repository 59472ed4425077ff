//! Byte plumbing shared by tunnels and sessions.
//!
//! - [`copy_and_close_write`] pumps one direction and half-closes the sink.
//! - [`bridge_half_close`] runs both directions and returns once each side has drained.
//! - [`Dialer`] opens the outbound leg of a tunnel.

mod bridge;
mod traits;

pub use bridge::{BridgeStats, bridge_half_close, copy_and_close_write};
pub use traits::{Dialer, ForwardStream, ForwardStreamIo, TcpDialer};
