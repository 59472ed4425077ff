//! SSH session daemon and relay proxy.
//!
//! - [`ssh_server::run_daemon`] serves sessions and `direct-tcpip` locally.
//! - [`ssh_server::run_proxy`] pairs each client with a connection to its target.

pub mod config;
pub mod daemon;
pub mod error;
pub mod proxy;
pub mod runner;
pub mod scp;
pub mod session;
pub mod sftp;
pub mod ssh_server;
pub mod tcpip;

pub use config::{DaemonConfig, ProxyConfig};
pub use error::{ServerError, ServerResult};
pub use ssh_server::{run_daemon, run_proxy};
