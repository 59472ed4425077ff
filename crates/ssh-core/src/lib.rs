pub mod crypto;
pub mod error;
pub mod forwarding;
pub mod keys;
pub mod logging;
pub mod signals;
pub mod terminal;
pub mod wire;

pub use error::{SshCoreError, SshResult};
