use thiserror::Error;

/// Errors raised while building an outbound connection to a target host
#[derive(Error, Debug)]
pub enum ClientError {
    /// No permissions were attached to the inbound connection
    #[error("no permissions available")]
    MissingPermissions,

    /// A required critical option is absent
    #[error("missing critical option: {0}")]
    MissingOption(&'static str),

    /// A critical option did not hold valid JSON
    #[error("invalid {option} payload: {source}")]
    InvalidOption {
        option: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Target address is not `host:port`
    #[error("invalid target address: {0}")]
    InvalidAddress(String),

    /// TCP connection to the target failed
    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// SSH handshake with the target failed
    #[error("handshake with {address} failed: {source}")]
    Handshake {
        address: String,
        #[source]
        source: Box<ClientError>,
    },

    /// SSH error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Key handling error
    #[error("key error: {0}")]
    Keys(#[from] russh::keys::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Host key verification failed
    #[error("host key verification failed: {0}")]
    HostKeyFailed(String),

    /// Cryptographic error
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

// Allow conversion from SshCoreError
impl From<ssh_core::SshCoreError> for ClientError {
    fn from(err: ssh_core::SshCoreError) -> Self {
        match err {
            ssh_core::SshCoreError::InvalidKey(msg) => ClientError::Crypto(msg),
            ssh_core::SshCoreError::Ssh(err) => ClientError::Ssh(err),
            other => ClientError::Other(other.to_string()),
        }
    }
}
