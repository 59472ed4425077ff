use thiserror::Error;

/// Errors that can occur in SSH core operations
#[derive(Error, Debug)]
pub enum SshCoreError {
    /// Payload ended before a field could be read
    #[error("malformed {message} payload: {reason}")]
    Malformed { message: &'static str, reason: String },

    /// Unknown algorithm name in an allowlist
    #[error("unsupported {kind} algorithm: {name}")]
    UnsupportedAlgorithm { kind: &'static str, name: String },

    /// Key material could not be parsed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Empty value where one is required
    #[error("{field} must not be empty")]
    EmptyValue { field: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH protocol error
    #[error("SSH protocol error: {0}")]
    Ssh(#[from] russh::Error),

    /// Terminal control failed
    #[error("terminal operation {operation} failed: {source}")]
    Terminal {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Connection failed
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for SSH core operations
pub type SshResult<T> = Result<T, SshCoreError>;

impl SshCoreError {
    /// Create a malformed payload error
    pub fn malformed(message: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            message,
            reason: reason.into(),
        }
    }

    /// Create an empty value error
    pub fn empty(field: impl Into<String>) -> Self {
        Self::EmptyValue { field: field.into() }
    }

    pub(crate) fn terminal(operation: &'static str, source: impl Into<std::io::Error>) -> Self {
        Self::Terminal {
            operation,
            source: source.into(),
        }
    }
}
