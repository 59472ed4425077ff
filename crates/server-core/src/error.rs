use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SSH Key error: {0}")]
    Keys(#[from] russh::keys::Error),

    #[error("SSH Key encoding error: {0}")]
    SshKey(#[from] russh::keys::ssh_key::Error),

    #[error("SSH core error: {0}")]
    Core(#[from] ssh_core::SshCoreError),

    #[error("Target connection error: {0}")]
    Client(#[from] client_core::ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("command already started")]
    CommandAlreadyStarted,

    #[error("channel is closed")]
    ChannelClosed,

    #[error("Process error: {0}")]
    Process(String),

    #[error("Permission denied: {0}")]
    NotPermitted(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl ServerError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn not_permitted(msg: impl Into<String>) -> Self {
        Self::NotPermitted(msg.into())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
