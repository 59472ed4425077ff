use ssh_core::{
    SshResult, wire::{EnvMsg, ExecMsg, PtyRequestMsg, SignalMsg, SubsysMsg, WindowChangeMsg, WireMessage}
};

/// A channel request addressed to a session, keyed by its wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    Env(EnvMsg),
    Signal(SignalMsg),
    Pty(PtyRequestMsg),
    WindowChange(WindowChangeMsg),
    Exec(ExecMsg),
    Shell,
    Subsystem(SubsysMsg),
    Unsupported(String),
}

impl SessionRequest {
    /// Decode a raw request payload. Unknown names become `Unsupported`.
    pub fn decode(name: &str, payload: &[u8]) -> SshResult<Self> {
        Ok(match name {
            "env" => Self::Env(EnvMsg::from_bytes(payload)?),
            "signal" => Self::Signal(SignalMsg::from_bytes(payload)?),
            "pty-req" => Self::Pty(PtyRequestMsg::from_bytes(payload)?),
            "window-change" => Self::WindowChange(WindowChangeMsg::from_bytes(payload)?),
            "exec" => Self::Exec(ExecMsg::from_bytes(payload)?),
            "shell" => Self::Shell,
            "subsystem" => Self::Subsystem(SubsysMsg::from_bytes(payload)?),
            other => Self::Unsupported(other.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Env(_) => "env",
            Self::Signal(_) => "signal",
            Self::Pty(_) => "pty-req",
            Self::WindowChange(_) => "window-change",
            Self::Exec(_) => "exec",
            Self::Shell => "shell",
            Self::Subsystem(_) => "subsystem",
            Self::Unsupported(name) => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_requests() {
        let payload = ExecMsg { command: "true".into() }.to_bytes();
        assert_eq!(
            SessionRequest::decode("exec", &payload).unwrap(),
            SessionRequest::Exec(ExecMsg { command: "true".into() })
        );
        assert_eq!(SessionRequest::decode("shell", &[]).unwrap(), SessionRequest::Shell);
    }

    #[test]
    fn unknown_names_are_unsupported() {
        let req = SessionRequest::decode("x11-req", &[1, 2, 3]).unwrap();
        assert_eq!(req, SessionRequest::Unsupported("x11-req".into()));
        assert_eq!(req.name(), "x11-req");
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(SessionRequest::decode("env", &[0, 0, 0, 7]).is_err());
    }
}
