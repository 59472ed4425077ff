//! RFC 4254 payload records for the channel requests the gateway handles.
//!
//! Field order matches the wire layout. Each record can be encoded to and
//! decoded from the request-specific payload that follows the request name.

use russh::Pty;

use crate::{SshCoreError, SshResult};

/// Mode opcode that terminates a pty mode list.
pub const TTY_OP_END: u8 = 0;
/// First opcode value that is no longer a defined terminal mode.
pub const TTY_OP_LIMIT: u8 = 160;

/// Encoding shared by every channel request record.
pub trait WireMessage: Sized {
    /// Name used in error messages.
    const NAME: &'static str;

    fn encode(&self, out: &mut Vec<u8>);

    fn decode_from(reader: &mut Reader<'_>) -> SshResult<Self>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decode a full payload; trailing bytes are tolerated.
    fn from_bytes(payload: &[u8]) -> SshResult<Self> {
        let mut reader = Reader::new(Self::NAME, payload);
        Self::decode_from(&mut reader)
    }
}

/// Cursor over an SSH payload.
pub struct Reader<'a> {
    message: &'static str,
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(message: &'static str, buf: &'a [u8]) -> Self {
        Self { message, buf }
    }

    fn take(&mut self, n: usize, what: &str) -> SshResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(SshCoreError::malformed(self.message, format!("truncated {what}")));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u32(&mut self) -> SshResult<u32> {
        let bytes = self.take(4, "uint32")?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn bool(&mut self) -> SshResult<bool> {
        Ok(self.take(1, "boolean")?[0] != 0)
    }

    pub fn bytes(&mut self) -> SshResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len, "string")
    }

    pub fn string(&mut self) -> SshResult<String> {
        let raw = self.bytes()?;
        String::from_utf8(raw.to_vec()).map_err(|_| SshCoreError::malformed(self.message, "string is not valid UTF-8"))
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

pub fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_bool(out: &mut Vec<u8>, value: bool) {
    out.push(value as u8);
}

pub fn put_bytes(out: &mut Vec<u8>, value: &[u8]) {
    put_u32(out, value.len() as u32);
    out.extend_from_slice(value);
}

pub fn put_str(out: &mut Vec<u8>, value: &str) {
    put_bytes(out, value.as_bytes());
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOpenDirectTcpipMsg {
    pub target_addr: String,
    pub target_port: u32,
    pub origin_addr: String,
    pub origin_port: u32,
}

impl WireMessage for ChannelOpenDirectTcpipMsg {
    const NAME: &'static str = "direct-tcpip";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.target_addr);
        put_u32(out, self.target_port);
        put_str(out, &self.origin_addr);
        put_u32(out, self.origin_port);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self {
            target_addr: r.string()?,
            target_port: r.u32()?,
            origin_addr: r.string()?,
            origin_port: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PtyRequestMsg {
    pub term: String,
    pub columns: u32,
    pub rows: u32,
    pub width: u32,
    pub height: u32,
    pub modelist: Vec<u8>,
}

impl WireMessage for PtyRequestMsg {
    const NAME: &'static str = "pty-req";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.term);
        put_u32(out, self.columns);
        put_u32(out, self.rows);
        put_u32(out, self.width);
        put_u32(out, self.height);
        put_bytes(out, &self.modelist);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self {
            term: r.string()?,
            columns: r.u32()?,
            rows: r.u32()?,
            width: r.u32()?,
            height: r.u32()?,
            modelist: r.bytes()?.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvMsg {
    pub name: String,
    pub value: String,
}

impl WireMessage for EnvMsg {
    const NAME: &'static str = "env";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.name);
        put_str(out, &self.value);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self {
            name: r.string()?,
            value: r.string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMsg {
    pub signal: String,
}

impl WireMessage for SignalMsg {
    const NAME: &'static str = "signal";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.signal);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self { signal: r.string()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowChangeMsg {
    pub columns: u32,
    pub rows: u32,
    pub width_px: u32,
    pub height_px: u32,
}

impl WireMessage for WindowChangeMsg {
    const NAME: &'static str = "window-change";

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.columns);
        put_u32(out, self.rows);
        put_u32(out, self.width_px);
        put_u32(out, self.height_px);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self {
            columns: r.u32()?,
            rows: r.u32()?,
            width_px: r.u32()?,
            height_px: r.u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecMsg {
    pub command: String,
}

impl WireMessage for ExecMsg {
    const NAME: &'static str = "exec";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.command);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self { command: r.string()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsysMsg {
    pub subsystem: String,
}

impl WireMessage for SubsysMsg {
    const NAME: &'static str = "subsystem";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.subsystem);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self { subsystem: r.string()? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatusMsg {
    pub status: u32,
}

impl WireMessage for ExitStatusMsg {
    const NAME: &'static str = "exit-status";

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.status);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self { status: r.u32()? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignalMsg {
    pub signal: String,
    pub core_dumped: bool,
    pub error: String,
    pub lang: String,
}

impl WireMessage for ExitSignalMsg {
    const NAME: &'static str = "exit-signal";

    fn encode(&self, out: &mut Vec<u8>) {
        put_str(out, &self.signal);
        put_bool(out, self.core_dumped);
        put_str(out, &self.error);
        put_str(out, &self.lang);
    }

    fn decode_from(r: &mut Reader<'_>) -> SshResult<Self> {
        Ok(Self {
            signal: r.string()?,
            core_dumped: r.bool()?,
            error: r.string()?,
            lang: r.string()?,
        })
    }
}

/// Re-encode parsed pty modes as an RFC 4254 mode list (terminated by `TTY_OP_END`).
pub fn encode_modelist(modes: &[(Pty, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(modes.len() * 5 + 1);
    for (pty, value) in modes {
        let opcode = *pty as u8;
        if opcode == TTY_OP_END {
            continue;
        }
        out.push(opcode);
        put_u32(&mut out, *value);
    }
    out.push(TTY_OP_END);
    out
}

/// Split a mode list into `(opcode, value)` pairs.
///
/// Stops at `TTY_OP_END`, at the first opcode `>= 160`, or when a value is cut short.
pub fn decode_modelist(modelist: &[u8]) -> Vec<(u8, u32)> {
    let mut modes = Vec::new();
    let mut rest = modelist;
    while let Some((&opcode, tail)) = rest.split_first() {
        if opcode == TTY_OP_END || opcode >= TTY_OP_LIMIT || tail.len() < 4 {
            break;
        }
        let value = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        modes.push((opcode, value));
        rest = &tail[4..];
    }
    modes
}
