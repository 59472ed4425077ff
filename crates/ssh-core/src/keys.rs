use base64::Engine;
use rsa::{RsaPrivateKey, pkcs1::DecodeRsaPrivateKey, pkcs8::EncodePrivateKey};
use russh::keys::{self, PublicKey};
use sha1::{Digest, Sha1};

use crate::error::{SshCoreError, SshResult};

/// Length of a colon separated MD5 fingerprint (`aa:bb:..`, 16 bytes).
pub const MD5_FINGERPRINT_LENGTH: usize = 47;
/// Length of a colon separated SHA1 fingerprint (20 bytes).
pub const SHA1_FINGERPRINT_LENGTH: usize = 59;

/// Load an unencrypted private key from string data, supporting:
/// - OpenSSH keys
/// - PKCS#8
/// - Traditional PEM "BEGIN RSA PRIVATE KEY"
pub fn load_private_key_from_str(data: &str) -> SshResult<keys::PrivateKey> {
    if let Ok(key) = keys::PrivateKey::from_openssh(data) {
        return Ok(key);
    }

    match keys::decode_secret_key(data, None) {
        Ok(key) => return Ok(key),
        Err(keys::Error::KeyIsEncrypted) => {
            return Err(SshCoreError::InvalidKey("encrypted private keys are not supported".into()));
        }
        Err(_) => {}
    }

    if let Some(body) = pem_body(data, "RSA PRIVATE KEY") {
        if body.headers_present {
            return Err(SshCoreError::InvalidKey("encrypted legacy PEM keys are not supported".into()));
        }
        let der = base64::engine::general_purpose::STANDARD
            .decode(body.base64)
            .map_err(|e| SshCoreError::InvalidKey(format!("base64 decode error: {e}")))?;
        return load_pkcs1(&der);
    }

    Err(SshCoreError::InvalidKey("not a valid OpenSSH, PKCS#8, or legacy PEM private key".into()))
}

/// Parse a single `authorized_keys` style line (`ssh-ed25519 AAAA... comment`).
pub fn parse_authorized_key(line: &str) -> SshResult<PublicKey> {
    let line = line.trim();
    if line.is_empty() {
        return Err(SshCoreError::empty("authorized key"));
    }
    PublicKey::from_openssh(line).map_err(|e| SshCoreError::InvalidKey(e.to_string()))
}

/// Colon separated hex MD5 of the key's wire encoding.
pub fn md5_fingerprint(key: &PublicKey) -> SshResult<String> {
    let blob = wire_blob(key)?;
    Ok(colon_hex(&md5::compute(&blob).0))
}

/// Colon separated hex SHA1 of the key's wire encoding.
pub fn sha1_fingerprint(key: &PublicKey) -> SshResult<String> {
    let blob = wire_blob(key)?;
    Ok(colon_hex(&Sha1::digest(&blob)))
}

/// Compare a presented host key against an expected fingerprint.
///
/// The hash is chosen by the length of `expected`; any other length never matches.
pub fn fingerprint_matches(expected: &str, key: &PublicKey) -> bool {
    let actual = match expected.len() {
        MD5_FINGERPRINT_LENGTH => md5_fingerprint(key),
        SHA1_FINGERPRINT_LENGTH => sha1_fingerprint(key),
        _ => return false,
    };
    matches!(actual, Ok(actual) if actual.eq_ignore_ascii_case(expected))
}

fn wire_blob(key: &PublicKey) -> SshResult<Vec<u8>> {
    key.to_bytes().map_err(|e| SshCoreError::InvalidKey(e.to_string()))
}

fn colon_hex(digest: &[u8]) -> String {
    digest.iter().map(|b| hex::encode([*b])).collect::<Vec<_>>().join(":")
}

struct PemBody {
    headers_present: bool,
    base64: String,
}

fn pem_body(data: &str, label: &str) -> Option<PemBody> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = data.find(&begin)? + begin.len();
    let end_idx = data.find(&end)?;
    let section = data.get(start..end_idx)?;
    let mut headers_present = false;
    let mut base64 = String::new();
    for line in section.lines().map(str::trim) {
        if line.contains(':') {
            headers_present = true;
            continue;
        }
        base64.push_str(line);
    }
    Some(PemBody { headers_present, base64 })
}

fn load_pkcs1(der: &[u8]) -> SshResult<keys::PrivateKey> {
    let rsa = RsaPrivateKey::from_pkcs1_der(der).map_err(|e| SshCoreError::InvalidKey(format!("PKCS1 decode error: {e}")))?;
    let pkcs8 = rsa
        .to_pkcs8_pem(Default::default())
        .map_err(|e| SshCoreError::InvalidKey(format!("PKCS8 encode error: {e}")))?;
    keys::decode_secret_key(pkcs8.as_str(), None).map_err(|e| SshCoreError::InvalidKey(e.to_string()))
}
