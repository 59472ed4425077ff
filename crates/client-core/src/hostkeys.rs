use russh::keys::PublicKey;
use ssh_core::keys::{MD5_FINGERPRINT_LENGTH, SHA1_FINGERPRINT_LENGTH, fingerprint_matches};
use tracing::{debug, warn};

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;

/// Pins the target's host key to an expected MD5 or SHA1 fingerprint.
///
/// An empty expectation accepts any key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintCheck {
    expected: Option<String>,
}

impl FingerprintCheck {
    pub fn new(expected: &str) -> Self {
        let expected = expected.trim();
        Self {
            expected: (!expected.is_empty()).then(|| expected.to_string()),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.expected.is_some()
    }

    pub fn verify(&self, server_key: &PublicKey) -> Result<()> {
        let Some(expected) = self.expected.as_deref() else {
            return Ok(());
        };
        if !matches!(expected.len(), MD5_FINGERPRINT_LENGTH | SHA1_FINGERPRINT_LENGTH) {
            warn!(length = expected.len(), "expected host fingerprint has unknown length");
        }
        if fingerprint_matches(expected, server_key) {
            debug!("host fingerprint verified");
            Ok(())
        } else {
            Err(crate::ClientError::HostKeyFailed("host fingerprint mismatch".to_string()))
        }
    }
}

/// Client handler for plain target connections: only checks the host key.
#[derive(Debug, Clone, Default)]
pub struct TargetClientHandler {
    check: FingerprintCheck,
}

impl TargetClientHandler {
    pub fn new(check: FingerprintCheck) -> Self {
        Self { check }
    }
}

impl russh::client::Handler for TargetClientHandler {
    type Error = crate::ClientError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        let verdict = self.check.verify(server_public_key).map(|_| true);
        async move { verdict }
    }
}

#[cfg(test)]
mod tests {
    use russh::keys::{Algorithm, PrivateKey, ssh_key::rand_core::OsRng};
    use ssh_core::keys::{md5_fingerprint, sha1_fingerprint};

    use super::*;

    #[test]
    fn unpinned_accepts_anything() {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let check = FingerprintCheck::new("  ");
        assert!(!check.is_pinned());
        assert!(check.verify(key.public_key()).is_ok());
    }

    #[test]
    fn pinned_md5_and_sha1() {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let md5 = md5_fingerprint(key.public_key()).unwrap();
        let sha1 = sha1_fingerprint(key.public_key()).unwrap();
        assert!(FingerprintCheck::new(&md5).verify(key.public_key()).is_ok());
        assert!(FingerprintCheck::new(&sha1).verify(key.public_key()).is_ok());
    }

    #[test]
    fn mismatch_is_reported() {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let other = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let md5 = md5_fingerprint(other.public_key()).unwrap();
        let err = FingerprintCheck::new(&md5).verify(key.public_key()).unwrap_err();
        assert!(err.to_string().contains("mismatch"));
    }
}
