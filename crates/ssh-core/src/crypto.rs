use std::borrow::Cow;

use russh::{
    Preferred,
    keys::{Algorithm, HashAlg},
};

use crate::error::{SshCoreError, SshResult};

pub fn default_preferred() -> Preferred {
    Preferred::DEFAULT.clone()
}

/// Wider candidate pool used when an operator allowlists older algorithms.
pub fn legacy_preferred() -> Preferred {
    Preferred {
        kex: Cow::Owned(vec![russh::kex::DH_G1_SHA1, russh::kex::DH_G14_SHA1, russh::kex::CURVE25519]),
        key: Cow::Owned(vec![
            Algorithm::Rsa { hash: None },
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha256),
            },
            Algorithm::Rsa {
                hash: Some(HashAlg::Sha512),
            },
            Algorithm::Ed25519,
        ]),
        cipher: Cow::Owned(vec![
            russh::cipher::AES_128_CBC,
            russh::cipher::TRIPLE_DES_CBC,
            russh::cipher::AES_128_CTR,
            russh::cipher::CHACHA20_POLY1305,
        ]),
        mac: Cow::Owned(vec![russh::mac::HMAC_SHA1, russh::mac::HMAC_SHA256, russh::mac::HMAC_SHA512]),
        compression: Preferred::DEFAULT.compression,
    }
}

/// Operator supplied algorithm allowlists. Empty lists keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlgorithmAllowlist {
    pub ciphers: Vec<String>,
    pub macs: Vec<String>,
    pub key_exchanges: Vec<String>,
}

impl AlgorithmAllowlist {
    /// Build from the comma separated flag values used by the daemons.
    pub fn from_csv(ciphers: &str, macs: &str, key_exchanges: &str) -> Self {
        Self {
            ciphers: split_csv(ciphers),
            macs: split_csv(macs),
            key_exchanges: split_csv(key_exchanges),
        }
    }
}

/// Restrict the default preference lists to the allowlisted names, keeping the caller's order.
pub fn filtered_preferred(allow: &AlgorithmAllowlist) -> SshResult<Preferred> {
    let defaults = default_preferred();
    let legacy = legacy_preferred();
    let mut preferred = defaults.clone();

    if !allow.ciphers.is_empty() {
        preferred.cipher = Cow::Owned(select("cipher", &allow.ciphers, &[&*defaults.cipher, &*legacy.cipher])?);
    }
    if !allow.macs.is_empty() {
        preferred.mac = Cow::Owned(select("MAC", &allow.macs, &[&*defaults.mac, &*legacy.mac])?);
    }
    if !allow.key_exchanges.is_empty() {
        preferred.kex = Cow::Owned(select("key exchange", &allow.key_exchanges, &[&*defaults.kex, &*legacy.kex])?);
    }
    Ok(preferred)
}

fn select<N>(kind: &'static str, wanted: &[String], pools: &[&[N]]) -> SshResult<Vec<N>>
where
    N: AsRef<str> + Copy,
{
    wanted
        .iter()
        .map(|name| {
            pools
                .iter()
                .flat_map(|pool| pool.iter())
                .find(|candidate| candidate.as_ref() == name)
                .copied()
                .ok_or_else(|| SshCoreError::UnsupportedAlgorithm {
                    kind,
                    name: name.clone(),
                })
        })
        .collect()
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
