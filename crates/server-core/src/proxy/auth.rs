//! Inbound authentication for the proxy.
//!
//! An [`Authenticator`] decides who may connect and returns the
//! [`Permissions`] that tell the proxy where to take them.

use async_trait::async_trait;
use client_core::{LOG_MESSAGE_OPTION, LogMessage, PROXY_TARGET_CONFIG_OPTION, Permissions, TargetConfig};
use russh::{MethodKind, MethodSet, keys::PublicKey};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::ServerResult;

#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Methods advertised to connecting clients.
    fn methods(&self) -> MethodSet;

    async fn password(&self, user: &str, password: &str) -> ServerResult<Option<Permissions>>;

    async fn public_key(&self, user: &str, key: &PublicKey) -> ServerResult<Option<Permissions>>;
}

/// Shared credentials mapped onto one fixed target.
pub struct StaticAuthenticator {
    password: Option<SecretString>,
    authorized_key: Option<PublicKey>,
    target_json: String,
    log_guid: Option<String>,
}

impl StaticAuthenticator {
    pub fn new(
        target: &TargetConfig,
        password: Option<SecretString>,
        authorized_key: Option<PublicKey>,
        log_guid: Option<String>,
    ) -> ServerResult<Self> {
        Ok(Self {
            password: password.filter(|p| !p.expose_secret().is_empty()),
            authorized_key,
            target_json: serde_json::to_string(target)?,
            log_guid: log_guid.filter(|g| !g.is_empty()),
        })
    }

    fn permissions_for(&self, user: &str) -> ServerResult<Permissions> {
        let mut permissions = Permissions::default().with_option(PROXY_TARGET_CONFIG_OPTION, self.target_json.clone());
        if let Some(guid) = &self.log_guid {
            let message = LogMessage {
                guid: guid.clone(),
                message: format!("Successful remote access by {user}"),
                index: 0,
            };
            permissions = permissions.with_option(LOG_MESSAGE_OPTION, serde_json::to_string(&message)?);
        }
        Ok(permissions)
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    fn methods(&self) -> MethodSet {
        let mut methods = MethodSet::empty();
        if self.authorized_key.is_some() {
            methods.push(MethodKind::PublicKey);
        }
        if self.password.is_some() {
            methods.push(MethodKind::Password);
        }
        methods
    }

    async fn password(&self, user: &str, password: &str) -> ServerResult<Option<Permissions>> {
        match &self.password {
            Some(expected) if expected.expose_secret() == password => self.permissions_for(user).map(Some),
            _ => {
                debug!(user, "password rejected");
                Ok(None)
            }
        }
    }

    async fn public_key(&self, user: &str, key: &PublicKey) -> ServerResult<Option<Permissions>> {
        match &self.authorized_key {
            Some(authorized) if authorized.key_data() == key.key_data() => self.permissions_for(user).map(Some),
            _ => {
                debug!(user, "public key rejected");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use client_core::{parse_log_message, parse_target_config};
    use russh::keys::{Algorithm, PrivateKey, ssh_key::rand_core::OsRng};

    use super::*;

    fn target() -> TargetConfig {
        TargetConfig {
            address: "10.0.0.5:2222".into(),
            user: "vcap".into(),
            password: "secret".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn password_grants_target_permissions() {
        let auth = StaticAuthenticator::new(&target(), Some("pw".to_string().into()), None, None).unwrap();
        assert!(auth.password("alice", "wrong").await.unwrap().is_none());

        let permissions = auth.password("alice", "pw").await.unwrap().unwrap();
        assert_eq!(parse_target_config(Some(&permissions)).unwrap(), target());
        assert!(parse_log_message(Some(&permissions)).unwrap().is_none());
    }

    #[tokio::test]
    async fn public_key_and_log_guid() {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let other = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let auth = StaticAuthenticator::new(&target(), None, Some(key.public_key().clone()), Some("guid-1".into())).unwrap();

        assert!(auth.public_key("bob", other.public_key()).await.unwrap().is_none());
        assert!(auth.password("bob", "").await.unwrap().is_none());

        let permissions = auth.public_key("bob", key.public_key()).await.unwrap().unwrap();
        let message = parse_log_message(Some(&permissions)).unwrap().unwrap();
        assert_eq!(message.guid, "guid-1");
        assert_eq!(message.message, "Successful remote access by bob");
    }
}
