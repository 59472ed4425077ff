use std::sync::Arc;

use russh::{
    client::{self, AuthResult, Handle}, keys::{HashAlg, PrivateKeyWithHashAlg}
};
use ssh_core::keys::load_private_key_from_str;
use tracing::{info, warn};

use crate::target::TargetConfig;

// Internal Result type alias
type Result<T> = crate::ClientResult<T>;

enum AuthMethod {
    PublicKey(Arc<russh::keys::PrivateKey>),
    Password(String),
}

impl AuthMethod {
    fn label(&self) -> &'static str {
        match self {
            AuthMethod::PublicKey(_) => "publickey",
            AuthMethod::Password(_) => "password",
        }
    }

    async fn authenticate<H>(&self, session: &mut Handle<H>, username: &str, rsa_hint: Option<HashAlg>) -> Result<AuthResult>
    where
        H: client::Handler + Send,
    {
        match self {
            AuthMethod::PublicKey(key) => session
                .authenticate_publickey(username.to_string(), PrivateKeyWithHashAlg::new(key.clone(), rsa_hint))
                .await
                .map_err(Into::into),
            AuthMethod::Password(password) => session
                .authenticate_password(username.to_string(), password.clone())
                .await
                .map_err(Into::into),
        }
    }
}

/// Build the ordered method list for a target: key first, password second.
fn methods_for(target: &TargetConfig) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();
    if !target.private_key.is_empty() {
        let key = load_private_key_from_str(&target.private_key)?;
        methods.push(AuthMethod::PublicKey(Arc::new(key)));
    }
    if !target.password.is_empty() {
        methods.push(AuthMethod::Password(target.password.clone()));
    }
    Ok(methods)
}

/// Authenticate against the target, preferring the private key and falling back to the password.
pub async fn authenticate_target<H>(session: &mut Handle<H>, target: &TargetConfig) -> Result<()>
where
    H: client::Handler + Send,
{
    let methods = methods_for(target)?;
    if methods.is_empty() {
        return Err(crate::ClientError::AuthFailed(
            "target config has neither a private key nor a password".to_string(),
        ));
    }

    let rsa_hash_hint = session.best_supported_rsa_hash().await.unwrap_or(None).flatten();

    for method in methods {
        let label = method.label();
        match method.authenticate(session, &target.user, rsa_hash_hint).await {
            Ok(AuthResult::Success) => {
                info!(method = label, user = %target.user, "target authentication succeeded");
                return Ok(());
            }
            Ok(AuthResult::Failure { .. }) => {
                warn!(method = label, "target rejected authentication");
            }
            Err(err) => {
                warn!(method = label, error = %err, "target authentication attempt failed");
            }
        }
    }

    Err(crate::ClientError::AuthFailed(format!(
        "all authentication methods were rejected for user {}",
        target.user
    )))
}
