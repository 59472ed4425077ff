use russh::{
    MethodKind, MethodSet, keys::PublicKey, server::Auth
};
use tracing::info;

/// Inbound authentication for the daemon: one authorized key, or nobody at all.
#[derive(Debug, Clone)]
pub struct DaemonAuth {
    authorized_key: Option<PublicKey>,
    allow_unauthenticated: bool,
}

impl DaemonAuth {
    pub fn new(authorized_key: Option<PublicKey>, allow_unauthenticated: bool) -> Self {
        Self {
            authorized_key,
            allow_unauthenticated,
        }
    }

    /// Methods advertised to clients.
    pub fn methods(&self) -> MethodSet {
        let mut methods = MethodSet::empty();
        if self.allow_unauthenticated {
            methods.push(MethodKind::None);
        }
        if self.authorized_key.is_some() {
            methods.push(MethodKind::PublicKey);
        }
        methods
    }

    pub fn check_none(&self, user: &str) -> Auth {
        if self.allow_unauthenticated {
            info!(user, "accepting unauthenticated client");
            Auth::Accept
        } else {
            self.reject()
        }
    }

    pub fn check_publickey(&self, user: &str, key: &PublicKey) -> Auth {
        match &self.authorized_key {
            Some(authorized) if authorized.key_data() == key.key_data() => {
                info!(user, "public key accepted");
                Auth::Accept
            }
            _ if self.allow_unauthenticated => Auth::Accept,
            _ => {
                info!(user, "public key rejected");
                self.reject()
            }
        }
    }

    fn reject(&self) -> Auth {
        Auth::Reject {
            proceed_with_methods: Some(self.methods()),
            partial_success: false,
        }
    }
}
