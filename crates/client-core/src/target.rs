use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{ClientError, ClientResult};

/// Critical option carrying the JSON [`TargetConfig`].
pub const PROXY_TARGET_CONFIG_OPTION: &str = "proxy-target-config";
/// Critical option carrying the JSON [`LogMessage`].
pub const LOG_MESSAGE_OPTION: &str = "log-message";

/// Result of authenticating an inbound connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions {
    pub critical_options: HashMap<String, String>,
    pub extensions: HashMap<String, String>,
}

impl Permissions {
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.critical_options.insert(name.into(), value.into());
        self
    }
}

/// Where and how the proxy connects on behalf of a client.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub host_fingerprint: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub private_key: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("address", &self.address)
            .field("host_fingerprint", &self.host_fingerprint)
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("private_key", &redacted(&self.private_key))
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}

/// App-log line correlated with a proxied connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub index: i32,
}

/// Extract the target configuration from the permissions of an authenticated connection.
pub fn parse_target_config(permissions: Option<&Permissions>) -> ClientResult<TargetConfig> {
    let permissions = permissions.ok_or(ClientError::MissingPermissions)?;
    let raw = permissions
        .critical_options
        .get(PROXY_TARGET_CONFIG_OPTION)
        .ok_or(ClientError::MissingOption(PROXY_TARGET_CONFIG_OPTION))?;
    serde_json::from_str(raw).map_err(|source| ClientError::InvalidOption {
        option: PROXY_TARGET_CONFIG_OPTION,
        source,
    })
}

/// Extract the optional app-log message. Absent permissions or option yield `Ok(None)`.
pub fn parse_log_message(permissions: Option<&Permissions>) -> ClientResult<Option<LogMessage>> {
    let Some(raw) = permissions.and_then(|p| p.critical_options.get(LOG_MESSAGE_OPTION)) else {
        return Ok(None);
    };
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|source| ClientError::InvalidOption {
            option: LOG_MESSAGE_OPTION,
            source,
        })
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_address(address: &str) -> ClientResult<(String, u16)> {
    let invalid = || ClientError::InvalidAddress(address.to_string());
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_config_uses_snake_case_tags() {
        let json = r#"{"address":"10.0.0.5:2222","host_fingerprint":"aa","user":"vcap","password":"pw","private_key":""}"#;
        let perms = Permissions::default().with_option(PROXY_TARGET_CONFIG_OPTION, json);
        let config = parse_target_config(Some(&perms)).unwrap();
        assert_eq!(config.address, "10.0.0.5:2222");
        assert_eq!(config.user, "vcap");
        assert_eq!(config.password, "pw");

        let round = serde_json::to_string(&config).unwrap();
        assert!(round.contains("\"host_fingerprint\":\"aa\""));
    }

    #[test]
    fn each_failure_has_its_own_error() {
        assert!(matches!(parse_target_config(None), Err(ClientError::MissingPermissions)));

        let empty = Permissions::default();
        assert!(matches!(
            parse_target_config(Some(&empty)),
            Err(ClientError::MissingOption(PROXY_TARGET_CONFIG_OPTION))
        ));

        let bad = Permissions::default().with_option(PROXY_TARGET_CONFIG_OPTION, "{");
        assert!(matches!(parse_target_config(Some(&bad)), Err(ClientError::InvalidOption { .. })));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config = TargetConfig {
            password: "hunter2".into(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn log_message_is_optional() {
        assert_eq!(parse_log_message(None).unwrap(), None);
        let perms = Permissions::default().with_option(LOG_MESSAGE_OPTION, r#"{"guid":"app-guid","message":"hi","index":2}"#);
        let msg = parse_log_message(Some(&perms)).unwrap().unwrap();
        assert_eq!(msg.guid, "app-guid");
        assert_eq!(msg.index, 2);
    }

    #[test]
    fn addresses_need_host_and_port() {
        assert_eq!(split_address("127.0.0.1:22").unwrap(), ("127.0.0.1".into(), 22));
        assert_eq!(split_address("[::1]:2222").unwrap(), ("::1".into(), 2222));
        assert!(split_address("localhost").is_err());
        assert!(split_address(":22").is_err());
        assert!(split_address("host:99999").is_err());
    }
}
