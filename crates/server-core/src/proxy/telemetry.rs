//! Connection gauge and app-log lines for proxied connections.

use std::sync::Mutex;

use client_core::LogMessage;
use ssh_core::logging::{APP_LOG_TARGET, METRICS_TARGET};
use tracing::info;

pub const CONNECTIONS_METRIC: &str = "ssh-connections";

/// Number of proxied connections currently paired with a target.
#[derive(Debug, Default)]
pub struct ConnectionGauge {
    count: Mutex<i64>,
}

impl ConnectionGauge {
    pub fn increment(&self) -> i64 {
        self.adjust(1)
    }

    pub fn decrement(&self) -> i64 {
        self.adjust(-1)
    }

    pub fn current(&self) -> i64 {
        *self.count.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn adjust(&self, delta: i64) -> i64 {
        let value = {
            let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
            *count += delta;
            *count
        };
        info!(target: METRICS_TARGET, metric = CONNECTIONS_METRIC, ssh_connections = value, "gauge");
        value
    }
}

pub fn emit_app_log(message: &LogMessage) {
    info!(
        target: APP_LOG_TARGET,
        guid = %message.guid,
        index = message.index,
        message = %message.message,
        "app log"
    );
}

/// The closing line paired with a connection's opening `log-message`.
pub fn ended_message(start: &LogMessage, user: &str) -> LogMessage {
    LogMessage {
        guid: start.guid.clone(),
        message: format!("Remote access ended for {user}"),
        index: start.index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_tracks_open_connections() {
        let gauge = ConnectionGauge::default();
        assert_eq!(gauge.increment(), 1);
        assert_eq!(gauge.increment(), 2);
        assert_eq!(gauge.decrement(), 1);
        assert_eq!(gauge.current(), 1);
    }

    #[test]
    fn ended_message_keeps_correlation() {
        let start = LogMessage {
            guid: "app-guid".into(),
            message: "Successful remote access by alice".into(),
            index: 3,
        };
        let ended = ended_message(&start, "alice");
        assert_eq!(ended.guid, "app-guid");
        assert_eq!(ended.index, 3);
        assert_eq!(ended.message, "Remote access ended for alice");
    }
}
