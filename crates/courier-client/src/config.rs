//! Client configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the client can start with zero
//! configuration against a local development endpoint.

use std::time::Duration;

use courier_net::{ConnectionConfig, ReconnectPolicy};
use courier_shared::constants::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_PURGE_INTERVAL_MS, DEFAULT_RECONNECT_BASE_DELAY_MS, DEFAULT_WS_URL,
    TOKEN_QUERY_PARAM,
};
use url::Url;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Real-time endpoint.
    /// Env: `COURIER_WS_URL`
    /// Default: `ws://localhost:3001`
    pub ws_url: String,

    /// Retries after a failure before giving up.
    /// Env: `COURIER_MAX_RECONNECT_ATTEMPTS`
    /// Default: `5`
    pub max_reconnect_attempts: u32,

    /// Retry `n` waits `n` times this long.
    /// Env: `COURIER_RECONNECT_BASE_DELAY_MS`
    /// Default: `3000`
    pub reconnect_base_delay: Duration,

    /// How long a sent message may stay unacknowledged before a
    /// `delivery_timeout` event. `None` disables the check.
    /// Env: `COURIER_ACK_TIMEOUT_MS` (`0` disables)
    /// Default: `30000`
    pub ack_timeout: Option<Duration>,

    /// Keep-alive period while connected. `None` sends no heartbeats.
    /// Env: `COURIER_HEARTBEAT_INTERVAL_MS` (`0` disables)
    /// Default: `30000`
    pub heartbeat_interval: Option<Duration>,

    /// How often expired disappearing messages are purged from the store.
    /// `None` leaves purging to the caller.
    /// Env: `COURIER_PURGE_INTERVAL_MS` (`0` disables)
    /// Default: `60000`
    pub purge_interval: Option<Duration>,

    /// Flag outgoing messages as end-to-end encrypted.
    /// Env: `COURIER_ENCRYPT_MESSAGES` (true/false)
    /// Default: `true`
    pub encrypt_messages: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_DELAY_MS),
            ack_timeout: Some(Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS)),
            heartbeat_interval: Some(Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS)),
            purge_interval: Some(Duration::from_millis(DEFAULT_PURGE_INTERVAL_MS)),
            encrypt_messages: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("COURIER_WS_URL") {
            if Url::parse(&url).is_ok() {
                config.ws_url = url;
            } else {
                tracing::warn!(value = %url, "Invalid COURIER_WS_URL, using default");
            }
        }

        if let Some(val) = var("COURIER_MAX_RECONNECT_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) => config.max_reconnect_attempts = n,
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid COURIER_MAX_RECONNECT_ATTEMPTS, using default"
                ),
            }
        }

        if let Some(val) = var("COURIER_RECONNECT_BASE_DELAY_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.reconnect_base_delay = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid COURIER_RECONNECT_BASE_DELAY_MS, using default"
                ),
            }
        }

        for (key, slot) in [
            ("COURIER_ACK_TIMEOUT_MS", &mut config.ack_timeout),
            ("COURIER_HEARTBEAT_INTERVAL_MS", &mut config.heartbeat_interval),
            ("COURIER_PURGE_INTERVAL_MS", &mut config.purge_interval),
        ] {
            if let Some(val) = var(key) {
                match val.parse::<u64>() {
                    Ok(0) => *slot = None,
                    Ok(ms) => *slot = Some(Duration::from_millis(ms)),
                    Err(_) => tracing::warn!(value = %val, "Invalid {key}, using default"),
                }
            }
        }

        if let Some(val) = var("COURIER_ENCRYPT_MESSAGES") {
            config.encrypt_messages = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    /// Net-layer settings for one session. The token travels as a query
    /// parameter of the endpoint URL.
    pub fn connection_config(&self, token: &str) -> Result<ConnectionConfig, url::ParseError> {
        let mut url = Url::parse(&self.ws_url)?;
        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);

        Ok(ConnectionConfig {
            url: url.into(),
            policy: ReconnectPolicy {
                max_attempts: self.max_reconnect_attempts,
                base_delay: self.reconnect_base_delay,
            },
            heartbeat_interval: self.heartbeat_interval,
        })
    }
}
