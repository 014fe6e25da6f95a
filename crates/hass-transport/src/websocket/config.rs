//! Hub connection configuration.

use std::{fmt, time::Duration};

use url::Url;

use crate::reconnect::BackoffConfig;

/// Path of the hub's WebSocket API.
pub const WEBSOCKET_PATH: &str = "api/websocket";

/// Configuration for the hub client.
#[derive(Clone)]
pub struct WsConfig {
    // Endpoint
    /// WebSocket endpoint URL.
    pub url: String,
    /// Bearer credential sent in the authentication message.
    pub access_token: String,

    // Reconnection settings
    /// Delay between two connection attempts.
    pub reconnect_interval: Duration,
    /// Upper bound for the delay when a backoff factor is configured.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier (1.0 keeps the interval fixed).
    pub reconnect_backoff_factor: f64,
    /// Random jitter factor (0.0-1.0) for reconnection delays.
    pub reconnect_jitter: f64,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,

    // Outbound queue and requeue delays
    /// Capacity of the outbound request queue.
    pub queue_capacity: usize,
    /// Requeue delay while the health probe reports the hub unavailable.
    pub hub_unavailable_delay: Duration,
    /// Requeue delay while the session is not authenticated yet.
    pub auth_wait_delay: Duration,
    /// Requeue delay after an `id_reuse`/`invalid_format` failure.
    pub id_rotation_delay: Duration,
    /// Requeue delay after any other failed result.
    pub failed_request_delay: Duration,
    /// Re-send requests that were written on a previous connection and never
    /// answered.
    pub redeliver_on_reconnect: bool,

    // Frames
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: String::new(),
            reconnect_interval: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(2),
            reconnect_backoff_factor: 1.0,
            reconnect_jitter: 0.0,
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 10,
            hub_unavailable_delay: Duration::from_secs(2),
            auth_wait_delay: Duration::from_secs(1),
            id_rotation_delay: Duration::from_millis(10),
            failed_request_delay: Duration::from_secs(3),
            redeliver_on_reconnect: true,
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl fmt::Debug for WsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConfig")
            .field("url", &self.url)
            .field("access_token", &"<redacted>")
            .field("reconnect_interval", &self.reconnect_interval)
            .field("reconnect_max_delay", &self.reconnect_max_delay)
            .field("reconnect_backoff_factor", &self.reconnect_backoff_factor)
            .field("reconnect_jitter", &self.reconnect_jitter)
            .field("connect_timeout", &self.connect_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("hub_unavailable_delay", &self.hub_unavailable_delay)
            .field("auth_wait_delay", &self.auth_wait_delay)
            .field("id_rotation_delay", &self.id_rotation_delay)
            .field("failed_request_delay", &self.failed_request_delay)
            .field("redeliver_on_reconnect", &self.redeliver_on_reconnect)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl WsConfig {
    /// Create a new configuration with the given URL and credential.
    pub fn new(url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Build the configuration from a bare hub host such as `hub.local:8123`.
    pub fn from_host(secure: bool, host: &str, access_token: impl Into<String>) -> Self {
        let scheme = if secure { "wss" } else { "ws" };
        Self::new(format!("{scheme}://{host}/{WEBSOCKET_PATH}"), access_token)
    }

    /// Set the delay between connection attempts.
    ///
    /// Also raises the maximum delay when it would otherwise be below the
    /// interval.
    #[must_use]
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        if self.reconnect_max_delay < interval {
            self.reconnect_max_delay = interval;
        }
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the requeue delay used while the hub is unavailable.
    #[must_use]
    pub fn hub_unavailable_delay(mut self, delay: Duration) -> Self {
        self.hub_unavailable_delay = delay;
        self
    }

    /// Set the requeue delay used while waiting for authentication.
    #[must_use]
    pub fn auth_wait_delay(mut self, delay: Duration) -> Self {
        self.auth_wait_delay = delay;
        self
    }

    /// Set the requeue delay used after an id rotation.
    #[must_use]
    pub fn id_rotation_delay(mut self, delay: Duration) -> Self {
        self.id_rotation_delay = delay;
        self
    }

    /// Set the requeue delay used after a failed result.
    #[must_use]
    pub fn failed_request_delay(mut self, delay: Duration) -> Self {
        self.failed_request_delay = delay;
        self
    }

    /// Set whether unanswered requests are re-sent after a reconnect.
    #[must_use]
    pub fn redeliver_on_reconnect(mut self, redeliver: bool) -> Self {
        self.redeliver_on_reconnect = redeliver;
        self
    }

    /// Set the maximum inbound frame size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_interval,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Root of the hub's HTTP API derived from the WebSocket URL.
    ///
    /// `wss://hub.local/api/websocket` becomes `https://hub.local/api/`.
    pub fn health_url(&self) -> Result<Url, String> {
        let mut url = Url::parse(&self.url).map_err(|e| format!("Invalid URL: {e}"))?;
        let scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            other => return Err(format!("Unsupported URL scheme: {other}")),
        };
        url.set_scheme(scheme)
            .map_err(|()| format!("Cannot switch URL scheme to {scheme}"))?;
        url.set_path("/api/");
        url.set_query(None);
        Ok(url)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        match Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => {}
            Ok(url) => return Err(format!("Unsupported URL scheme: {}", url.scheme())),
            Err(e) => return Err(format!("Invalid URL: {e}")),
        }
        if self.access_token.is_empty() {
            return Err("Access token cannot be empty".to_string());
        }
        self.backoff().validate()?;
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("Queue capacity must be > 0".to_string());
        }
        if self.hub_unavailable_delay.is_zero() {
            return Err("Hub unavailable delay must be > 0".to_string());
        }
        if self.auth_wait_delay.is_zero() {
            return Err("Auth wait delay must be > 0".to_string());
        }
        if self.max_message_size == 0 {
            return Err("Max message size must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WsConfig::default();
        assert!(config.url.is_empty());
        assert_eq!(config.reconnect_interval, Duration::from_secs(2));
        assert_eq!(config.reconnect_backoff_factor, 1.0);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.hub_unavailable_delay, Duration::from_secs(2));
        assert_eq!(config.auth_wait_delay, Duration::from_secs(1));
        assert_eq!(config.id_rotation_delay, Duration::from_millis(10));
        assert_eq!(config.failed_request_delay, Duration::from_secs(3));
        assert!(config.redeliver_on_reconnect);
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_from_host() {
        let config = WsConfig::from_host(false, "hub.local:8123", "token");
        assert_eq!(config.url, "ws://hub.local:8123/api/websocket");

        let config = WsConfig::from_host(true, "hub.example.org", "token");
        assert_eq!(config.url, "wss://hub.example.org/api/websocket");
    }

    #[test]
    fn test_builder_pattern() {
        let config = WsConfig::new("ws://hub.local/api/websocket", "token")
            .reconnect_interval(Duration::from_secs(5))
            .queue_capacity(64)
            .failed_request_delay(Duration::from_secs(1))
            .redeliver_on_reconnect(false);

        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.failed_request_delay, Duration::from_secs(1));
        assert!(!config.redeliver_on_reconnect);
    }

    #[test]
    fn test_health_url() {
        let config = WsConfig::from_host(false, "hub.local:8123", "token");
        assert_eq!(
            config.health_url().unwrap().as_str(),
            "http://hub.local:8123/api/"
        );

        let config = WsConfig::from_host(true, "hub.example.org", "token");
        assert_eq!(
            config.health_url().unwrap().as_str(),
            "https://hub.example.org/api/"
        );
    }

    #[test]
    fn test_validation_empty_url() {
        let result = WsConfig::default().validate();
        assert_eq!(result.unwrap_err(), "URL cannot be empty");
    }

    #[test]
    fn test_validation_rejects_http_scheme() {
        let result = WsConfig::new("http://hub.local/api/websocket", "token").validate();
        assert_eq!(result.unwrap_err(), "Unsupported URL scheme: http");
    }

    #[test]
    fn test_validation_empty_token() {
        let result = WsConfig::new("ws://hub.local/api/websocket", "").validate();
        assert_eq!(result.unwrap_err(), "Access token cannot be empty");
    }

    #[test]
    fn test_validation_zero_queue_capacity() {
        let result = WsConfig::new("ws://hub.local/api/websocket", "token")
            .queue_capacity(0)
            .validate();
        assert_eq!(result.unwrap_err(), "Queue capacity must be > 0");
    }

    #[test]
    fn test_validation_valid_config() {
        let config = WsConfig::from_host(false, "hub.local:8123", "token");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = WsConfig::from_host(false, "hub.local", "super-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
