//! Bridge Configuration Settings
//!
//! Configuration types for the account bridge, loaded from environment
//! variables. Every value has a deployment default; only structurally
//! invalid input (an unparseable relay URL) is an error.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::services::MonitorSettings;

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket push server port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8090,
            health_port: 8082,
        }
    }
}

/// Outbound relay connection settings.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Risk service WebSocket URL.
    pub url: String,
    /// Initial reconnection delay.
    pub reconnect_delay_base: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Interval between heartbeat frames while connected.
    pub heartbeat_interval: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8091/ws/python-bridge".to_string(),
            reconnect_delay_base: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Upstream account service settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Base URL of the upstream REST surface.
    pub endpoint: String,
    /// Base URL of the upstream WebSocket surface (fill stream).
    pub ws_endpoint: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            ws_endpoint: "ws://localhost:9000".to_string(),
        }
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Outbound relay settings.
    pub relay: RelaySettings,
    /// Upstream account service settings.
    pub upstream: UpstreamSettings,
    /// Monitor task settings.
    pub monitor: MonitorSettings,
}

impl BridgeConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAY_URL` is set but empty or not a
    /// WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerSettings {
            ws_port: parse_env_u16("ACCOUNT_BRIDGE_WS_PORT", ServerSettings::default().ws_port),
            health_port: parse_env_u16(
                "ACCOUNT_BRIDGE_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let relay_url =
            std::env::var("RELAY_URL").unwrap_or_else(|_| RelaySettings::default().url);
        if relay_url.is_empty() {
            return Err(ConfigError::EmptyValue("RELAY_URL".to_string()));
        }
        if !relay_url.starts_with("ws://") && !relay_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue("RELAY_URL".to_string(), relay_url));
        }

        let relay = RelaySettings {
            url: relay_url,
            reconnect_delay_base: parse_env_duration_millis(
                "RELAY_RECONNECT_BASE_MS",
                RelaySettings::default().reconnect_delay_base,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "RELAY_RECONNECT_MAX_SECS",
                RelaySettings::default().reconnect_delay_max,
            ),
            max_reconnect_attempts: parse_env_u32(
                "RELAY_MAX_RECONNECT_ATTEMPTS",
                RelaySettings::default().max_reconnect_attempts,
            ),
            heartbeat_interval: parse_env_duration_secs(
                "RELAY_HEARTBEAT_SECS",
                RelaySettings::default().heartbeat_interval,
            ),
        };

        let upstream_endpoint = std::env::var("UPSTREAM_ENDPOINT")
            .unwrap_or_else(|_| UpstreamSettings::default().endpoint);
        let upstream = UpstreamSettings {
            ws_endpoint: std::env::var("UPSTREAM_WS_ENDPOINT").unwrap_or_else(|_| {
                upstream_endpoint
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1)
            }),
            endpoint: upstream_endpoint,
        };

        let monitor_defaults = MonitorSettings::default();
        let monitor = MonitorSettings {
            position_poll_interval: parse_env_duration_millis(
                "POSITION_POLL_INTERVAL_MS",
                monitor_defaults.position_poll_interval,
            ),
            balance_poll_interval: parse_env_duration_secs(
                "BALANCE_POLL_INTERVAL_SECS",
                monitor_defaults.balance_poll_interval,
            ),
            upstream_timeout: parse_env_duration_secs(
                "UPSTREAM_TIMEOUT_SECS",
                monitor_defaults.upstream_timeout,
            ),
            retry_delay: parse_env_duration_millis(
                "MONITOR_RETRY_DELAY_MS",
                monitor_defaults.retry_delay,
            ),
            channel_capacity: parse_env_usize(
                "PUSH_CHANNEL_CAPACITY",
                monitor_defaults.channel_capacity,
            ),
            risk_alert_delta: parse_env_decimal(
                "RISK_ALERT_BALANCE_DELTA",
                monitor_defaults.risk_alert_delta,
            ),
        };

        Ok(Self {
            server,
            relay,
            upstream,
            monitor,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a structurally invalid value.
    #[error("environment variable {0} has invalid value: {1}")]
    InvalidValue(String, String),
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_decimal(key: &str, default: Decimal) -> Decimal {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.ws_port, 8090);
        assert_eq!(settings.health_port, 8082);
    }

    #[test]
    fn relay_settings_defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.reconnect_delay_base, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(settings.max_reconnect_attempts, 10);
        assert_eq!(settings.heartbeat_interval, Duration::from_secs(30));
        assert!(settings.url.starts_with("ws://"));
    }

    #[test]
    fn upstream_defaults_derive_ws_endpoint() {
        let settings = UpstreamSettings::default();
        assert!(settings.endpoint.starts_with("http://"));
        assert!(settings.ws_endpoint.starts_with("ws://"));
    }
}
