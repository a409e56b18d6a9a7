//! Configuration
//!
//! Environment-variable driven configuration for the bridge.

mod settings;

pub use settings::{BridgeConfig, ConfigError, RelaySettings, ServerSettings, UpstreamSettings};
