//! Infrastructure layer - Adapters and external integrations.

/// Configuration loading from environment variables.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// Client-facing WebSocket push server.
pub mod push;

/// Persistent outbound connection to the risk service.
pub mod relay;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// HTTP/WebSocket adapter for the upstream account service.
pub mod upstream;
