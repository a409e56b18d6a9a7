#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Account Bridge - Trading Account Monitor & Relay
//!
//! A WebSocket bridge that monitors upstream trading accounts in near
//! real time and pushes material changes to connected clients, while
//! relaying risk-relevant events to a downstream risk service over one
//! persistent outbound connection.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Snapshot values and pure decision logic
//!   - `account`: balance snapshots, position P&L, fill events
//!   - `detector`: material-change detection between snapshots
//!   - `message`: the outbound message union and its wire format
//!   - `credentials`: credential pair with shape validation
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: interfaces for the upstream account service and the relay
//!   - `services`: session supervision and the per-client monitor tasks
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: REST/WebSocket adapter for the account service
//!   - `push`: client-facing WebSocket push server
//!   - `relay`: persistent outbound connection with reconnect/backoff
//!   - `config`: environment configuration
//!   - `health`: health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                  ┌─────────────┐     ┌─────────────┐
//! Upstream REST ──►│  Monitor    │────►│  Push       │──► Client 1
//! Upstream fills ─►│  Tasks (3/  │     │  Channels   │──► Client 2
//!                  │  client)    │     └─────────────┘──► Client N
//!                  └──────┬──────┘
//!                         │ fills / large deltas
//!                         ▼
//!                  ┌─────────────┐
//!                  │ Risk Relay  │──► Risk service (persistent WS)
//!                  └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core monitoring types with no I/O dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::account::{BalanceSnapshot, FillEvent, PositionPnl, SnapshotSource};
pub use domain::credentials::{CredentialFormatError, Credentials};
pub use domain::detector::ChangeDetector;
pub use domain::message::{PositionEntry, RelayMessage};

// Application ports and services
pub use application::ports::{AccountDataPort, ConnectionState, RiskRelayPort, UpstreamError};
pub use application::services::{
    MonitorSettings, SessionHandle, SessionSupervisor, StartMonitoringError, SupervisorStatus,
};

// Infrastructure config
pub use infrastructure::config::{
    BridgeConfig, ConfigError, RelaySettings, ServerSettings, UpstreamSettings,
};

// Servers and adapters (for integration tests)
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::push::{PushServer, PushServerError};
pub use infrastructure::relay::RelayConnector;
pub use infrastructure::relay::reconnect::{ReconnectConfig, ReconnectPolicy};
pub use infrastructure::upstream::HttpAccountClient;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
