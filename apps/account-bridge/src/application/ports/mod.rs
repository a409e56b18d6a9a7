//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`AccountDataPort`]: the upstream trading-account service
//! - [`RiskRelayPort`]: the downstream risk service connection

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::account::{BalanceSnapshot, FillEvent, PositionPnl};
use crate::domain::credentials::Credentials;
use crate::domain::message::RelayMessage;

// =============================================================================
// Upstream Errors
// =============================================================================

/// Failures talking to the upstream account service.
///
/// All variants are transient from the monitors' point of view: they are
/// logged, waited out, and retried. Only the session supervisor treats an
/// initial account-resolution failure as fatal for the session.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The upstream call failed outright.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The upstream call exceeded its deadline.
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    /// A stream event could not be parsed.
    #[error("malformed upstream message: {0}")]
    Malformed(String),

    /// The credentials resolve to no account.
    #[error("no accounts available for the supplied credentials")]
    NoAccounts,
}

// =============================================================================
// Account Data Port
// =============================================================================

/// The upstream trading-account service, consumed as an opaque collaborator.
///
/// Adapters construct domain snapshots at this boundary with all optional
/// upstream fields already defaulted.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountDataPort: Send + Sync {
    /// List the account ids reachable with the given credentials.
    async fn list_accounts(&self, credentials: &Credentials) -> Result<Vec<String>, UpstreamError>;

    /// Fetch a fresh balance snapshot for one account.
    ///
    /// The returned snapshot is tagged [`SnapshotSource::Poll`]; callers
    /// re-tag it with the path that triggered the fetch.
    ///
    /// [`SnapshotSource::Poll`]: crate::domain::account::SnapshotSource::Poll
    async fn account_summary(
        &self,
        credentials: &Credentials,
        account_id: &str,
    ) -> Result<BalanceSnapshot, UpstreamError>;

    /// Fetch the per-symbol unrealized P&L of all open positions.
    async fn positions(&self, credentials: &Credentials) -> Result<PositionPnl, UpstreamError>;

    /// Subscribe to the fill/execution event stream for one account.
    ///
    /// The receiver yields fills until the upstream stream ends; a closed
    /// receiver means the subscription must be re-established.
    async fn fill_stream(
        &self,
        credentials: &Credentials,
        account_id: &str,
    ) -> Result<mpsc::Receiver<FillEvent>, UpstreamError>;
}

// =============================================================================
// Risk Relay Port
// =============================================================================

/// Connection state of the outbound relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and able to send.
    Connected,
}

impl ConnectionState {
    /// Get the state name for logs and the health endpoint.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// The persistent outbound connection to the downstream risk service.
///
/// Delivery is best-effort: a send while not connected drops the message
/// with a warning and never fails the caller.
#[async_trait]
pub trait RiskRelayPort: Send + Sync {
    /// Make sure a connection exists or an attempt is in flight.
    ///
    /// Idempotent and single-flight: concurrent callers share one attempt.
    async fn ensure_connected(&self);

    /// Send a message if connected; drop it with a warning otherwise.
    async fn send(&self, message: &RelayMessage);

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

// =============================================================================
// Tests
// =============================================================================
