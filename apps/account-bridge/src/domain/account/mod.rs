//! Account Snapshot Types
//!
//! Immutable point-in-time values read from the upstream account service.
//! Snapshots are constructed once at the collaborator boundary (see the
//! upstream adapter) with every optional upstream field already defaulted,
//! so downstream logic never probes for missing fields.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Snapshot Source
// =============================================================================

/// Which monitor produced a balance snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    /// Fetched in reaction to a fill on the execution stream.
    Orderflow,
    /// Fetched by the fixed-interval balance safety net.
    Fallback,
    /// Fetched by a plain on-demand poll.
    Poll,
}

impl SnapshotSource {
    /// Get the wire name for this source.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Orderflow => "orderflow",
            Self::Fallback => "fallback",
            Self::Poll => "poll",
        }
    }
}

// =============================================================================
// Balance Snapshot
// =============================================================================

/// A point-in-time read of account balance state.
///
/// Immutable once constructed; a new reading is a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSnapshot {
    /// Upstream account identifier.
    pub account_id: String,
    /// Total account equity.
    pub total_balance: Decimal,
    /// Balance available for new positions.
    pub available_balance: Decimal,
    /// Unrealized profit and loss across open positions.
    pub unrealized_pnl: Decimal,
    /// Realized profit and loss.
    pub realized_pnl: Decimal,
    /// Margin held against open positions, when the upstream reports it.
    pub position_margin: Option<Decimal>,
    /// Total margin requirement, when the upstream reports it.
    pub total_margin: Option<Decimal>,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Which monitor path produced the snapshot.
    pub source: SnapshotSource,
}

impl BalanceSnapshot {
    /// Re-tag the snapshot with the monitor path that is about to emit it.
    #[must_use]
    pub fn with_source(mut self, source: SnapshotSource) -> Self {
        self.source = source;
        self
    }
}

// =============================================================================
// Position P&L
// =============================================================================

/// Per-symbol unrealized P&L, keyed by symbol.
///
/// Compared element-wise against the previous reading; a symbol appearing
/// or disappearing counts as a change.
pub type PositionPnl = HashMap<String, Decimal>;

/// Sum the unrealized P&L across all symbols.
#[must_use]
pub fn total_unrealized_pnl(positions: &PositionPnl) -> Decimal {
    positions.values().copied().sum()
}

// =============================================================================
// Fill Events
// =============================================================================

/// A fill (execution) event from the upstream execution stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillEvent {
    /// Upstream order identifier.
    pub order_id: String,
    /// Traded symbol.
    pub symbol: String,
    /// Order direction, as reported upstream ("BUY" / "SELL").
    pub side: String,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution price, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// When the fill occurred.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
