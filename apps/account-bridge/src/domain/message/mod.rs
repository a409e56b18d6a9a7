//! Outbound Message Types
//!
//! Wire format for everything the bridge pushes: client-facing updates on
//! the per-client push channel and risk-relevant events on the outbound
//! relay share this tagged union.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {"type": "CONNECTION", "accountId": "ACC-1", "message": "...", "timestamp": "..."}
//! {"type": "BALANCE_UPDATE", "accountId": "ACC-1", "totalBalance": "100000", ...}
//! {"type": "PNL_UPDATE", "accountId": "ACC-1", "positions": [...], ...}
//! {"type": "RISK_ALERT", "clientId": "c1", "change": "-1500.00", ...}
//! {"type": "ERROR", "message": "...", "timestamp": "..."}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::{BalanceSnapshot, PositionPnl, SnapshotSource, total_unrealized_pnl};

// =============================================================================
// Position Entry
// =============================================================================

/// One open position inside a `PNL_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    /// Traded symbol.
    pub symbol: String,
    /// Unrealized P&L for the symbol.
    pub unrealized_pnl: Decimal,
}

// =============================================================================
// Relay Message
// =============================================================================

/// A message on the push channel or the risk relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayMessage {
    /// Session established; first message of every push session.
    #[serde(rename = "CONNECTION", rename_all = "camelCase")]
    Connection {
        /// Resolved upstream account identifier.
        account_id: String,
        /// Human-readable connection note.
        message: String,
        /// When the session was established.
        timestamp: DateTime<Utc>,
    },

    /// A material balance change.
    #[serde(rename = "BALANCE_UPDATE", rename_all = "camelCase")]
    BalanceUpdate {
        /// Upstream account identifier.
        account_id: String,
        /// Total account equity.
        total_balance: Decimal,
        /// Balance available for new positions.
        available_balance: Decimal,
        /// Unrealized P&L across open positions.
        unrealized_pnl: Decimal,
        /// Realized P&L.
        realized_pnl: Decimal,
        /// Margin held against open positions.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position_margin: Option<Decimal>,
        /// Total margin requirement.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_margin: Option<Decimal>,
        /// Which monitor path produced the update.
        source: SnapshotSource,
        /// Total balance of the previously emitted snapshot.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_balance: Option<Decimal>,
        /// When the snapshot was taken.
        timestamp: DateTime<Utc>,
    },

    /// A material position P&L change.
    #[serde(rename = "PNL_UPDATE", rename_all = "camelCase")]
    PnlUpdate {
        /// Upstream account identifier.
        account_id: String,
        /// Sum of unrealized P&L across all positions.
        total_unrealized_pnl: Decimal,
        /// Total account equity at the time of the update.
        total_balance: Decimal,
        /// Per-symbol breakdown.
        positions: Vec<PositionEntry>,
        /// When the positions were read.
        timestamp: DateTime<Utc>,
    },

    /// A risk-relevant balance move, relayed to the risk service.
    #[serde(rename = "RISK_ALERT", rename_all = "camelCase")]
    RiskAlert {
        /// Monitored client identifier.
        client_id: String,
        /// Balance before the move.
        previous_balance: Decimal,
        /// Balance after the move.
        current_balance: Decimal,
        /// Signed delta.
        change: Decimal,
        /// When the move was observed.
        timestamp: DateTime<Utc>,
    },

    /// Monitoring failed in a way the client must see.
    #[serde(rename = "ERROR", rename_all = "camelCase")]
    Error {
        /// What went wrong.
        message: String,
        /// When the failure occurred.
        timestamp: DateTime<Utc>,
    },
}

impl RelayMessage {
    /// Build the session-start `CONNECTION` message.
    #[must_use]
    pub fn connection(account_id: impl Into<String>) -> Self {
        Self::Connection {
            account_id: account_id.into(),
            message: "Real-time monitoring established".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Build a `BALANCE_UPDATE` from a snapshot and the prior total.
    #[must_use]
    pub fn balance_update(snapshot: &BalanceSnapshot, previous_balance: Option<Decimal>) -> Self {
        Self::BalanceUpdate {
            account_id: snapshot.account_id.clone(),
            total_balance: snapshot.total_balance,
            available_balance: snapshot.available_balance,
            unrealized_pnl: snapshot.unrealized_pnl,
            realized_pnl: snapshot.realized_pnl,
            position_margin: snapshot.position_margin,
            total_margin: snapshot.total_margin,
            source: snapshot.source,
            previous_balance,
            timestamp: snapshot.timestamp,
        }
    }

    /// Build a `PNL_UPDATE` from a position book and the current equity.
    #[must_use]
    pub fn pnl_update(
        account_id: impl Into<String>,
        positions: &PositionPnl,
        total_balance: Decimal,
    ) -> Self {
        let mut entries: Vec<PositionEntry> = positions
            .iter()
            .map(|(symbol, pnl)| PositionEntry {
                symbol: symbol.clone(),
                unrealized_pnl: *pnl,
            })
            .collect();
        // Stable output order for consumers and tests.
        entries.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        Self::PnlUpdate {
            account_id: account_id.into(),
            total_unrealized_pnl: total_unrealized_pnl(positions),
            total_balance,
            positions: entries,
            timestamp: Utc::now(),
        }
    }

    /// Build a `RISK_ALERT` for a large balance move.
    #[must_use]
    pub fn risk_alert(
        client_id: impl Into<String>,
        previous_balance: Decimal,
        current_balance: Decimal,
    ) -> Self {
        Self::RiskAlert {
            client_id: client_id.into(),
            previous_balance,
            current_balance,
            change: current_balance - previous_balance,
            timestamp: Utc::now(),
        }
    }

    /// Build an `ERROR` message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Wire name of this message's variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION",
            Self::BalanceUpdate { .. } => "BALANCE_UPDATE",
            Self::PnlUpdate { .. } => "PNL_UPDATE",
            Self::RiskAlert { .. } => "RISK_ALERT",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Serialize to the wire JSON.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot() -> BalanceSnapshot {
        BalanceSnapshot {
            account_id: "ACC-1".to_string(),
            total_balance: Decimal::new(100_000, 0),
            available_balance: Decimal::new(95_000, 0),
            unrealized_pnl: Decimal::new(250, 2),
            realized_pnl: Decimal::ZERO,
            position_margin: None,
            total_margin: None,
            timestamp: Utc::now(),
            source: SnapshotSource::Fallback,
        }
    }

    #[test]
    fn connection_wire_format() {
        let msg = RelayMessage::connection("ACC-1");
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"CONNECTION""#));
        assert!(json.contains(r#""accountId":"ACC-1""#));
    }

    #[test]
    fn balance_update_wire_format() {
        let msg = RelayMessage::balance_update(&make_snapshot(), Some(Decimal::new(99_000, 0)));
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"BALANCE_UPDATE""#));
        assert!(json.contains(r#""totalBalance":"100000""#));
        assert!(json.contains(r#""source":"fallback""#));
        assert!(json.contains(r#""previousBalance":"99000""#));
        // Absent margin fields stay off the wire entirely.
        assert!(!json.contains("positionMargin"));
        assert!(!json.contains("totalMargin"));
    }

    #[test]
    fn balance_update_without_previous_omits_field() {
        let msg = RelayMessage::balance_update(&make_snapshot(), None);
        let json = msg.to_json().unwrap();
        assert!(!json.contains("previousBalance"));
    }

    #[test]
    fn pnl_update_sorts_positions_and_totals() {
        let mut positions = PositionPnl::new();
        positions.insert("NQ".to_string(), Decimal::new(150, 2));
        positions.insert("ES".to_string(), Decimal::new(-50, 2));

        let msg = RelayMessage::pnl_update("ACC-1", &positions, Decimal::new(100_000, 0));
        let RelayMessage::PnlUpdate {
            total_unrealized_pnl,
            positions: entries,
            ..
        } = &msg
        else {
            panic!("expected PnlUpdate");
        };

        assert_eq!(*total_unrealized_pnl, Decimal::new(100, 2));
        assert_eq!(entries[0].symbol, "ES");
        assert_eq!(entries[1].symbol, "NQ");

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"PNL_UPDATE""#));
        assert!(json.contains(r#""totalUnrealizedPnl":"1.00""#));
    }

    #[test]
    fn risk_alert_computes_signed_change() {
        let msg = RelayMessage::risk_alert(
            "client-1",
            Decimal::new(100_000, 0),
            Decimal::new(98_500, 0),
        );
        let RelayMessage::RiskAlert { change, .. } = &msg else {
            panic!("expected RiskAlert");
        };
        assert_eq!(*change, Decimal::new(-1_500, 0));

        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"RISK_ALERT""#));
        assert!(json.contains(r#""clientId":"client-1""#));
    }

    #[test]
    fn round_trips_through_serde() {
        let msg = RelayMessage::balance_update(&make_snapshot(), None);
        let json = msg.to_json().unwrap();
        let back: RelayMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn kind_names_match_wire_tags() {
        assert_eq!(RelayMessage::connection("a").kind(), "CONNECTION");
        assert_eq!(RelayMessage::error("boom").kind(), "ERROR");
    }
}
