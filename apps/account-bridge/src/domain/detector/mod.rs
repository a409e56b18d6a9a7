//! Change Detection
//!
//! Decides whether a freshly polled snapshot differs enough from the last
//! emitted one to be worth pushing. Upstream polling produces streams of
//! near-duplicate readings; only material deltas go out, which keeps the
//! push channel quiet without losing responsiveness to real changes.
//!
//! The very first snapshot of a session always passes (no prior baseline).

use rust_decimal::Decimal;

use super::account::{BalanceSnapshot, PositionPnl};

// =============================================================================
// Change Detector
// =============================================================================

/// Threshold-based change detector for balance and position snapshots.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    /// Minimum absolute total-balance delta worth emitting.
    pub balance_threshold: Decimal,
    /// Minimum absolute per-symbol P&L delta worth emitting.
    pub pnl_threshold: Decimal,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            // One cent.
            balance_threshold: Decimal::new(1, 2),
            // One dollar.
            pnl_threshold: Decimal::new(100, 2),
        }
    }
}

impl ChangeDetector {
    /// Create a detector with custom thresholds.
    #[must_use]
    pub const fn new(balance_threshold: Decimal, pnl_threshold: Decimal) -> Self {
        Self {
            balance_threshold,
            pnl_threshold,
        }
    }

    /// Whether a balance snapshot should be emitted.
    ///
    /// True when there is no previous snapshot, or when the total balance
    /// moved by more than the balance threshold.
    #[must_use]
    pub fn should_emit_balance(
        &self,
        previous: Option<&BalanceSnapshot>,
        current: &BalanceSnapshot,
    ) -> bool {
        previous.is_none_or(|prev| {
            (current.total_balance - prev.total_balance).abs() > self.balance_threshold
        })
    }

    /// Whether a position P&L reading should be emitted.
    ///
    /// True when any symbol moved by more than the P&L threshold, or when
    /// the symbol set itself changed (a position opened or closed).
    #[must_use]
    pub fn should_emit_pnl(&self, previous: &PositionPnl, current: &PositionPnl) -> bool {
        if previous.len() != current.len() {
            return true;
        }

        for (symbol, pnl) in current {
            match previous.get(symbol) {
                None => return true,
                Some(prev_pnl) => {
                    if (pnl - prev_pnl).abs() > self.pnl_threshold {
                        return true;
                    }
                }
            }
        }

        false
    }
}

// =============================================================================
// Tests
// =============================================================================
