//! Monitor Tasks
//!
//! The three independently scheduled tasks spawned per monitored client:
//!
//! - **Execution monitor** — reacts to fills on the upstream execution
//!   stream; the primary low-latency path.
//! - **Position monitor** — polls position P&L on a fixed cadence.
//! - **Balance monitor** — polls the account summary on a slower cadence
//!   as a safety net against missed execution events.
//!
//! Each task is isolated: upstream failures are logged, waited out, and
//! retried forever; a task only stops when its session token is cancelled
//! or the push channel closes. A failure in one task never terminates its
//! siblings.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::session::{ChannelClosed, SessionChannel, SharedSessionState};
use crate::application::ports::{AccountDataPort, RiskRelayPort, UpstreamError};
use crate::domain::account::{FillEvent, SnapshotSource};
use crate::domain::credentials::Credentials;
use crate::domain::detector::ChangeDetector;
use crate::domain::message::RelayMessage;

// =============================================================================
// Settings
// =============================================================================

/// Timing and threshold knobs for the monitor tasks.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Position P&L polling cadence.
    pub position_poll_interval: Duration,
    /// Balance safety-net polling cadence.
    pub balance_poll_interval: Duration,
    /// Deadline for any single upstream call.
    pub upstream_timeout: Duration,
    /// Pause after an upstream failure before retrying.
    pub retry_delay: Duration,
    /// Push channel capacity per session.
    pub channel_capacity: usize,
    /// Absolute balance move that triggers a relay risk alert.
    pub risk_alert_delta: Decimal,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            position_poll_interval: Duration::from_secs(1),
            balance_poll_interval: Duration::from_secs(5),
            upstream_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_secs(1),
            channel_capacity: 256,
            risk_alert_delta: Decimal::new(1_000, 0),
        }
    }
}

// =============================================================================
// Monitor Context
// =============================================================================

/// Everything one session's monitor tasks share.
pub struct MonitorContext {
    /// Monitored client id.
    pub client_id: String,
    /// Resolved upstream account id.
    pub account_id: String,
    /// The session's credentials, passed on every upstream call.
    pub credentials: Credentials,
    /// The upstream account service.
    pub upstream: Arc<dyn AccountDataPort>,
    /// The outbound risk relay.
    pub relay: Arc<dyn RiskRelayPort>,
    /// Snapshot change detection.
    pub detector: ChangeDetector,
    /// Timing and threshold knobs.
    pub settings: MonitorSettings,
    /// Last-emitted snapshots, shared with the sibling tasks.
    pub state: SharedSessionState,
    /// The session's push channel.
    pub channel: SessionChannel,
    /// Cancels all three tasks of this session.
    pub cancel: CancellationToken,
}

impl MonitorContext {
    /// Run an upstream call under the configured deadline.
    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, UpstreamError>>,
    ) -> Result<T, UpstreamError> {
        tokio::time::timeout(self.settings.upstream_timeout, call)
            .await
            .map_err(|_| UpstreamError::Timeout(self.settings.upstream_timeout))?
    }

    /// Sleep out the retry delay. Returns `false` when cancelled mid-wait.
    async fn pause_before_retry(&self) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(self.settings.retry_delay) => true,
        }
    }

    /// Relay a `RISK_ALERT` when the balance moved past the alert delta.
    async fn maybe_risk_alert(&self, previous: Option<Decimal>, current: Decimal) {
        let Some(previous) = previous else { return };
        if (current - previous).abs() > self.settings.risk_alert_delta {
            tracing::warn!(
                client_id = %self.client_id,
                previous = %previous,
                current = %current,
                "Large balance move, relaying risk alert"
            );
            self.relay
                .send(&RelayMessage::risk_alert(&self.client_id, previous, current))
                .await;
        }
    }
}

// =============================================================================
// Execution Monitor
// =============================================================================

/// React to fills: each one triggers a fresh summary fetch and an
/// immediate `BALANCE_UPDATE{source=orderflow}`, plus a `PNL_UPDATE`
/// when positions changed.
pub async fn run_execution_monitor(ctx: Arc<MonitorContext>) {
    tracing::debug!(client_id = %ctx.client_id, "Execution monitor started");

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let mut fills = match ctx
            .with_timeout(ctx.upstream.fill_stream(&ctx.credentials, &ctx.account_id))
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(client_id = %ctx.client_id, error = %e, "Fill stream subscription failed");
                if ctx.pause_before_retry().await {
                    continue;
                }
                break;
            }
        };

        loop {
            tokio::select! {
                () = ctx.cancel.cancelled() => {
                    tracing::debug!(client_id = %ctx.client_id, "Execution monitor cancelled");
                    return;
                }
                fill = fills.recv() => match fill {
                    Some(fill) => {
                        if handle_fill(&ctx, &fill).await.is_err() {
                            // Client gone; take the siblings down too.
                            ctx.cancel.cancel();
                            return;
                        }
                    }
                    None => {
                        tracing::info!(client_id = %ctx.client_id, "Fill stream ended, resubscribing");
                        break;
                    }
                }
            }
        }

        if !ctx.pause_before_retry().await {
            break;
        }
    }

    tracing::debug!(client_id = %ctx.client_id, "Execution monitor stopped");
}

/// Process one fill event.
async fn handle_fill(ctx: &MonitorContext, fill: &FillEvent) -> Result<(), ChannelClosed> {
    tracing::debug!(
        client_id = %ctx.client_id,
        order_id = %fill.order_id,
        symbol = %fill.symbol,
        "Fill received"
    );

    let summary = match ctx
        .with_timeout(ctx.upstream.account_summary(&ctx.credentials, &ctx.account_id))
        .await
    {
        Ok(summary) => summary.with_source(SnapshotSource::Orderflow),
        Err(e) => {
            // The fallback monitor will pick the change up on its cadence.
            tracing::warn!(client_id = %ctx.client_id, error = %e, "Summary fetch after fill failed");
            return Ok(());
        }
    };

    let positions = match ctx.with_timeout(ctx.upstream.positions(&ctx.credentials)).await {
        Ok(positions) => Some(positions),
        Err(e) => {
            tracing::warn!(client_id = %ctx.client_id, error = %e, "Position fetch after fill failed");
            None
        }
    };

    let (previous_balance, positions_changed) = {
        let mut state = ctx.state.lock();
        let previous_balance = state.last_balance.as_ref().map(|s| s.total_balance);
        let changed = positions
            .as_ref()
            .is_some_and(|p| ctx.detector.should_emit_pnl(&state.last_pnl, p));
        state.last_balance = Some(summary.clone());
        if changed && let Some(p) = &positions {
            state.last_pnl = p.clone();
        }
        (previous_balance, changed)
    };

    let update = RelayMessage::balance_update(&summary, previous_balance);
    ctx.channel.send(update.clone()).await?;
    // Fill notification for the risk service.
    ctx.relay.send(&update).await;
    ctx.maybe_risk_alert(previous_balance, summary.total_balance)
        .await;

    if positions_changed && let Some(positions) = positions {
        ctx.channel
            .send(RelayMessage::pnl_update(
                &ctx.account_id,
                &positions,
                summary.total_balance,
            ))
            .await?;
    }

    Ok(())
}

// =============================================================================
// Position Monitor
// =============================================================================

/// Poll position P&L on a fixed cadence and emit `PNL_UPDATE` on material
/// change.
pub async fn run_position_monitor(ctx: Arc<MonitorContext>) {
    tracing::debug!(client_id = %ctx.client_id, "Position monitor started");
    eprintln!("DBG position_monitor START");

    let mut ticker = tokio::time::interval(ctx.settings.position_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let current = match ctx.with_timeout(ctx.upstream.positions(&ctx.credentials)).await {
            Ok(positions) => positions,
            Err(e) => {
                // Transient; the next tick is the retry.
                tracing::warn!(client_id = %ctx.client_id, error = %e, "Position poll failed");
                continue;
            }
        };

        let worth_emitting = {
            let state = ctx.state.lock();
            ctx.detector.should_emit_pnl(&state.last_pnl, &current)
        };
        if !worth_emitting {
            continue;
        }

        let summary = match ctx
            .with_timeout(ctx.upstream.account_summary(&ctx.credentials, &ctx.account_id))
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(client_id = %ctx.client_id, error = %e, "Summary fetch for P&L update failed");
                continue;
            }
        };

        // Re-check under the write lock; a sibling may have emitted meanwhile.
        let accepted = {
            let mut state = ctx.state.lock();
            if ctx.detector.should_emit_pnl(&state.last_pnl, &current) {
                state.last_pnl = current.clone();
                true
            } else {
                false
            }
        };
        if !accepted {
            continue;
        }

        let message =
            RelayMessage::pnl_update(&ctx.account_id, &current, summary.total_balance);
        if ctx.channel.send(message).await.is_err() {
            ctx.cancel.cancel();
            break;
        }
    }

    tracing::debug!(client_id = %ctx.client_id, "Position monitor stopped");
}

// =============================================================================
// Balance Monitor
// =============================================================================

/// Poll the account summary on a slower cadence as a safety net and emit
/// `BALANCE_UPDATE{source=fallback}` on material change.
pub async fn run_balance_monitor(ctx: Arc<MonitorContext>) {
    tracing::debug!(client_id = %ctx.client_id, "Balance monitor started");
    eprintln!("DBG balance_monitor START");

    let mut ticker = tokio::time::interval(ctx.settings.balance_poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        eprintln!("DBG balance_monitor before tick");
        tokio::select! {
            () = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        eprintln!("DBG balance_monitor after tick");

        eprintln!("DBG balance_monitor before summary");
        let summary = match ctx
            .with_timeout(ctx.upstream.account_summary(&ctx.credentials, &ctx.account_id))
            .await
        {
            Ok(summary) => { eprintln!("DBG balance_monitor got summary"); summary.with_source(SnapshotSource::Fallback) },
            Err(e) => {
                tracing::warn!(client_id = %ctx.client_id, error = %e, "Balance poll failed");
                continue;
            }
        };

        let (accepted, previous_balance) = {
            let mut state = ctx.state.lock();
            let previous_balance = state.last_balance.as_ref().map(|s| s.total_balance);
            if ctx
                .detector
                .should_emit_balance(state.last_balance.as_ref(), &summary)
            {
                state.last_balance = Some(summary.clone());
                (true, previous_balance)
            } else {
                (false, previous_balance)
            }
        };
        if !accepted {
            continue;
        }

        eprintln!("DBG balance_monitor accepted={accepted}");
        let message = RelayMessage::balance_update(&summary, previous_balance);
        eprintln!("DBG balance_monitor before channel.send");
        if ctx.channel.send(message).await.is_err() {
            ctx.cancel.cancel();
            break;
        }
        eprintln!("DBG balance_monitor after channel.send");
        ctx.maybe_risk_alert(previous_balance, summary.total_balance)
            .await;
        eprintln!("DBG balance_monitor after risk_alert");
    }

    tracing::debug!(client_id = %ctx.client_id, "Balance monitor stopped");
}

// =============================================================================
// Tests
// =============================================================================
