//! Client Session State
//!
//! One `ClientSession` per monitored client: the stored credentials, the
//! cancellation token governing its three monitor tasks, and the last
//! emitted snapshots the monitors compare against.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::account::{BalanceSnapshot, PositionPnl};
use crate::domain::credentials::Credentials;
use crate::domain::message::RelayMessage;

// =============================================================================
// Session State
// =============================================================================

/// Last-emitted snapshots for one session.
///
/// All three monitors of a session read and conditionally overwrite these
/// fields; access goes through one lock so reads and writes stay serialized
/// (single-writer-at-a-time).
#[derive(Debug, Default)]
pub struct SessionState {
    /// The most recently emitted balance snapshot, if any.
    pub last_balance: Option<BalanceSnapshot>,
    /// The most recently emitted per-symbol P&L reading.
    pub last_pnl: PositionPnl,
}

/// Shared handle to a session's state.
pub type SharedSessionState = Arc<Mutex<SessionState>>;

// =============================================================================
// Push Channel
// =============================================================================

/// The push channel was closed by its receiver (client gone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("push channel closed")]
pub struct ChannelClosed;

/// Sender half of one client's push channel.
///
/// Fans in the output of the client's three monitor tasks; the receiver
/// side forwards messages to the client connection in arrival order.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    tx: mpsc::Sender<RelayMessage>,
}

impl SessionChannel {
    /// Create a push channel with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RelayMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a message for the client.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] when the receiver is gone; the caller
    /// should stop producing for this session.
    pub async fn send(&self, message: RelayMessage) -> Result<(), ChannelClosed> {
        self.tx.send(message).await.map_err(|_| ChannelClosed)
    }
}

// =============================================================================
// Client Session
// =============================================================================

/// Registry entry for one monitored client.
///
/// Holds exactly one active monitor task set; replacing the session cancels
/// the old set through its token. Credentials are erased when the entry is
/// dropped.
#[derive(Debug)]
pub struct ClientSession {
    /// The client's validated credentials.
    pub credentials: Credentials,
    /// Resolved upstream account id.
    pub account_id: String,
    /// Monotonic session generation, unique per start.
    pub generation: u64,
    /// Cancels the session's three monitor tasks.
    pub cancel: CancellationToken,
    /// The session's last-emitted snapshots.
    pub state: SharedSessionState,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (channel, mut rx) = SessionChannel::new(8);
        channel
            .send(RelayMessage::connection("ACC-1"))
            .await
            .unwrap();
        channel.send(RelayMessage::error("late")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().kind(), "CONNECTION");
        assert_eq!(rx.recv().await.unwrap().kind(), "ERROR");
    }

    #[tokio::test]
    async fn send_after_receiver_drop_reports_closed() {
        let (channel, rx) = SessionChannel::new(8);
        drop(rx);
        let result = channel.send(RelayMessage::connection("ACC-1")).await;
        assert_eq!(result, Err(ChannelClosed));
    }

    #[test]
    fn session_state_starts_empty() {
        let state = SessionState::default();
        assert!(state.last_balance.is_none());
        assert!(state.last_pnl.is_empty());
    }
}
