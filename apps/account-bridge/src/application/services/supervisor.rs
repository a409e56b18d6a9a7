//! Session Supervisor
//!
//! Owns the registry of monitored clients and the lifecycle of their
//! monitor tasks. This is the only component with global mutable state;
//! everything else reaches shared data through it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::monitor::{
    MonitorContext, MonitorSettings, run_balance_monitor, run_execution_monitor,
    run_position_monitor,
};
use super::session::{ClientSession, SessionChannel, SessionState, SharedSessionState};
use crate::application::ports::{
    AccountDataPort, ConnectionState, RiskRelayPort, UpstreamError,
};
use crate::domain::credentials::{CredentialFormatError, Credentials};
use crate::domain::detector::ChangeDetector;
use crate::domain::message::RelayMessage;

// =============================================================================
// Errors
// =============================================================================

/// Why `start_monitoring` refused a session.
#[derive(Debug, thiserror::Error)]
pub enum StartMonitoringError {
    /// Malformed credential input; surfaced synchronously, never retried.
    #[error(transparent)]
    CredentialFormat(#[from] CredentialFormatError),

    /// The initial accounts lookup failed; the push session must emit an
    /// `ERROR` message and close.
    #[error("failed to resolve account: {0}")]
    AccountResolution(#[from] UpstreamError),
}

// =============================================================================
// Handles & Status
// =============================================================================

/// What a caller gets back from `start_monitoring`.
#[derive(Debug)]
pub struct SessionHandle {
    /// Monitored client id.
    pub client_id: String,
    /// Resolved upstream account id.
    pub account_id: String,
    /// Generation of this session, unique per start.
    pub generation: u64,
    /// Receiver side of the session's push channel. The `CONNECTION`
    /// message is already queued.
    pub messages: mpsc::Receiver<RelayMessage>,
}

/// Read-only supervisor snapshot for observability.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorStatus {
    /// Number of clients with a live monitor task set.
    pub active_clients: usize,
    /// Current outbound relay connection state.
    pub relay_state: ConnectionState,
}

// =============================================================================
// Session Supervisor
// =============================================================================

/// Registry of monitored clients plus monitor task spawn/cancel lifecycle.
pub struct SessionSupervisor {
    upstream: Arc<dyn AccountDataPort>,
    relay: Arc<dyn RiskRelayPort>,
    detector: ChangeDetector,
    settings: MonitorSettings,
    sessions: Mutex<HashMap<String, ClientSession>>,
    next_generation: AtomicU64,
}

impl SessionSupervisor {
    /// Create a supervisor over the given ports.
    #[must_use]
    pub fn new(
        upstream: Arc<dyn AccountDataPort>,
        relay: Arc<dyn RiskRelayPort>,
        detector: ChangeDetector,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            upstream,
            relay,
            detector,
            settings,
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start (or restart) monitoring for a client.
    ///
    /// Validates the credential shape, resolves the account id with one
    /// bounded upstream lookup, cancels any pre-existing task set for the
    /// client, then spawns the three monitor tasks on a fresh push channel
    /// and wakes the relay in the background. Monitor startup itself is
    /// asynchronous; the returned receiver already holds the `CONNECTION`
    /// message.
    ///
    /// # Errors
    ///
    /// Returns [`StartMonitoringError::CredentialFormat`] on malformed
    /// input and [`StartMonitoringError::AccountResolution`] when the
    /// initial accounts lookup fails or times out.
    pub async fn start_monitoring(
        &self,
        client_id: &str,
        api_key: &str,
        api_secret: &str,
    ) -> Result<SessionHandle, StartMonitoringError> {
        let credentials = Credentials::new(api_key, api_secret)?;

        let accounts = tokio::time::timeout(
            self.settings.upstream_timeout,
            self.upstream.list_accounts(&credentials),
        )
        .await
        .map_err(|_| UpstreamError::Timeout(self.settings.upstream_timeout))??;

        let account_id = accounts
            .into_iter()
            .next()
            .ok_or(UpstreamError::NoAccounts)?;

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let state: SharedSessionState = Arc::new(Mutex::new(SessionState::default()));
        let (channel, messages) = SessionChannel::new(self.settings.channel_capacity);

        // Queue the session-start frame before any monitor can produce.
        let _ = channel.send(RelayMessage::connection(&account_id)).await;

        {
            let mut sessions = self.sessions.lock();
            if let Some(old) = sessions.remove(client_id) {
                tracing::info!(
                    client_id,
                    old_generation = old.generation,
                    "Replacing active session"
                );
                old.cancel.cancel();
            }
            sessions.insert(
                client_id.to_string(),
                ClientSession {
                    credentials: credentials.clone(),
                    account_id: account_id.clone(),
                    generation,
                    cancel: cancel.clone(),
                    state: Arc::clone(&state),
                },
            );
        }

        let ctx = Arc::new(MonitorContext {
            client_id: client_id.to_string(),
            account_id: account_id.clone(),
            credentials,
            upstream: Arc::clone(&self.upstream),
            relay: Arc::clone(&self.relay),
            detector: self.detector.clone(),
            settings: self.settings.clone(),
            state,
            channel,
            cancel,
        });

        tokio::spawn(run_execution_monitor(Arc::clone(&ctx)));
        tokio::spawn(run_position_monitor(Arc::clone(&ctx)));
        tokio::spawn(run_balance_monitor(ctx));

        // Relay startup never blocks or fails client-facing operations.
        let relay = Arc::clone(&self.relay);
        tokio::spawn(async move {
            relay.ensure_connected().await;
        });

        tracing::info!(client_id, %account_id, generation, "Monitoring started");

        Ok(SessionHandle {
            client_id: client_id.to_string(),
            account_id,
            generation,
            messages,
        })
    }

    /// Stop monitoring for a client.
    ///
    /// Cancels the client's monitor tasks and erases its credentials.
    /// Idempotent: an unknown client id is a no-op.
    pub fn stop_monitoring(&self, client_id: &str) {
        let removed = self.sessions.lock().remove(client_id);
        match removed {
            Some(session) => {
                session.cancel.cancel();
                tracing::info!(
                    client_id,
                    generation = session.generation,
                    "Monitoring stopped"
                );
            }
            None => {
                tracing::debug!(client_id, "Stop requested for unknown client");
            }
        }
    }

    /// Number of clients with a live session.
    #[must_use]
    pub fn active_clients(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Generation of a client's live session, if any.
    #[must_use]
    pub fn session_generation(&self, client_id: &str) -> Option<u64> {
        self.sessions.lock().get(client_id).map(|s| s.generation)
    }

    /// Read-only snapshot for the health endpoint.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            active_clients: self.active_clients(),
            relay_state: self.relay.state(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
