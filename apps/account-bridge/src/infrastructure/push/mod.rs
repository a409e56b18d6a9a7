//! Client Push Server
//!
//! The inbound WebSocket surface. Each client connects to `/ws/realtime`
//! with its id and credentials in the query string; the server starts
//! monitoring, then forwards the session's push channel to the socket in
//! arrival order, one JSON text frame per message, no batching.
//!
//! The session ends — and its monitor tasks are cancelled — when the
//! client disconnects, the socket write fails, or monitoring is stopped.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SessionSupervisor;
use crate::application::services::supervisor::StartMonitoringError;
use crate::domain::message::RelayMessage;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Push server failure.
#[derive(Debug, thiserror::Error)]
pub enum PushServerError {
    /// Could not bind the listen port.
    #[error("failed to bind push server port {0}: {1}")]
    BindFailed(u16, String),
    /// The HTTP server failed while running.
    #[error("push server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Push Server
// =============================================================================

/// Query parameters of a push session request.
#[derive(Debug, Deserialize)]
struct RealtimeQuery {
    /// Client id; defaults to a prefix of the API key when absent.
    client_id: Option<String>,
    api_key: String,
    api_secret: String,
}

/// Shared state for the push server routes.
struct PushServerState {
    supervisor: Arc<SessionSupervisor>,
}

/// Client-facing WebSocket push server.
pub struct PushServer {
    port: u16,
    supervisor: Arc<SessionSupervisor>,
    cancel: CancellationToken,
}

impl PushServer {
    /// Create a push server.
    #[must_use]
    pub const fn new(
        port: u16,
        supervisor: Arc<SessionSupervisor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            supervisor,
            cancel,
        }
    }

    /// Run the push server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `PushServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), PushServerError> {
        let state = Arc::new(PushServerState {
            supervisor: self.supervisor,
        });
        let app = Router::new()
            .route("/ws/realtime", get(realtime_handler))
            .with_state(state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PushServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Push server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| PushServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Push server stopped");
        Ok(())
    }
}

// =============================================================================
// Session Handling
// =============================================================================

async fn realtime_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<RealtimeQuery>,
    State(state): State<Arc<PushServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state, query))
}

async fn handle_session(mut socket: WebSocket, state: Arc<PushServerState>, query: RealtimeQuery) {
    let client_id = query
        .client_id
        .unwrap_or_else(|| format!("client-{}", query.api_key.chars().take(8).collect::<String>()));
    let request_id = uuid::Uuid::new_v4();

    tracing::info!(client_id = %client_id, %request_id, "Push session requested");

    let mut handle = match state
        .supervisor
        .start_monitoring(&client_id, &query.api_key, &query.api_secret)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            // The only failure the client sees: one ERROR frame, then close.
            let reason = match &e {
                StartMonitoringError::CredentialFormat(err) => err.to_string(),
                StartMonitoringError::AccountResolution(err) => {
                    format!("failed to resolve account: {err}")
                }
            };
            tracing::warn!(client_id = %client_id, error = %e, "Push session rejected");
            send_message(&mut socket, &RelayMessage::error(reason)).await;
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };

    metrics::set_active_sessions(state.supervisor.active_clients());

    loop {
        tokio::select! {
            message = handle.messages.recv() => match message {
                Some(message) => {
                    metrics::record_push_message(message.kind());
                    if !send_message(&mut socket, &message).await {
                        tracing::info!(client_id = %client_id, "Push socket write failed, ending session");
                        break;
                    }
                }
                None => {
                    // Monitors gone; nothing more will ever arrive.
                    tracing::info!(client_id = %client_id, "Push channel drained, ending session");
                    break;
                }
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!(client_id = %client_id, "Client disconnected");
                    break;
                }
                Some(Ok(_)) => {
                    // Clients only listen on this surface.
                }
                Some(Err(e)) => {
                    tracing::info!(client_id = %client_id, error = %e, "Push socket error");
                    break;
                }
            }
        }
    }

    // Client disconnect and stop-monitoring share one teardown path.
    state.supervisor.stop_monitoring(&client_id);
    metrics::set_active_sessions(state.supervisor.active_clients());
    let _ = socket.send(WsMessage::Close(None)).await;
}

/// Write one message as a JSON text frame. Returns `false` on failure.
async fn send_message(socket: &mut WebSocket, message: &RelayMessage) -> bool {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, kind = message.kind(), "Push message serialization failed");
            return true;
        }
    };
    socket.send(WsMessage::Text(json.into())).await.is_ok()
}
