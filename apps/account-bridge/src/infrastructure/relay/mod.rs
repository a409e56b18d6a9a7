//! Outbound Relay Connector
//!
//! One persistent WebSocket connection to the downstream risk service,
//! shared by all sessions and decoupled from any one client's lifetime.
//!
//! The connector owns a `Disconnected -> Connecting -> Connected` state
//! machine with exponential-backoff reconnection. `ensure_connected` is
//! single-flight: concurrent callers share one in-flight cycle. Delivery
//! is best-effort — a send while not connected drops the message with a
//! warning and kicks a fresh reconnect cycle in the background.
//!
//! While connected the connector answers server pings and sends periodic
//! `HEARTBEAT` frames so the risk service can tell the bridge is alive.

/// Exponential backoff policy for reconnection.
pub mod reconnect;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use self::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{ConnectionState, RiskRelayPort};
use crate::domain::message::RelayMessage;
use crate::infrastructure::config::RelaySettings;
use crate::infrastructure::metrics;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// =============================================================================
// Relay Connector
// =============================================================================

/// Shared handle to the process-wide relay connection.
#[derive(Clone)]
pub struct RelayConnector {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    settings: RelaySettings,
    state: RwLock<ConnectionState>,
    retry_count: AtomicU32,
    /// Bumped once per finished connect cycle; lets queued `ensure_connected`
    /// callers detect that the cycle they were waiting on already ran.
    cycle_epoch: AtomicU64,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    connect_gate: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl RelayConnector {
    /// Create a connector; no connection is attempted until first needed.
    #[must_use]
    pub fn new(settings: RelaySettings, cancel: CancellationToken) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                settings,
                state: RwLock::new(ConnectionState::Disconnected),
                retry_count: AtomicU32::new(0),
                cycle_epoch: AtomicU64::new(0),
                sink: tokio::sync::Mutex::new(None),
                connect_gate: tokio::sync::Mutex::new(()),
                cancel,
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Failed attempts in the current or last reconnect cycle.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.inner.state.write() = state;
    }

    async fn ensure_connected_impl(&self) {
        if self.connection_state() == ConnectionState::Connected {
            return;
        }

        let epoch_before = self.inner.cycle_epoch.load(Ordering::SeqCst);
        let _gate = self.inner.connect_gate.lock().await;

        // A cycle finished while we waited for the gate; its outcome is ours.
        if self.connection_state() == ConnectionState::Connected
            || self.inner.cycle_epoch.load(Ordering::SeqCst) != epoch_before
        {
            return;
        }

        self.connect_cycle().await;
        self.inner.cycle_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// One bounded connect-with-backoff cycle. Runs with the gate held.
    async fn connect_cycle(&self) {
        self.set_state(ConnectionState::Connecting);
        self.inner.retry_count.store(0, Ordering::SeqCst);

        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_relay_settings(&self.inner.settings));

        loop {
            if self.inner.cancel.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            match connect_async(&self.inner.settings.url).await {
                Ok((ws, _response)) => {
                    let (sink, source) = ws.split();
                    *self.inner.sink.lock().await = Some(sink);
                    self.set_state(ConnectionState::Connected);
                    self.inner.retry_count.store(0, Ordering::SeqCst);
                    tracing::info!(url = %self.inner.settings.url, "Relay connected");
                    self.spawn_connection_task(source);
                    return;
                }
                Err(e) => {
                    self.inner.retry_count.fetch_add(1, Ordering::SeqCst);
                    metrics::record_relay_reconnect();

                    if let Some(delay) = policy.next_delay() {
                        tracing::warn!(
                            error = %e,
                            attempt = policy.attempt_count(),
                            delay_ms = delay.as_millis(),
                            "Relay connection failed, retrying"
                        );
                        tokio::select! {
                            () = self.inner.cancel.cancelled() => {
                                self.set_state(ConnectionState::Disconnected);
                                return;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    } else {
                        tracing::warn!(
                            error = %e,
                            attempts = policy.attempt_count(),
                            "Relay reconnect attempts exhausted, giving up until next send"
                        );
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                }
            }
        }
    }

    /// Drive one live connection: answer pings, send heartbeats, notice
    /// closure.
    fn spawn_connection_task(&self, mut source: WsSource) {
        let connector = self.clone();
        tokio::spawn(async move {
            let mut heartbeat =
                tokio::time::interval(connector.inner.settings.heartbeat_interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; the connection is fresh.
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    () = connector.inner.cancel.cancelled() => {
                        connector.teardown("process shutdown").await;
                        return;
                    }
                    _ = heartbeat.tick() => {
                        if !connector.send_heartbeat().await {
                            return;
                        }
                    }
                    frame = source.next() => match frame {
                        Some(Ok(Message::Ping(payload))) => {
                            connector.send_raw(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            connector.teardown("closed by peer").await;
                            return;
                        }
                        Some(Ok(_)) => {
                            // Risk-service acks need no handling.
                        }
                        Some(Err(e)) => {
                            connector.teardown(&e.to_string()).await;
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn teardown(&self, reason: &str) {
        *self.inner.sink.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(reason, "Relay disconnected");
    }

    /// Send a heartbeat frame. Returns `false` when the connection died.
    async fn send_heartbeat(&self) -> bool {
        let frame = serde_json::json!({
            "type": "HEARTBEAT",
            "timestamp": Utc::now(),
        });
        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return false;
        };
        if let Err(e) = sink.send(Message::Text(frame.to_string().into())).await {
            drop(guard);
            self.teardown(&format!("heartbeat failed: {e}")).await;
            return false;
        }
        tracing::trace!("Relay heartbeat sent");
        true
    }

    async fn send_raw(&self, message: Message) {
        let mut guard = self.inner.sink.lock().await;
        if let Some(sink) = guard.as_mut() {
            if let Err(e) = sink.send(message).await {
                drop(guard);
                self.teardown(&e.to_string()).await;
            }
        }
    }
}

#[async_trait]
impl RiskRelayPort for RelayConnector {
    async fn ensure_connected(&self) {
        self.ensure_connected_impl().await;
    }

    async fn send(&self, message: &RelayMessage) {
        if self.connection_state() != ConnectionState::Connected {
            tracing::warn!(kind = message.kind(), "Relay not connected, dropping message");
            metrics::record_relay_drop(message.kind());
            // A dropped send restarts the reconnect cycle in the background.
            if self.connection_state() == ConnectionState::Disconnected {
                let connector = self.clone();
                tokio::spawn(async move {
                    connector.ensure_connected_impl().await;
                });
            }
            return;
        }

        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "Relay message serialization failed");
                return;
            }
        };

        let mut guard = self.inner.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => {
                if let Err(e) = sink.send(Message::Text(json.into())).await {
                    drop(guard);
                    self.teardown(&e.to_string()).await;
                    metrics::record_relay_drop(message.kind());
                } else {
                    metrics::record_relay_sent(message.kind());
                }
            }
            None => {
                tracing::warn!(kind = message.kind(), "Relay sink gone, dropping message");
                metrics::record_relay_drop(message.kind());
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.connection_state()
    }
}

// =============================================================================
// Tests
// =============================================================================
