//! Push Session Integration Tests
//!
//! Connects a real WebSocket client to the push server and verifies the
//! session protocol: `CONNECTION` first, balance updates after, an
//! `ERROR` frame then close on rejected credentials, and monitor
//! teardown on client disconnect.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use account_bridge::{
    AccountDataPort, BalanceSnapshot, ChangeDetector, ConnectionState, Credentials, FillEvent,
    MonitorSettings, PositionPnl, PushServer, RelayMessage, RiskRelayPort, SessionSupervisor,
    SnapshotSource, UpstreamError,
};

const KEY: &str = "ABCDEFGHIJKLMNOPQRSTUVWX";
const SECRET: &str = "abcdefghijklmnopqrstuvwxyz";

// =============================================================================
// Test Doubles
// =============================================================================

/// Minimal healthy upstream: one account, constant balance, no activity.
struct QuietUpstream;

#[async_trait]
impl AccountDataPort for QuietUpstream {
    async fn list_accounts(&self, _credentials: &Credentials) -> Result<Vec<String>, UpstreamError> {
        Ok(vec!["ACC-1".to_string()])
    }

    async fn account_summary(
        &self,
        _credentials: &Credentials,
        account_id: &str,
    ) -> Result<BalanceSnapshot, UpstreamError> {
        Ok(BalanceSnapshot {
            account_id: account_id.to_string(),
            total_balance: Decimal::new(100_000, 0),
            available_balance: Decimal::new(100_000, 0),
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            position_margin: None,
            total_margin: None,
            timestamp: Utc::now(),
            source: SnapshotSource::Poll,
        })
    }

    async fn positions(&self, _credentials: &Credentials) -> Result<PositionPnl, UpstreamError> {
        Ok(PositionPnl::new())
    }

    async fn fill_stream(
        &self,
        _credentials: &Credentials,
        _account_id: &str,
    ) -> Result<mpsc::Receiver<FillEvent>, UpstreamError> {
        let (tx, rx) = mpsc::channel(1);
        // Keep the stream open but silent.
        tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
        Ok(rx)
    }
}

struct NullRelay;

#[async_trait]
impl RiskRelayPort for NullRelay {
    async fn ensure_connected(&self) {}
    async fn send(&self, _message: &RelayMessage) {}
    fn state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn pick_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn spawn_push_server() -> (u16, Arc<SessionSupervisor>, CancellationToken) {
    let supervisor = Arc::new(SessionSupervisor::new(
        Arc::new(QuietUpstream),
        Arc::new(NullRelay),
        ChangeDetector::default(),
        MonitorSettings {
            position_poll_interval: Duration::from_millis(25),
            balance_poll_interval: Duration::from_millis(50),
            upstream_timeout: Duration::from_millis(200),
            retry_delay: Duration::from_millis(25),
            channel_capacity: 64,
            risk_alert_delta: Decimal::new(1_000, 0),
        },
    ));

    let port = pick_port().await;
    let cancel = CancellationToken::new();
    let server = PushServer::new(port, Arc::clone(&supervisor), cancel.clone());
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Let the listener come up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, supervisor, cancel)
}

async fn next_json(
    ws: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
) -> serde_json::Value {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn session_streams_connection_then_balance_update() {
    let (port, supervisor, cancel) = spawn_push_server().await;

    let url = format!(
        "ws://127.0.0.1:{port}/ws/realtime?client_id=c1&api_key={KEY}&api_secret={SECRET}"
    );
    let (mut ws, _response) = connect_async(&url).await.unwrap();

    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "CONNECTION");
    assert_eq!(first["accountId"], "ACC-1");

    let second = next_json(&mut ws).await;
    assert_eq!(second["type"], "BALANCE_UPDATE");
    assert_eq!(second["totalBalance"], "100000");
    assert_eq!(second["source"], "fallback");

    assert_eq!(supervisor.active_clients(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn malformed_credentials_get_error_frame_then_close() {
    let (port, supervisor, cancel) = spawn_push_server().await;

    let url =
        format!("ws://127.0.0.1:{port}/ws/realtime?client_id=c1&api_key=bad&api_secret={SECRET}");
    let (mut ws, _response) = connect_async(&url).await.unwrap();

    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "ERROR");
    assert!(
        first["message"].as_str().unwrap().contains("API key"),
        "unexpected error message: {first}"
    );

    // The server closes after the error frame; no session was created.
    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
    assert_eq!(supervisor.active_clients(), 0);

    cancel.cancel();
}

#[tokio::test]
async fn client_disconnect_tears_the_session_down() {
    let (port, supervisor, cancel) = spawn_push_server().await;

    let url = format!(
        "ws://127.0.0.1:{port}/ws/realtime?client_id=c1&api_key={KEY}&api_secret={SECRET}"
    );
    let (mut ws, _response) = connect_async(&url).await.unwrap();

    let first = next_json(&mut ws).await;
    assert_eq!(first["type"], "CONNECTION");
    assert_eq!(supervisor.active_clients(), 1);

    drop(ws);

    timeout(Duration::from_secs(2), async {
        while supervisor.active_clients() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("disconnect must cancel the session");

    cancel.cancel();
}
