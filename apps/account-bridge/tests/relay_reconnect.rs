//! Relay Connector Integration Tests
//!
//! Exercises the outbound relay against a real local WebSocket listener:
//! backoff exhaustion, best-effort sends, single-flight connection
//! attempts, recovery, and heartbeats.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use account_bridge::{
    ConnectionState, ReconnectConfig, ReconnectPolicy, RelayConnector, RelayMessage,
    RelaySettings, RiskRelayPort,
};

// =============================================================================
// Test Server
// =============================================================================

/// Accept WebSocket connections, forward every text frame, count accepts.
async fn spawn_ws_server() -> (String, mpsc::UnboundedReceiver<String>, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let accepts = Arc::new(AtomicUsize::new(0));

    let accept_counter = Arc::clone(&accepts);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            accept_counter.fetch_add(1, Ordering::SeqCst);
            let frame_tx = frame_tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(frame)) = ws.next().await {
                    if let Message::Text(text) = frame {
                        let _ = frame_tx.send(text.to_string());
                    }
                }
            });
        }
    });

    (format!("ws://{addr}"), frame_rx, accepts)
}

/// Bind then drop a listener so the port is known-refused.
async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

fn settings(url: String, max_attempts: u32) -> RelaySettings {
    RelaySettings {
        url,
        reconnect_delay_base: Duration::from_millis(10),
        reconnect_delay_max: Duration::from_millis(80),
        max_reconnect_attempts: max_attempts,
        heartbeat_interval: Duration::from_secs(30),
    }
}

// =============================================================================
// Backoff Formula
// =============================================================================

#[test]
fn backoff_delay_is_base_doubled_and_capped() {
    let mut policy = ReconnectPolicy::new(ReconnectConfig {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(600),
        jitter_factor: 0.0,
        max_attempts: 0,
    });

    // After N failures the next delay is min(base * 2^N, max).
    let expected = [100_u64, 200, 400, 600, 600];
    for expected_ms in expected {
        assert_eq!(
            policy.next_delay(),
            Some(Duration::from_millis(expected_ms))
        );
    }
}

// =============================================================================
// Scenario D: exhaustion, silent drops, recovery
// =============================================================================

#[tokio::test]
async fn exhausted_relay_drops_sends_until_reconnect_succeeds() {
    let url = refused_url().await;
    let connector = RelayConnector::new(settings(url.clone(), 3), CancellationToken::new());

    // Exhaust the retry budget against the dead endpoint.
    connector.ensure_connected().await;
    assert_eq!(connector.state(), ConnectionState::Disconnected);

    // Sends are silently dropped: no error, no state change to Connected.
    connector
        .send(&RelayMessage::risk_alert(
            "c1",
            Decimal::new(100_000, 0),
            Decimal::new(98_000, 0),
        ))
        .await;
    assert_ne!(connector.state(), ConnectionState::Connected);

    // Bring a real server up on a fresh port and reconnect explicitly.
    let (live_url, mut frames, _accepts) = spawn_ws_server().await;
    let connector = RelayConnector::new(settings(live_url, 3), CancellationToken::new());
    connector.ensure_connected().await;
    assert_eq!(connector.state(), ConnectionState::Connected);

    connector
        .send(&RelayMessage::risk_alert(
            "c1",
            Decimal::new(100_000, 0),
            Decimal::new(98_000, 0),
        ))
        .await;

    let frame = timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.contains(r#""type":"RISK_ALERT""#));
    assert!(frame.contains(r#""clientId":"c1""#));
}

#[tokio::test]
async fn ensure_connected_is_idempotent_when_connected() {
    let (url, _frames, accepts) = spawn_ws_server().await;
    let connector = RelayConnector::new(settings(url, 3), CancellationToken::new());

    connector.ensure_connected().await;
    connector.ensure_connected().await;
    connector.ensure_connected().await;

    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Single-Flight
// =============================================================================

#[tokio::test]
async fn concurrent_ensure_calls_share_one_attempt() {
    let (url, _frames, accepts) = spawn_ws_server().await;
    let connector = RelayConnector::new(settings(url, 3), CancellationToken::new());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let connector = connector.clone();
        tasks.push(tokio::spawn(async move {
            connector.ensure_connected().await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(
        accepts.load(Ordering::SeqCst),
        1,
        "concurrent callers must share one in-flight attempt"
    );
}

// =============================================================================
// Heartbeats
// =============================================================================

#[tokio::test]
async fn connected_relay_sends_heartbeats() {
    let (url, mut frames, _accepts) = spawn_ws_server().await;
    let mut relay_settings = settings(url, 3);
    relay_settings.heartbeat_interval = Duration::from_millis(50);
    let connector = RelayConnector::new(relay_settings, CancellationToken::new());

    connector.ensure_connected().await;

    let frame = timeout(Duration::from_secs(2), frames.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(frame.contains(r#""type":"HEARTBEAT""#));
}

// =============================================================================
// Peer Disconnect
// =============================================================================

#[tokio::test]
async fn peer_close_returns_connector_to_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept one connection, then drop it immediately.
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                drop(ws);
            }
        }
    });

    let connector = RelayConnector::new(
        settings(format!("ws://{addr}"), 1),
        CancellationToken::new(),
    );
    connector.ensure_connected().await;
    assert_eq!(connector.state(), ConnectionState::Connected);

    // The connection task notices the closed peer and resets state.
    timeout(Duration::from_secs(2), async {
        while connector.state() == ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connector must notice the dropped peer");

    assert_eq!(connector.state(), ConnectionState::Disconnected);
}
