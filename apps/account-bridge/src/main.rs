//! Account Bridge Binary
//!
//! Starts the account monitor and relay bridge.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin account-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `ACCOUNT_BRIDGE_WS_PORT`: WebSocket push port (default: 8090)
//! - `ACCOUNT_BRIDGE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `UPSTREAM_ENDPOINT`: Upstream account service base URL (default: <http://localhost:9000>)
//! - `RELAY_URL`: Risk service WebSocket URL (default: ws://localhost:8091/ws/python-bridge)
//! - `RELAY_RECONNECT_BASE_MS` / `RELAY_RECONNECT_MAX_SECS` / `RELAY_MAX_RECONNECT_ATTEMPTS`
//! - `POSITION_POLL_INTERVAL_MS` / `BALANCE_POLL_INTERVAL_SECS` / `UPSTREAM_TIMEOUT_SECS`
//! - `RISK_ALERT_BALANCE_DELTA`: Balance move that triggers a risk alert (default: 1000.00)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use account_bridge::application::ports::RiskRelayPort;
use account_bridge::infrastructure::telemetry;
use account_bridge::{
    BridgeConfig, ChangeDetector, HealthServer, HealthServerState, HttpAccountClient, PushServer,
    RelayConnector, SessionSupervisor, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Account Bridge");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = BridgeConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream account service adapter
    let upstream = Arc::new(HttpAccountClient::new(
        config.upstream.clone(),
        config.monitor.upstream_timeout,
    )?);

    // Outbound relay; connects lazily on first need, lives until shutdown
    let relay = RelayConnector::new(config.relay.clone(), shutdown_token.clone());
    let relay: Arc<dyn RiskRelayPort> = Arc::new(relay);

    // Session supervisor over the ports
    let detector = ChangeDetector::default();
    let supervisor = Arc::new(SessionSupervisor::new(
        upstream,
        Arc::clone(&relay),
        detector,
        config.monitor.clone(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&supervisor),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Push server
    let push_server = PushServer::new(
        config.server.ws_port,
        Arc::clone(&supervisor),
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = push_server.run().await {
            tracing::error!(error = %e, "Push server error");
        }
    });

    tracing::info!("Account bridge ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Account bridge stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        upstream = %config.upstream.endpoint,
        relay = %config.relay.url,
        "Configuration loaded"
    );
    tracing::debug!(
        position_poll_ms = config.monitor.position_poll_interval.as_millis(),
        balance_poll_ms = config.monitor.balance_poll_interval.as_millis(),
        upstream_timeout_ms = config.monitor.upstream_timeout.as_millis(),
        "Monitor cadence"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
