//! Upstream Account Service Adapter
//!
//! Implements [`AccountDataPort`] against the upstream account service:
//! REST for account, balance, and position reads, a WebSocket for the
//! fill/execution stream.
//!
//! This is the collaborator boundary: raw payloads carry optional fields,
//! and snapshots are built here with every missing field defaulted so the
//! rest of the crate never probes for optionality.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{AccountDataPort, UpstreamError};
use crate::domain::account::{BalanceSnapshot, FillEvent, PositionPnl, SnapshotSource};
use crate::domain::credentials::Credentials;
use crate::infrastructure::config::UpstreamSettings;

/// Capacity of the per-subscription fill event channel.
const FILL_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// Raw Payloads
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPayload {
    account_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryPayload {
    account_id: Option<String>,
    total_balance: Option<Decimal>,
    available_balance: Option<Decimal>,
    unrealized_pnl: Option<Decimal>,
    realized_pnl: Option<Decimal>,
    position_margin: Option<Decimal>,
    total_margin: Option<Decimal>,
    timestamp: Option<DateTime<Utc>>,
}

impl SummaryPayload {
    /// Defaulted field extraction: absent numbers become zero, an absent
    /// timestamp becomes the receive time.
    fn into_snapshot(self, fallback_account_id: &str) -> BalanceSnapshot {
        BalanceSnapshot {
            account_id: self
                .account_id
                .unwrap_or_else(|| fallback_account_id.to_string()),
            total_balance: self.total_balance.unwrap_or_default(),
            available_balance: self.available_balance.unwrap_or_default(),
            unrealized_pnl: self.unrealized_pnl.unwrap_or_default(),
            realized_pnl: self.realized_pnl.unwrap_or_default(),
            position_margin: self.position_margin,
            total_margin: self.total_margin,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            source: SnapshotSource::Poll,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PositionsPayload {
    #[serde(default)]
    positions: Vec<PositionPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionPayload {
    symbol: Option<String>,
    unrealized_pnl: Option<Decimal>,
}

// =============================================================================
// HTTP Account Client
// =============================================================================

/// REST + WebSocket adapter for the upstream account service.
pub struct HttpAccountClient {
    http: reqwest::Client,
    settings: UpstreamSettings,
    timeout: Duration,
}

impl HttpAccountClient {
    /// Create a client with per-request timeouts.
    ///
    /// # Errors
    ///
    /// Returns `reqwest::Error` if the HTTP client cannot be built.
    pub fn new(settings: UpstreamSettings, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            settings,
            timeout,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        credentials: &Credentials,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{path}", self.settings.endpoint);
        let response = self
            .http
            .get(&url)
            .header("api-key", credentials.api_key())
            .header("api-secret", credentials.api_secret())
            .send()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Unavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Malformed(e.to_string()))
    }

    fn map_request_error(&self, error: &reqwest::Error) -> UpstreamError {
        if error.is_timeout() {
            UpstreamError::Timeout(self.timeout)
        } else {
            UpstreamError::Unavailable(error.to_string())
        }
    }

    fn fill_stream_url(&self, credentials: &Credentials, account_id: &str) -> String {
        format!(
            "{}/ws/fills?account_id={account_id}&api_key={}&api_secret={}",
            self.settings.ws_endpoint,
            credentials.api_key(),
            credentials.api_secret(),
        )
    }
}

#[async_trait]
impl AccountDataPort for HttpAccountClient {
    async fn list_accounts(&self, credentials: &Credentials) -> Result<Vec<String>, UpstreamError> {
        let accounts: Vec<AccountPayload> = self.get_json("/accounts", credentials).await?;
        Ok(accounts
            .into_iter()
            .filter_map(|account| account.account_id)
            .collect())
    }

    async fn account_summary(
        &self,
        credentials: &Credentials,
        account_id: &str,
    ) -> Result<BalanceSnapshot, UpstreamError> {
        let payload: SummaryPayload = self.get_json("/accounts/balance", credentials).await?;
        Ok(payload.into_snapshot(account_id))
    }

    async fn positions(&self, credentials: &Credentials) -> Result<PositionPnl, UpstreamError> {
        let payload: PositionsPayload = self.get_json("/positions", credentials).await?;
        Ok(payload
            .positions
            .into_iter()
            .filter_map(|position| {
                position
                    .symbol
                    .map(|symbol| (symbol, position.unrealized_pnl.unwrap_or_default()))
            })
            .collect())
    }

    async fn fill_stream(
        &self,
        credentials: &Credentials,
        account_id: &str,
    ) -> Result<mpsc::Receiver<FillEvent>, UpstreamError> {
        let url = self.fill_stream_url(credentials, account_id);
        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        tracing::info!(account_id, "Fill stream connected");

        let (tx, rx) = mpsc::channel(FILL_CHANNEL_CAPACITY);
        let account = account_id.to_string();

        tokio::spawn(async move {
            let (mut sink, mut source) = ws.split();

            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<FillEvent>(&text) {
                        Ok(fill) => {
                            if tx.send(fill).await.is_err() {
                                // Subscriber gone; tear the socket down.
                                break;
                            }
                        }
                        Err(e) => {
                            // Malformed events are skipped, the stream continues.
                            tracing::warn!(
                                account_id = %account,
                                error = %e,
                                "Malformed fill event, skipping"
                            );
                        }
                    },
                    Ok(Message::Ping(payload)) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!(account_id = %account, "Fill stream closed by upstream");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(account_id = %account, error = %e, "Fill stream error");
                        break;
                    }
                }
            }
            // Dropping `tx` closes the receiver; the execution monitor
            // resubscribes.
        });

        Ok(rx)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_defaults_every_absent_field() {
        let payload: SummaryPayload = serde_json::from_str("{}").unwrap();
        let snapshot = payload.into_snapshot("ACC-9");

        assert_eq!(snapshot.account_id, "ACC-9");
        assert_eq!(snapshot.total_balance, Decimal::ZERO);
        assert_eq!(snapshot.available_balance, Decimal::ZERO);
        assert_eq!(snapshot.unrealized_pnl, Decimal::ZERO);
        assert_eq!(snapshot.realized_pnl, Decimal::ZERO);
        assert_eq!(snapshot.position_margin, None);
        assert_eq!(snapshot.total_margin, None);
        assert_eq!(snapshot.source, SnapshotSource::Poll);
    }

    #[test]
    fn summary_prefers_reported_account_id() {
        let json = r#"{"accountId": "ACC-1", "totalBalance": "100000.50"}"#;
        let payload: SummaryPayload = serde_json::from_str(json).unwrap();
        let snapshot = payload.into_snapshot("fallback");

        assert_eq!(snapshot.account_id, "ACC-1");
        assert_eq!(snapshot.total_balance, Decimal::new(10_000_050, 2));
    }

    #[test]
    fn positions_skip_entries_without_symbol() {
        let json = r#"{"positions": [
            {"symbol": "ES", "unrealizedPnl": "12.50"},
            {"unrealizedPnl": "99"},
            {"symbol": "NQ"}
        ]}"#;
        let payload: PositionsPayload = serde_json::from_str(json).unwrap();
        let positions: PositionPnl = payload
            .positions
            .into_iter()
            .filter_map(|p| p.symbol.map(|s| (s, p.unrealized_pnl.unwrap_or_default())))
            .collect();

        assert_eq!(positions.len(), 2);
        assert_eq!(positions["ES"], Decimal::new(1_250, 2));
        assert_eq!(positions["NQ"], Decimal::ZERO);
    }

    #[test]
    fn fill_stream_url_carries_account_and_credentials() {
        let client = HttpAccountClient::new(UpstreamSettings::default(), Duration::from_secs(3))
            .unwrap();
        let credentials = Credentials::new(
            "ABCDEFGHIJKLMNOPQRSTUVWX",
            "abcdefghijklmnopqrstuvwxyz",
        )
        .unwrap();

        let url = client.fill_stream_url(&credentials, "ACC-1");
        assert!(url.starts_with("ws://"));
        assert!(url.contains("/ws/fills"));
        assert!(url.contains("account_id=ACC-1"));
        assert!(url.contains("api_key=ABCDEFGHIJKLMNOPQRSTUVWX"));
    }
}
