//! HTTP adapter for the pattern service.
//!
//! Instrument codes are normalized to their root symbol before they reach a URL.

use async_trait::async_trait;
use reqwest::{Client, Response};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{PatternService, PatternServiceFactory};
use crate::config::{MatchingConfig, RemoteConfig};
use crate::domain::{
    root_symbol, Bar, Direction, MatchResult, PatternMatch, PatternRegime, PerformanceSummary,
    TradeResult,
};
use crate::error::{GuardError, Result};

#[derive(Debug, Serialize)]
struct WireBar {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
    interval: &'static str,
}

impl From<&Bar> for WireBar {
    fn from(bar: &Bar) -> Self {
        Self {
            timestamp: bar.timestamp_ms(),
            open: to_f64(bar.open),
            high: to_f64(bar.high),
            low: to_f64(bar.low),
            close: to_f64(bar.close),
            volume: bar.volume,
            interval: bar.interval.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct BarBatch<'a> {
    instrument: &'a str,
    bars: Vec<WireBar>,
}

#[derive(Debug, Serialize)]
struct WireTradeResult<'a> {
    pattern_id: &'a str,
    entry_time: i64,
    entry_price: f64,
    exit_time: i64,
    exit_price: f64,
    pnl: f64,
    pnl_points: f64,
    direction: &'static str,
    status: &'static str,
}

impl<'a> From<&'a TradeResult> for WireTradeResult<'a> {
    fn from(result: &'a TradeResult) -> Self {
        Self {
            pattern_id: &result.pattern_id,
            entry_time: result.entry_time.timestamp_millis(),
            entry_price: to_f64(result.entry_price),
            exit_time: result.exit_time.timestamp_millis(),
            exit_price: to_f64(result.exit_price),
            pnl: to_f64(result.pnl),
            pnl_points: to_f64(result.pnl_points),
            direction: result.direction.as_str(),
            status: match result.status() {
                crate::domain::TradeStatus::Win => "win",
                crate::domain::TradeStatus::Loss => "loss",
                crate::domain::TradeStatus::Breakeven => "breakeven",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct MatchingConfigPayload<'a> {
    instrument: &'a str,
    session_id: &'a str,
    config: &'a MatchingConfig,
}

/// Signals endpoint response
#[derive(Debug, Deserialize)]
struct SignalsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    signals: Option<SignalData>,
    #[serde(default, rename = "signalType")]
    signal_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignalData {
    /// 0..=100
    #[serde(default)]
    bull: f64,
    /// 0..=100
    #[serde(default)]
    bear: f64,
    #[serde(default)]
    matches: Vec<WireMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMatch {
    id: String,
    #[serde(default)]
    pattern_name: Option<String>,
    #[serde(default)]
    pattern_type: Option<String>,
    #[serde(default)]
    regime: Option<PatternRegime>,
    #[serde(default)]
    direction: Option<Direction>,
    confidence: f64,
    #[serde(default)]
    target: Option<f64>,
    #[serde(default)]
    stop: Option<f64>,
}

impl SignalsResponse {
    fn into_match_result(self) -> MatchResult {
        let Some(data) = self.signals.filter(|_| self.success) else {
            return MatchResult::empty();
        };

        let bull_strength = data.bull / 100.0;
        let bear_strength = data.bear / 100.0;
        let dominant = if bear_strength > bull_strength {
            Direction::Short
        } else {
            Direction::Long
        };

        let matches = data
            .matches
            .into_iter()
            .map(|m| {
                let category = m.pattern_type.unwrap_or_else(|| "unknown".to_string());
                let direction = m
                    .direction
                    .or_else(|| direction_hint(&category))
                    .unwrap_or(dominant);
                PatternMatch {
                    name: m.pattern_name.unwrap_or_else(|| m.id.clone()),
                    id: m.id,
                    regime: m.regime.unwrap_or_default(),
                    direction,
                    // Some deployments report percentages
                    confidence: if m.confidence > 1.0 {
                        m.confidence / 100.0
                    } else {
                        m.confidence
                    },
                    stop: m.stop.and_then(Decimal::from_f64_retain),
                    target: m.target.and_then(Decimal::from_f64_retain),
                    category,
                }
            })
            .collect();

        MatchResult {
            score: bull_strength.max(bear_strength).clamp(0.0, 1.0),
            bull_strength,
            bear_strength,
            matches,
            signal_type: self.signal_type,
        }
    }
}

fn direction_hint(pattern_type: &str) -> Option<Direction> {
    let lower = pattern_type.to_lowercase();
    if lower.contains("bull") || lower.contains("long") {
        Some(Direction::Long)
    } else if lower.contains("bear") || lower.contains("short") {
        Some(Direction::Short)
    } else {
        None
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// REST client for the pattern service
pub struct HttpPatternClient {
    http: Client,
    health_http: Client,
    base_url: String,
    session_id: String,
    batch_size: usize,
    request_timeout: Duration,
    disposed: AtomicBool,
}

impl HttpPatternClient {
    pub fn new(config: &RemoteConfig, session_id: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("sessionguard/0.1")
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GuardError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let health_http = Client::builder()
            .user_agent("sessionguard/0.1")
            .timeout(config.health_timeout())
            .build()
            .map_err(|e| GuardError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            health_http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session_id: session_id.to_string(),
            batch_size: config.batch_size.max(1),
            request_timeout: config.request_timeout(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(GuardError::ClientDisposed)
        } else {
            Ok(())
        }
    }

    fn map_send_error(&self, err: reqwest::Error) -> GuardError {
        if err.is_timeout() {
            GuardError::Timeout {
                elapsed_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            GuardError::Http(err)
        }
    }

    async fn check_status(resp: Response) -> Result<String> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GuardError::RemoteStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        self.ensure_live()?;
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        Self::check_status(resp).await
    }
}

#[async_trait]
impl PatternService for HttpPatternClient {
    async fn send_bar(&self, instrument: &str, bar: &Bar) -> Result<()> {
        let symbol = root_symbol(instrument);
        let batch = BarBatch {
            instrument: symbol,
            bars: vec![WireBar::from(bar)],
        };
        self.post_json(&format!("/api/bars/{}", symbol), &batch).await?;
        debug!("Bar {} sent for {}", bar.timestamp, symbol);
        Ok(())
    }

    async fn send_historical_batch(&self, instrument: &str, bars: &[Bar]) -> Result<usize> {
        let symbol = root_symbol(instrument);
        let path = format!("/api/bars/{}", symbol);
        let mut sent = 0;

        info!(
            "Sending {} historical bars for {} in batches of {}",
            bars.len(),
            symbol,
            self.batch_size
        );

        for chunk in bars.chunks(self.batch_size) {
            let batch = BarBatch {
                instrument: symbol,
                bars: chunk.iter().map(WireBar::from).collect(),
            };
            self.post_json(&path, &batch).await?;
            sent += chunk.len();
            debug!("Sent {}/{} historical bars", sent, bars.len());
        }

        Ok(sent)
    }

    async fn check_signals(&self, instrument: &str) -> Result<MatchResult> {
        self.ensure_live()?;
        let symbol = root_symbol(instrument);
        let resp = self
            .http
            .get(self.url(&format!("/api/signals/{}", symbol)))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let body = Self::check_status(resp).await?;
        let parsed: SignalsResponse = serde_json::from_str(&body)?;
        Ok(parsed.into_match_result())
    }

    async fn send_matching_config(&self, instrument: &str, config: &MatchingConfig) -> Result<()> {
        let payload = MatchingConfigPayload {
            instrument: root_symbol(instrument),
            session_id: &self.session_id,
            config,
        };
        self.post_json("/api/matching-config", &payload).await?;
        info!("Matching config sent for {}", payload.instrument);
        Ok(())
    }

    async fn send_trade_result(&self, instrument: &str, result: &TradeResult) -> Result<()> {
        let symbol = root_symbol(instrument);
        self.post_json(
            &format!("/api/signals/{}/trade_results", symbol),
            &WireTradeResult::from(result),
        )
        .await?;
        Ok(())
    }

    async fn send_performance_summary(&self, summary: &PerformanceSummary) -> Result<()> {
        self.post_json(&format!("/api/sessions/{}/summary", self.session_id), summary)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        self.ensure_live()?;
        let resp = self
            .health_http
            .get(self.url("/"))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let healthy = resp.status().is_success();
        if !healthy {
            warn!("Health check failed: status {}", resp.status());
        }
        Ok(healthy)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!("Pattern service client disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Factory producing [`HttpPatternClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl PatternServiceFactory for HttpClientFactory {
    fn connect(&self, config: &RemoteConfig, session_id: &str) -> Result<Arc<dyn PatternService>> {
        if config.base_url.trim().is_empty() {
            return Err(GuardError::InvalidConfig("remote.base_url is empty".to_string()));
        }
        Ok(Arc::new(HttpPatternClient::new(config, session_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BarInterval;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn client() -> HttpPatternClient {
        let config = RemoteConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            request_timeout_ms: 500,
            health_timeout_ms: 500,
            ..Default::default()
        };
        HttpPatternClient::new(&config, "session-1").unwrap()
    }

    #[test]
    fn test_base_url_trimmed() {
        assert_eq!(client().base_url(), "http://127.0.0.1:9");
        assert_eq!(client().url("/api/bars/ES"), "http://127.0.0.1:9/api/bars/ES");
    }

    #[test]
    fn test_wire_bar() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 3, 14, 30, 0).unwrap();
        let bar = Bar::new(
            ts,
            dec!(5000.25),
            dec!(5001),
            dec!(4999.5),
            dec!(5000.75),
            1200,
            BarInterval::Historical,
        );
        let wire = serde_json::to_value(WireBar::from(&bar)).unwrap();
        assert_eq!(wire["timestamp"], ts.timestamp_millis());
        assert_eq!(wire["open"], 5000.25);
        assert_eq!(wire["interval"], "historical");
    }

    #[test]
    fn test_signals_response_conversion() {
        let body = r#"{
            "success": true,
            "instrument": "ES",
            "signals": {
                "bull": 80,
                "bear": 20,
                "matches": [
                    {"id": "p1", "patternName": "Hammer", "patternType": "bullish_reversal", "confidence": 85, "stop": 4995.5, "target": 5010},
                    {"id": "p2", "patternType": "ema_cross", "regime": "trend", "direction": "short", "confidence": 0.6}
                ]
            }
        }"#;
        let parsed: SignalsResponse = serde_json::from_str(body).unwrap();
        let result = parsed.into_match_result();

        assert!((result.score - 0.8).abs() < 1e-9);
        assert_eq!(result.matches.len(), 2);

        let hammer = &result.matches[0];
        assert_eq!(hammer.name, "Hammer");
        assert_eq!(hammer.direction, Direction::Long);
        assert!((hammer.confidence - 0.85).abs() < 1e-9);
        assert_eq!(hammer.stop, Some(dec!(4995.5)));

        let cross = &result.matches[1];
        assert_eq!(cross.regime, PatternRegime::Trend);
        assert_eq!(cross.direction, Direction::Short);
        assert_eq!(cross.name, "p2");
    }

    #[test]
    fn test_unsuccessful_response_is_empty() {
        let body = r#"{"success": false, "signals": {"bull": 90, "bear": 0, "matches": []}}"#;
        let parsed: SignalsResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.into_match_result().is_empty());
    }

    #[tokio::test]
    async fn test_disposed_client_fails_fast() {
        let client = client();
        client.dispose();
        client.dispose();
        assert!(client.is_disposed());

        let err = client.check_signals("ES 03-25").await.unwrap_err();
        assert!(matches!(err, GuardError::ClientDisposed));
        let err = client.health_check().await.unwrap_err();
        assert!(matches!(err, GuardError::ClientDisposed));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let err = client().health_check().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_factory_rejects_empty_url() {
        let config = RemoteConfig {
            base_url: " ".to_string(),
            ..Default::default()
        };
        assert!(HttpClientFactory.connect(&config, "s").is_err());
    }
}
