use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GuardError, Result};
use crate::strategy::ExecutionMode;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the pattern service (e.g., "http://localhost:3001")
    pub base_url: String,
    /// Master "use remote" toggle
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keep the remote active while replaying history, awaiting every call in bar order.
    /// Off by default: entering the historical phase forces remote usage off.
    #[serde(default)]
    pub sync_replay: bool,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Health check timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub health_timeout_ms: u64,
    /// Bars per request when bulk-ingesting history
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_health_timeout() -> u64 {
    5_000
}

fn default_batch_size() -> usize {
    100
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            enabled: true,
            sync_replay: false,
            request_timeout_ms: default_request_timeout(),
            health_timeout_ms: default_health_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Bars retained for backfill
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Upper bound on the final summary flush at termination (ms)
    #[serde(default = "default_flush_timeout")]
    pub shutdown_flush_timeout_ms: u64,
    /// Cached remote signals older than this are ignored (ms)
    #[serde(default = "default_signal_freshness")]
    pub signal_freshness_ms: u64,
}

fn default_buffer_capacity() -> usize {
    200
}

fn default_flush_timeout() -> u64 {
    5_000
}

fn default_signal_freshness() -> u64 {
    10_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            shutdown_flush_timeout_ms: default_flush_timeout(),
            signal_freshness_ms: default_signal_freshness(),
        }
    }
}

impl SessionConfig {
    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_flush_timeout_ms)
    }

    pub fn signal_freshness(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.signal_freshness_ms as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// The breaker trips once the session error count exceeds this value
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
}

fn default_error_threshold() -> u32 {
    10
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Configured per-trade stop size in account currency
    #[serde(default = "default_stop_size")]
    pub stop_size: Decimal,
    /// Open-position loss multiple of `stop_size` that activates cooldown
    #[serde(default = "default_position_loss_multiple")]
    pub position_loss_multiple: Decimal,
    /// Daily loss cap in account currency (absolute value)
    #[serde(default = "default_daily_loss_cap")]
    pub daily_loss_cap: Decimal,
    /// Fraction of `daily_loss_cap` that activates cooldown
    #[serde(default = "default_daily_loss_fraction")]
    pub daily_loss_fraction: Decimal,
    /// Minutes after activation that release the cooldown
    #[serde(default = "default_exit_minutes")]
    pub exit_minutes: i64,
    /// Price displacement from the reference price that releases the cooldown
    #[serde(default = "default_exit_points")]
    pub exit_points: Decimal,
}

fn default_stop_size() -> Decimal {
    dec!(100)
}

fn default_daily_loss_cap() -> Decimal {
    dec!(1000)
}

fn default_position_loss_multiple() -> Decimal {
    dec!(3)
}

fn default_daily_loss_fraction() -> Decimal {
    dec!(0.8)
}

fn default_exit_minutes() -> i64 {
    15
}

fn default_exit_points() -> Decimal {
    dec!(0.5)
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stop_size: default_stop_size(),
            position_loss_multiple: default_position_loss_multiple(),
            daily_loss_cap: default_daily_loss_cap(),
            daily_loss_fraction: default_daily_loss_fraction(),
            exit_minutes: default_exit_minutes(),
            exit_points: default_exit_points(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Minimum candidate score promoted to a decision (inclusive)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Fraction of scorers that must agree in consensus mode
    #[serde(default = "default_consensus_fraction")]
    pub consensus_fraction: f64,
    /// Maximum concurrent open positions (0 = unlimited)
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    /// Minimum seconds between accepted decisions
    #[serde(default = "default_min_spacing")]
    pub min_spacing_secs: i64,
    /// Per-bar multiplicative decay of accumulated strength
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
    /// Strength a side must reach before the decay scorer fires
    #[serde(default = "default_decay_entry_strength")]
    pub decay_entry_strength: f64,
    /// Dominance ratio required over the opposite side
    #[serde(default = "default_decay_skew")]
    pub decay_skew: f64,
    /// Agreeing categories required by the voting scorer
    #[serde(default = "default_min_votes")]
    pub min_votes: usize,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_consensus_fraction() -> f64 {
    0.3
}

fn default_max_positions() -> u32 {
    1
}

fn default_min_spacing() -> i64 {
    60
}

fn default_decay_rate() -> f64 {
    0.95
}

fn default_decay_entry_strength() -> f64 {
    1.5
}

fn default_decay_skew() -> f64 {
    1.5
}

fn default_min_votes() -> usize {
    2
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            confidence_threshold: default_confidence_threshold(),
            consensus_fraction: default_consensus_fraction(),
            max_positions: default_max_positions(),
            min_spacing_secs: default_min_spacing(),
            decay_rate: default_decay_rate(),
            decay_entry_strength: default_decay_entry_strength(),
            decay_skew: default_decay_skew(),
            min_votes: default_min_votes(),
        }
    }
}

/// Static-for-session matching parameters, sent once to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub bull_threshold: u32,
    pub bear_threshold: u32,
    pub pattern_confidence_threshold: f64,
    pub enable_pattern_auction: bool,
    pub performance_decay_rate: f64,
    pub minimum_pattern_trades: u32,
    pub apply_loss_penalty: bool,
    pub apply_regime_penalty: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            bull_threshold: 70,
            bear_threshold: 70,
            pattern_confidence_threshold: 0.7,
            enable_pattern_auction: true,
            performance_decay_rate: 0.1,
            minimum_pattern_trades: 5,
            apply_loss_penalty: true,
            apply_regime_penalty: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("remote.base_url", "http://localhost:3001")?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SESSIONGUARD_ENV")
                        .unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SESSIONGUARD_REMOTE__BASE_URL, etc.)
            .add_source(
                Environment::with_prefix("SESSIONGUARD")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load and validate in one step
    pub fn load_validated<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config = Self::load_from(config_dir)?;
        config
            .validate()
            .map_err(|errors| GuardError::InvalidConfig(errors.join("; ")))?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.remote.base_url.trim().is_empty() {
            errors.push("remote.base_url must not be empty".to_string());
        }

        if self.remote.batch_size == 0 {
            errors.push("remote.batch_size must be positive".to_string());
        }

        if self.session.buffer_capacity == 0 {
            errors.push("session.buffer_capacity must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.gate.confidence_threshold) {
            errors.push("gate.confidence_threshold must be between 0 and 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.gate.consensus_fraction) {
            errors.push("gate.consensus_fraction must be between 0 and 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.gate.decay_rate) {
            errors.push("gate.decay_rate must be between 0 and 1".to_string());
        }

        if self.gate.decay_entry_strength.is_nan() || self.gate.decay_entry_strength <= 0.0 {
            errors.push("gate.decay_entry_strength must be positive".to_string());
        }

        if self.gate.decay_skew.is_nan() || self.gate.decay_skew < 1.0 {
            errors.push("gate.decay_skew must be at least 1".to_string());
        }

        if self.gate.min_votes == 0 {
            errors.push("gate.min_votes must be at least 1".to_string());
        }

        if self.cooldown.stop_size <= Decimal::ZERO {
            errors.push("cooldown.stop_size must be positive".to_string());
        }

        if self.cooldown.daily_loss_cap <= Decimal::ZERO {
            errors.push("cooldown.daily_loss_cap must be positive".to_string());
        }

        if self.cooldown.exit_minutes <= 0 && self.cooldown.exit_points <= Decimal::ZERO {
            errors.push("cooldown needs a positive exit_minutes or exit_points".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
