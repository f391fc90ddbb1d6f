use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::adapters::{HttpClientFactory, PatternServiceFactory};
use crate::config::AppConfig;
use crate::domain::{AccountSnapshot, Bar, BarInterval};
use crate::error::{GuardError, Result};
use crate::services::SignalCache;
use crate::session::{HostEvent, SessionController, SessionStatus};

#[derive(Parser)]
#[command(name = "sessionguard")]
#[command(version = "0.1.0")]
#[command(about = "Session lifecycle guard for a remote pattern service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus $SESSIONGUARD_ENV overlay)
    #[arg(short, long, default_value = "config")]
    pub config: String,

    /// Emit JSON formatted logs
    #[arg(long, env = "SESSIONGUARD_JSON_LOGS")]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe the pattern service health endpoint
    Health,
    /// Drive one session from a JSON-lines bar file
    Replay {
        /// File with one bar per line
        #[arg(short, long)]
        bars: PathBuf,
        /// Instrument name (e.g., "ES 03-25")
        #[arg(short, long)]
        instrument: String,
        /// Number of leading bars replayed as history before going live
        #[arg(long, default_value = "0")]
        live_after: usize,
        /// Keep the remote active during historical replay
        #[arg(long)]
        sync_replay: bool,
    },
}

/// One-off health probe outside any session
pub async fn check_health(config: &AppConfig) -> Result<bool> {
    let client = HttpClientFactory.connect(&config.remote, "health-probe")?;
    let healthy = client.health_check().await;
    client.dispose();

    match &healthy {
        Ok(true) => println!("\x1b[32m✓ Pattern service at {} is healthy\x1b[0m", config.remote.base_url),
        Ok(false) => println!("\x1b[33m! Pattern service at {} reported unhealthy\x1b[0m", config.remote.base_url),
        Err(e) => println!("\x1b[31m✗ Pattern service unreachable: {}\x1b[0m", e),
    }
    healthy
}

/// Parse a JSON-lines bar file, skipping blank lines and `#` comments
pub fn parse_bars(contents: &str) -> Result<Vec<Bar>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .map_err(|e| GuardError::InvalidConfig(format!("bar line {}: {}", idx + 1, e)))
        })
        .collect()
}

/// Host events for a recorded session: the first `live_after` bars as history,
/// the rest live, then termination
pub fn replay_events(bars: Vec<Bar>, live_after: usize) -> Vec<HostEvent> {
    let live_after = live_after.min(bars.len());
    let mut events = Vec::with_capacity(bars.len() + 4);

    events.push(HostEvent::ConfigLoaded);
    if live_after > 0 {
        events.push(HostEvent::EnterHistorical);
    }

    for (idx, mut bar) in bars.into_iter().enumerate() {
        if idx == live_after {
            events.push(HostEvent::EnterRealtime);
        }
        bar.interval = if idx < live_after {
            BarInterval::Historical
        } else {
            BarInterval::Intraday
        };
        events.push(HostEvent::Bar {
            bar,
            account: AccountSnapshot::default(),
        });
    }

    if !events.contains(&HostEvent::EnterRealtime) {
        events.push(HostEvent::EnterRealtime);
    }
    events.push(HostEvent::Terminated);
    events
}

/// Feed a recorded bar file through a fresh session.
///
/// Ctrl+C stops the feed early; the session is terminated either way.
pub async fn run_replay(
    config: AppConfig,
    bars: &Path,
    instrument: &str,
    live_after: usize,
) -> Result<SessionStatus> {
    let contents = tokio::fs::read_to_string(bars).await?;
    let bars = parse_bars(&contents)?;
    info!(
        "Replaying {} bars for {} ({} historical)",
        bars.len(),
        instrument,
        live_after.min(bars.len())
    );

    let cache = Arc::new(SignalCache::new(config.session.signal_freshness()));
    let mut session = SessionController::new(
        SessionController::new_session_id(),
        instrument,
        config,
        Arc::new(HttpClientFactory),
        cache,
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut entries = 0usize;
    let mut status = session.status();
    for event in replay_events(bars, live_after) {
        if interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted, terminating session early");
            break;
        }

        if event == HostEvent::Terminated {
            session.settle().await;
            status = session.status();
        }

        if let Some(decision) = session.handle(event).await {
            if decision.is_entry() {
                entries += 1;
                println!(
                    "{} score={:.3} stop={:?} target={:?} pattern={:?}",
                    decision.action, decision.score, decision.stop, decision.target, decision.pattern_id
                );
            }
        }
    }

    if !session.is_terminated() {
        status = session.status();
        if let Some(report) = session.on_terminate().await {
            debug!("Termination report: {:?}", report);
        }
    }

    info!("Replay finished: {} entries proposed", entries);
    Ok(status)
}
