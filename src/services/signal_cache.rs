//! Process-wide signal cache
//!
//! Holds the latest match result per instrument, shared by every session in the
//! process. Sessions attach on config load and release on termination. An
//! instrument's entry is dropped once no session holds that root symbol, and
//! the cache is wiped when the last user leaves.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{root_symbol, MatchResult};

/// A cached match result and when it was received
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSignal {
    pub result: MatchResult,
    pub received_at: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub users: usize,
    pub entries: usize,
    pub stores: u64,
    pub hits: u64,
    pub misses: u64,
    pub resets: u64,
}

/// Shared cache of the latest signals, keyed by root symbol
#[derive(Debug)]
pub struct SignalCache {
    freshness: Duration,
    entries: RwLock<HashMap<String, CachedSignal>>,
    /// Attached sessions per root symbol
    holders: Mutex<HashMap<String, usize>>,
    stores: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    resets: AtomicU64,
}

impl SignalCache {
    pub fn new(freshness: Duration) -> Self {
        Self {
            freshness,
            entries: RwLock::new(HashMap::new()),
            holders: Mutex::new(HashMap::new()),
            stores: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    /// Create with the default 10 second freshness window
    pub fn with_defaults() -> Self {
        Self::new(Duration::seconds(10))
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Register a session as a user. Returns the new user count.
    pub fn attach(&self, instrument: &str) -> usize {
        let mut holders = self.lock_holders();
        *holders.entry(root_symbol(instrument).to_string()).or_insert(0) += 1;
        let users = holders.values().sum();
        debug!("Signal cache attached by {} ({} users)", instrument, users);
        users
    }

    pub fn users(&self) -> usize {
        self.lock_holders().values().sum()
    }

    /// Sessions currently attached for `instrument`'s root symbol
    pub fn holders(&self, instrument: &str) -> usize {
        self.lock_holders()
            .get(root_symbol(instrument))
            .copied()
            .unwrap_or(0)
    }

    /// Drop a session's claim. Clears its instrument entry once no other session
    /// holds the same root symbol, and resets the whole cache if it was the last
    /// user. Returns true on a full reset.
    pub async fn release(&self, instrument: &str) -> bool {
        let root = root_symbol(instrument);
        let (remaining_for_root, remaining) = {
            let mut holders = self.lock_holders();
            let remaining_for_root = match holders.get_mut(root) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    *count
                }
                _ => {
                    holders.remove(root);
                    0
                }
            };
            (remaining_for_root, holders.values().sum::<usize>())
        };

        if remaining == 0 {
            self.reset().await;
            return true;
        }

        if remaining_for_root == 0 {
            self.entries.write().await.remove(root);
        }
        debug!(
            "Signal cache released by {} ({} users remain, {} on {})",
            instrument, remaining, remaining_for_root, root
        );
        false
    }

    fn lock_holders(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.holders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn store(&self, instrument: &str, result: MatchResult, received_at: DateTime<Utc>) {
        self.entries.write().await.insert(
            root_symbol(instrument).to_string(),
            CachedSignal {
                result,
                received_at,
            },
        );
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Latest result for `instrument` if it is within the freshness window at `now`
    pub async fn get_fresh(&self, instrument: &str, now: DateTime<Utc>) -> Option<CachedSignal> {
        let entries = self.entries.read().await;
        let fresh = entries
            .get(root_symbol(instrument))
            .filter(|cached| now - cached.received_at <= self.freshness)
            .cloned();

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Clear every entry
    pub async fn reset(&self) {
        let cleared = {
            let mut entries = self.entries.write().await;
            let n = entries.len();
            entries.clear();
            n
        };
        self.resets.fetch_add(1, Ordering::SeqCst);
        info!("Signal cache reset ({} entries cleared)", cleared);
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            users: self.users(),
            entries: self.entries.read().await.len(),
            stores: self.stores.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::SeqCst),
        }
    }
}

impl Default for SignalCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f64) -> MatchResult {
        MatchResult {
            score,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_freshness_window() {
        let cache = SignalCache::with_defaults();
        let now = Utc::now();
        cache.store("ES 03-25", result(0.8), now).await;

        // Keyed by root symbol
        assert!(cache.get_fresh("ES", now + Duration::seconds(10)).await.is_some());
        assert!(cache
            .get_fresh("ES 06-25", now + Duration::seconds(11))
            .await
            .is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_release_clears_own_entry_only() {
        let cache = SignalCache::with_defaults();
        let now = Utc::now();
        cache.attach("ES");
        cache.attach("NQ");
        cache.store("ES", result(0.5), now).await;
        cache.store("NQ", result(0.6), now).await;

        assert!(!cache.release("ES").await);
        assert!(cache.get_fresh("ES", now).await.is_none());
        assert!(cache.get_fresh("NQ", now).await.is_some());
        assert_eq!(cache.stats().await.resets, 0);
    }

    #[tokio::test]
    async fn test_release_keeps_entry_shared_by_root_symbol() {
        let cache = SignalCache::with_defaults();
        let now = Utc::now();
        cache.attach("ES 03-25");
        cache.attach("ES 06-25");
        cache.attach("NQ 03-25");
        cache.store("ES 03-25", result(0.5), now).await;
        assert_eq!(cache.holders("ES"), 2);

        assert!(!cache.release("ES 03-25").await);
        assert!(cache.get_fresh("ES 06-25", now).await.is_some());
        assert_eq!(cache.holders("ES"), 1);

        assert!(!cache.release("ES 06-25").await);
        assert!(cache.get_fresh("ES", now).await.is_none());
        assert_eq!(cache.users(), 1);
    }

    #[tokio::test]
    async fn test_last_release_resets() {
        let cache = SignalCache::with_defaults();
        cache.attach("ES");
        cache.store("NQ", result(0.6), Utc::now()).await;

        assert!(cache.release("ES").await);
        let stats = cache.stats().await;
        assert_eq!(stats.users, 0);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.resets, 1);
    }

    #[tokio::test]
    async fn test_release_without_attach_does_not_underflow() {
        let cache = SignalCache::with_defaults();
        assert!(cache.release("ES").await);
        assert_eq!(cache.users(), 0);
    }
}
