//! Process-local fallback cache for windows.
//!
//! Every throttler keeps a local mirror of the windows it has touched. The
//! mirror serves two purposes: a read-through accelerator for the next
//! lookup, and the store of last resort when the remote store is down.
//! Entries carry an absolute expiry and are swept by a background task.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::window::Window;

/// Local cache tuning.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How often expired entries are swept out. Zero disables sweeping, in
    /// which case the cache only shrinks via overwrite.
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    pub fn new(cleanup_interval: Duration) -> Self {
        Self { cleanup_interval }
    }

    /// No background sweeping.
    pub fn no_cleanup() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    window: Window,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Concurrent key -> (window, expiry) map with a background sweeper.
pub struct LocalCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    sweeper: Option<JoinHandle<()>>,
}

impl LocalCache {
    /// Creates the cache and, unless disabled, spawns its sweeper task.
    /// Must be called within a tokio runtime when sweeping is enabled.
    pub fn new(config: CacheConfig) -> Self {
        let entries: Arc<DashMap<String, CacheEntry>> = Arc::new(DashMap::new());

        let sweeper = if config.cleanup_interval.is_zero() {
            debug!("local cache sweeping is disabled");
            None
        } else {
            let map = Arc::clone(&entries);
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.cleanup_interval);
                // The first tick completes immediately; skip it.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    map.retain(|_, entry| !entry.is_expired());
                }
            }))
        };

        Self { entries, sweeper }
    }

    /// Returns the cached window for `key`, unless it has expired. Expired
    /// entries are removed on sight.
    pub fn get(&self, key: &str) -> Option<Window> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.window.clone())
    }

    pub fn insert(&self, key: &str, window: Window, expires_at: DateTime<Utc>) {
        self.entries
            .insert(key.to_string(), CacheEntry { window, expires_at });
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for LocalCache {
    fn drop(&mut self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
    }
}

/// Absolute expiry `ttl` from now, saturating instead of overflowing.
pub(crate) fn expiry_after(ttl: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(ttl)
        .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX));
    Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{LimiterKind, WindowKind};

    fn window() -> Window {
        Window::new(
            "cache-test",
            LimiterKind::RateLimiter,
            WindowKind::Sliding,
            5,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn unexpired_entries_are_served() {
        let cache = LocalCache::new(CacheConfig::no_cleanup());
        cache.insert("k", window(), expiry_after(Duration::from_secs(60)));
        assert!(cache.get("k").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn expired_entries_are_removed_on_read() {
        let cache = LocalCache::new(CacheConfig::no_cleanup());
        cache.insert("k", window(), Utc::now() - chrono::Duration::seconds(1));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn sweeper_clears_expired_entries() {
        let cache = LocalCache::new(CacheConfig::new(Duration::from_millis(20)));
        cache.insert("dead", window(), Utc::now() - chrono::Duration::seconds(1));
        cache.insert("live", window(), expiry_after(Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(cache.get("dead").is_none());
        assert!(cache.get("live").is_some());
        assert_eq!(cache.len(), 1);
    }
}
