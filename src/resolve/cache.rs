use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::address::RepoRef;

struct CachedUrl {
    url: String,
    inserted: Instant,
}

/// Time-bounded map from `owner/repo/branch` to a resolved archive URL.
///
/// Entries older than the TTL are treated as absent. Lookups and inserts
/// never hold the lock across an await point, so a purge racing an in-flight
/// resolution only causes that resolution to be repeated later.
pub struct ResolutionCache {
    entries: Mutex<HashMap<String, CachedUrl>>,
    ttl: Duration,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn key(repo: &RepoRef, branch: &str) -> String {
        format!("{}/{}/{}", repo.owner, repo.repo, branch)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(cached) if cached.inserted.elapsed() < self.ttl => Some(cached.url.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, url: String) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            CachedUrl {
                url,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, cached| cached.inserted.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge expired entries once per TTL period until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.ttl.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(
                        removed,
                        remaining = cache.len(),
                        "purged expired resolutions"
                    );
                }
            }
        })
    }
}
