use lru::LruCache;
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::io::HttpRangeReader;
use crate::zip::ZipArchive;

/// A remote archive read through HTTP Range requests.
pub type RemoteArchive = ZipArchive<HttpRangeReader>;

/// Shared archive readers keyed by canonical archive URL.
///
/// Lookup and insertion happen under one short lock, so concurrent first
/// requests for a URL still end up with a single reader. Building a reader
/// performs no I/O; the archive index is fetched later, outside the lock.
/// The least recently used reader is dropped once `capacity` is reached.
pub struct ReaderCache {
    client: Client,
    headers: HeaderMap,
    readers: Mutex<LruCache<String, Arc<RemoteArchive>>>,
    constructed: AtomicU64,
}

impl ReaderCache {
    pub fn new(client: Client, headers: HeaderMap, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            headers,
            readers: Mutex::new(LruCache::new(capacity)),
            constructed: AtomicU64::new(0),
        }
    }

    /// Get the reader for `url`, building it on first use.
    pub fn get_or_create(&self, url: &str) -> Arc<RemoteArchive> {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(archive) = readers.get(url) {
            return Arc::clone(archive);
        }

        let reader = HttpRangeReader::new(self.client.clone(), url, self.headers.clone());
        let archive = Arc::new(ZipArchive::new(Arc::new(reader)));
        let evicted = readers.push(url.to_string(), Arc::clone(&archive));
        if let Some((evicted_url, evicted)) = evicted {
            debug!(
                url = %evicted_url,
                transferred = evicted.reader().transferred_bytes(),
                "evicted archive reader"
            );
        }
        self.constructed.fetch_add(1, Ordering::Relaxed);
        debug!(url = %url, cached = readers.len(), "created archive reader");
        archive
    }

    /// Number of readers built since start-up, evicted ones included.
    pub fn constructed(&self) -> u64 {
        self.constructed.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> ReaderCache {
        ReaderCache::new(Client::new(), HeaderMap::new(), capacity)
    }

    #[test]
    fn sequential_access_reuses_the_reader() {
        let cache = cache(8);
        let first = cache.get_or_create("http://127.0.0.1:9/a.zip");
        let second = cache.get_or_create("http://127.0.0.1:9/a.zip");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.constructed(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(first.reader().url(), "http://127.0.0.1:9/a.zip");
    }

    #[test]
    fn distinct_urls_get_distinct_readers() {
        let cache = cache(8);
        let a = cache.get_or_create("http://127.0.0.1:9/a.zip");
        let b = cache.get_or_create("http://127.0.0.1:9/b.zip");

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_builds_one_reader() {
        let cache = Arc::new(cache(8));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_create("http://127.0.0.1:9/a.zip") })
            })
            .collect();

        let mut readers = Vec::new();
        for handle in handles {
            readers.push(handle.await.unwrap());
        }

        assert!(readers.iter().all(|r| Arc::ptr_eq(r, &readers[0])));
        assert_eq!(cache.constructed(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn least_recently_used_reader_is_evicted() {
        let cache = cache(2);
        cache.get_or_create("http://h/a.zip");
        cache.get_or_create("http://h/b.zip");
        cache.get_or_create("http://h/a.zip");
        cache.get_or_create("http://h/c.zip");

        assert_eq!(cache.len(), 2);
        cache.get_or_create("http://h/a.zip");
        assert_eq!(cache.constructed(), 3);
    }
}
