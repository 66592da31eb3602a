//! Turning request paths into archive URLs.
//!
//! Direct addresses map to a fixed URL with no network traffic. Branch
//! addresses go through the [`ResolutionCache`] and, on a miss, through the
//! upstream [`ArtifactApi`] under a bounded [`RetryPolicy`].

mod address;
mod cache;
mod github;
mod retry;

pub use address::{
    INDEX_DOCUMENT, Locator, RepoRef, RequestAddress, artifact_zip_url, parse_address,
};
pub use cache::ResolutionCache;
pub use github::{ArtifactApi, GithubApi, LookupStrategy, UpstreamError};
pub use retry::{RetryError, RetryPolicy, Transient};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// `Cache-Control` lifetime for content of an immutable artifact.
pub const IMMUTABLE_MAX_AGE: Duration = Duration::from_secs(31_536_000);

/// How long clients may cache a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// The archive is pinned by id and never changes.
    Immutable,
    /// The archive was chosen by branch and may be replaced by a newer build.
    ShortLived(Duration),
}

impl CachePolicy {
    pub fn header_value(&self) -> String {
        let max_age = match self {
            CachePolicy::Immutable => IMMUTABLE_MAX_AGE,
            CachePolicy::ShortLived(max_age) => *max_age,
        };
        format!("max-age={}", max_age.as_secs())
    }
}

/// A request address bound to a concrete archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub archive_url: String,
    pub cache_policy: CachePolicy,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No recent artifact found on branch {branch} of {owner}/{repo}")]
    NoArtifact {
        owner: String,
        repo: String,
        branch: String,
    },
    #[error("Failed to resolve the latest artifact of {key} after {attempts} attempts")]
    Exhausted {
        key: String,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },
    #[error("Failed to resolve the latest artifact of {key}")]
    Upstream {
        key: String,
        #[source]
        source: UpstreamError,
    },
}

/// Resolves request addresses to archive URLs.
pub struct Resolver {
    api: Arc<dyn ArtifactApi>,
    cache: Arc<ResolutionCache>,
    retry: RetryPolicy,
    api_base: String,
    branch_max_age: Duration,
}

impl Resolver {
    pub fn new(
        api: Arc<dyn ArtifactApi>,
        cache: Arc<ResolutionCache>,
        retry: RetryPolicy,
        api_base: impl Into<String>,
        branch_max_age: Duration,
    ) -> Self {
        Self {
            api,
            cache,
            retry,
            api_base: api_base.into(),
            branch_max_age,
        }
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub async fn resolve(&self, address: &RequestAddress) -> Result<Resolved, ResolveError> {
        match &address.locator {
            Locator::Artifact(id) => Ok(Resolved {
                archive_url: artifact_zip_url(&self.api_base, &address.repo, id),
                cache_policy: CachePolicy::Immutable,
            }),
            Locator::Branch(branch) => {
                let archive_url = self.resolve_branch(&address.repo, branch).await?;
                Ok(Resolved {
                    archive_url,
                    cache_policy: CachePolicy::ShortLived(self.branch_max_age),
                })
            }
        }
    }

    async fn resolve_branch(&self, repo: &RepoRef, branch: &str) -> Result<String, ResolveError> {
        let key = ResolutionCache::key(repo, branch);
        if let Some(url) = self.cache.get(&key) {
            debug!(key = %key, url = %url, "resolution cache hit");
            return Ok(url);
        }

        let found = self
            .retry
            .run("resolve branch", || self.api.latest_archive_url(repo, branch))
            .await
            .map_err(|err| match err {
                RetryError::Exhausted { attempts, last } => ResolveError::Exhausted {
                    key: key.clone(),
                    attempts,
                    source: last,
                },
                RetryError::Permanent(source) => ResolveError::Upstream {
                    key: key.clone(),
                    source,
                },
            })?;

        let Some(url) = found else {
            return Err(ResolveError::NoArtifact {
                owner: repo.owner.clone(),
                repo: repo.repo.clone(),
                branch: branch.to_string(),
            });
        };

        info!(key = %key, url = %url, "resolved branch to archive");
        self.cache.insert(key, url.clone());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Answer {
        Found(&'static str),
        Nothing,
        Fail(StatusCode),
    }

    struct FakeApi {
        answer: Answer,
        calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(answer: Answer) -> Arc<Self> {
            Arc::new(Self {
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArtifactApi for FakeApi {
        async fn latest_archive_url(
            &self,
            _repo: &RepoRef,
            _branch: &str,
        ) -> Result<Option<String>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answer {
                Answer::Found(url) => Ok(Some(url.to_string())),
                Answer::Nothing => Ok(None),
                Answer::Fail(status) => Err(UpstreamError::Status {
                    url: "fake".to_string(),
                    status,
                }),
            }
        }
    }

    fn resolver(api: Arc<FakeApi>) -> Resolver {
        Resolver::new(
            api,
            Arc::new(ResolutionCache::new(Duration::from_secs(300))),
            RetryPolicy::default(),
            "https://api.github.com",
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn direct_address_needs_no_upstream_call() {
        let api = FakeApi::new(Answer::Nothing);
        let resolver = resolver(api.clone());
        let address = parse_address("/acme/widgets/actions/artifacts/1234567890/a.html").unwrap();

        let resolved = resolver.resolve(&address).await.unwrap();
        assert_eq!(
            resolved.archive_url,
            "https://api.github.com/repos/acme/widgets/actions/artifacts/1234567890/zip"
        );
        assert_eq!(resolved.cache_policy, CachePolicy::Immutable);
        assert_eq!(resolved.cache_policy.header_value(), "max-age=31536000");
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn branch_resolution_is_cached_within_ttl() {
        let api = FakeApi::new(Answer::Found("https://example.test/zip"));
        let resolver = resolver(api.clone());
        let address = parse_address("/acme/widgets/main/").unwrap();

        for _ in 0..3 {
            let resolved = resolver.resolve(&address).await.unwrap();
            assert_eq!(resolved.archive_url, "https://example.test/zip");
            assert_eq!(resolved.cache_policy.header_value(), "max-age=300");
        }
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        resolver.resolve(&address).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_cache_empty() {
        let api = FakeApi::new(Answer::Fail(StatusCode::BAD_GATEWAY));
        let resolver = resolver(api.clone());
        let address = parse_address("/acme/widgets/main/").unwrap();

        let err = resolver.resolve(&address).await.unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { attempts: 3, .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn missing_artifact_is_not_retried() {
        let api = FakeApi::new(Answer::Nothing);
        let resolver = resolver(api.clone());
        let address = parse_address("/acme/widgets/main/").unwrap();

        let err = resolver.resolve(&address).await.unwrap_err();
        assert!(matches!(err, ResolveError::NoArtifact { .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn permanent_upstream_error_is_not_retried() {
        let api = FakeApi::new(Answer::Fail(StatusCode::UNAUTHORIZED));
        let resolver = resolver(api.clone());
        let address = parse_address("/acme/widgets/main/").unwrap();

        let err = resolver.resolve(&address).await.unwrap_err();
        assert!(matches!(err, ResolveError::Upstream { .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }
}
