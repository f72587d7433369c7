//! Slug → short link cache
//!
//! Backed by a moka future cache:
//! - bounded to a fixed number of entries, least recently used evicted first
//! - every entry expires a fixed time after insertion, regardless of use
//! - concurrent lookups of the same missing or expired slug share one fetch
//!   from the [`SlugSource`]; every caller awaits that fetch
//! - slugs missing from storage are not cached, the next lookup asks again
//!
//! A lookup whose future is dropped mid-fetch caches nothing. If other
//! callers were waiting on that fetch, one of them starts a new one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;

use crate::error::AppError;
use crate::model::ResolvedShortLink;

/// Where the cache loads missing slugs from
pub trait SlugSource: Send + Sync + 'static {
    /// Loads the short link for `slug` together with its metas
    fn find_by_slug(
        &self,
        slug: &str,
    ) -> impl Future<Output = Result<Option<ResolvedShortLink>, AppError>> + Send;
}

/// Outcome of a fetch that produced nothing to cache
#[derive(Debug)]
enum Miss {
    NotFound,
    Failed(AppError),
}

pub struct ShortLinkCache<S> {
    entries: Cache<String, ResolvedShortLink>,
    source: Arc<S>,
    disposed: Arc<AtomicU64>,
}

impl<S: SlugSource> ShortLinkCache<S> {
    pub fn new(source: Arc<S>, max_entries: u64, ttl: Duration) -> Self {
        let disposed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&disposed);
        let entries = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |slug, value, cause| {
                counter.fetch_add(1, Ordering::Relaxed);
                dispose(slug, value, cause);
            })
            .build();

        Self {
            entries,
            source,
            disposed,
        }
    }

    /// Returns the short link for `slug`, fetching it on a miss
    ///
    /// `Ok(None)` means storage has no such slug.
    pub async fn get(&self, slug: &str) -> Result<Option<ResolvedShortLink>, AppError> {
        let source = Arc::clone(&self.source);
        let key = slug.to_string();
        let fetch = async move {
            tracing::debug!(slug = %key, "fetching short link on cache miss");
            match source.find_by_slug(&key).await {
                Ok(Some(resolved)) => Ok(resolved),
                Ok(None) => Err(Miss::NotFound),
                Err(error) => Err(Miss::Failed(error)),
            }
        };

        match self.entries.try_get_with(slug.to_string(), fetch).await {
            Ok(resolved) => Ok(Some(resolved)),
            Err(miss) => match miss.as_ref() {
                Miss::NotFound => Ok(None),
                Miss::Failed(error) => Err(AppError::Internal(format!(
                    "loading slug '{slug}' failed: {error}"
                ))),
            },
        }
    }

    /// Drops `slug` so the next lookup goes to storage
    pub async fn invalidate(&self, slug: &str) {
        self.entries.invalidate(slug).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Entries that have left the cache so far, whatever the cause
    pub fn disposed_count(&self) -> u64 {
        self.disposed.load(Ordering::Relaxed)
    }
}

fn dispose(slug: Arc<String>, value: ResolvedShortLink, cause: RemovalCause) {
    tracing::debug!(
        slug = %slug,
        id = %value.short_link.id,
        cause = ?cause,
        "short link left the cache"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShortLink;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Serves slugs starting with "known" and counts every query
    struct CountingSource {
        queries: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                queries: AtomicUsize::new(0),
                delay,
            })
        }

        fn queries(&self) -> usize {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl SlugSource for CountingSource {
        async fn find_by_slug(&self, slug: &str) -> Result<Option<ResolvedShortLink>, AppError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            if slug == "broken" {
                return Err(AppError::Internal("disk on fire".to_string()));
            }
            if !slug.starts_with("known") {
                return Ok(None);
            }

            let now = Utc::now();
            Ok(Some(ResolvedShortLink {
                short_link: ShortLink {
                    id: format!("id-{slug}"),
                    slug: slug.to_string(),
                    full_link: "https://example.com".to_string(),
                    user_id: "u1".to_string(),
                    created_at: now,
                    updated_at: now,
                },
                meta_list: Vec::new(),
            }))
        }
    }

    #[tokio::test]
    async fn test_hit_after_miss() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_secs(60));

        let first = cache.get("known-a").await.unwrap().unwrap();
        let second = cache.get("known-a").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let source = CountingSource::new(Duration::from_millis(100));
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_secs(60));

        let (a, b) = tokio::join!(cache.get("known-a"), cache.get("known-a"));

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_secs(60));

        assert!(cache.get("unknown").await.unwrap().is_none());
        assert!(cache.get("unknown").await.unwrap().is_none());
        assert_eq!(source.queries(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_fetched_once_more() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_millis(100));

        cache.get("known-a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        cache.get("known-a").await.unwrap();
        cache.get("known-a").await.unwrap();

        assert_eq!(source.queries(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_secs(60));

        cache.get("known-a").await.unwrap();
        cache.invalidate("known-a").await;
        cache.get("known-a").await.unwrap();

        assert_eq!(source.queries(), 2);
    }

    #[tokio::test]
    async fn test_source_errors_surface_and_are_not_cached() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_secs(60));

        assert!(matches!(cache.get("broken").await, Err(AppError::Internal(_))));
        assert!(cache.get("broken").await.is_err());
        assert_eq!(source.queries(), 2);
    }

    #[tokio::test]
    async fn test_least_recently_used_entry_is_evicted() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 2, Duration::from_secs(60));

        cache.get("known-a").await.unwrap();
        cache.get("known-b").await.unwrap();
        cache.entries.run_pending_tasks().await;

        // a was used last, b is the eviction candidate
        cache.get("known-a").await.unwrap();
        cache.entries.run_pending_tasks().await;
        cache.get("known-c").await.unwrap();
        cache.entries.run_pending_tasks().await;

        assert_eq!(cache.entry_count(), 2);
        assert!(cache.entries.contains_key("known-a"));
        assert!(!cache.entries.contains_key("known-b"));
        assert!(cache.entries.contains_key("known-c"));
        assert_eq!(cache.disposed_count(), 1);
        assert_eq!(source.queries(), 3);

        cache.get("known-b").await.unwrap();
        assert_eq!(source.queries(), 4);
    }

    #[tokio::test]
    async fn test_disposal_hook_fires_on_invalidation_and_expiry() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = ShortLinkCache::new(Arc::clone(&source), 10, Duration::from_millis(100));

        cache.get("known-a").await.unwrap();
        cache.get("known-b").await.unwrap();
        cache.entries.run_pending_tasks().await;
        assert_eq!(cache.disposed_count(), 0);

        cache.invalidate("known-a").await;
        cache.entries.run_pending_tasks().await;
        assert_eq!(cache.disposed_count(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        cache.entries.run_pending_tasks().await;
        assert_eq!(cache.disposed_count(), 2);
        assert_eq!(cache.entry_count(), 0);
    }
}
