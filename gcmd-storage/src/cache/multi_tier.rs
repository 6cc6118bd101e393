//! Three-tier cache with single-flight loading.
//!
//! Reads are served from an in-process tier. Misses are computed once per
//! key no matter how many callers are waiting, by reading (in order) the
//! cluster-wide consistency tier, the remote source, and finally the
//! durable fallback tier. Values fetched from the remote source are written
//! through to both shared tiers.
//!
//! Cold loads and refreshes of one key are mutually exclusive: a cold load
//! that starts while a refresh is running waits for it and takes its value
//! instead of fetching again.
//!
//! The shared tiers store the compact form of a value ([`ValueSource::Stored`]);
//! the in-process tier holds the expanded form ([`ValueSource::Ready`]) that
//! readers actually use.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcmd_core::{CacheError, GcmdError, GcmdResult};

use super::coalesce::Coalescer;
use super::key::CacheKey;
use super::traits::{CacheBackend, CacheableValue};

/// Default bound on one full remote fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(300);
/// Default bound on one fallback tier operation.
pub const DEFAULT_FALLBACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on one consistency tier operation.
pub const DEFAULT_CONSISTENCY_TIMEOUT: Duration = Duration::from_secs(5);
/// Default interval between consistency checks of a warm value.
pub const DEFAULT_CONSISTENCY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the multi-tier cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on one call to [`ValueSource::fetch`].
    pub fetch_timeout: Duration,
    /// Upper bound on one read or write of the fallback tier.
    pub fallback_timeout: Duration,
    /// Upper bound on one read or write of the consistency tier.
    pub consistency_timeout: Duration,
    /// How often a warm value is compared with the consistency tier.
    /// `None` disables the check.
    pub consistency_check_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            fallback_timeout: DEFAULT_FALLBACK_TIMEOUT,
            consistency_timeout: DEFAULT_CONSISTENCY_TIMEOUT,
            consistency_check_interval: Some(DEFAULT_CONSISTENCY_CHECK_INTERVAL),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the remote fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the fallback tier timeout.
    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout = timeout;
        self
    }

    /// Set the consistency tier timeout.
    pub fn with_consistency_timeout(mut self, timeout: Duration) -> Self {
        self.consistency_timeout = timeout;
        self
    }

    /// Set (or disable, with `None`) the consistency check interval.
    pub fn with_consistency_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.consistency_check_interval = interval;
        self
    }
}

/// Where cache values come from.
///
/// `fetch` produces the storable form from the authoritative remote source;
/// `expand` turns it into the form readers use. `expand` must be a pure
/// function of its input.
#[async_trait]
pub trait ValueSource: Send + Sync + 'static {
    /// Compact form kept in the shared tiers.
    type Stored: CacheableValue;
    /// Expanded form kept in process and handed to readers.
    type Ready: Send + Sync + 'static;

    /// Fetch a fresh value from the remote source.
    async fn fetch(&self, key: &CacheKey) -> GcmdResult<Self::Stored>;

    /// Expand a stored value.
    fn expand(&self, stored: Self::Stored) -> Self::Ready;
}

/// Snapshot of cache counters at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiTierStats {
    /// Reads answered by the in-process tier without any I/O.
    pub local_hits: u64,
    /// Reads that found nothing in process.
    pub local_misses: u64,
    /// Cold loads answered by the consistency tier.
    pub consistency_hits: u64,
    /// Warm values replaced by a newer consistency tier value.
    pub consistency_syncs: u64,
    /// Calls to the remote source.
    pub remote_fetches: u64,
    /// Remote calls that failed or timed out.
    pub remote_failures: u64,
    /// Cold loads answered by the fallback tier.
    pub fallback_hits: u64,
    /// Refresh attempts.
    pub refreshes: u64,
    /// Refresh attempts that left the cache unchanged because they failed.
    pub refresh_failures: u64,
    /// Installs that reused the current expanded value because content was
    /// unchanged.
    pub rebuilds_skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    consistency_hits: AtomicU64,
    consistency_syncs: AtomicU64,
    remote_fetches: AtomicU64,
    remote_failures: AtomicU64,
    fallback_hits: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
    rebuilds_skipped: AtomicU64,
}

impl Counters {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MultiTierStats {
        MultiTierStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            local_misses: self.local_misses.load(Ordering::Relaxed),
            consistency_hits: self.consistency_hits.load(Ordering::Relaxed),
            consistency_syncs: self.consistency_syncs.load(Ordering::Relaxed),
            remote_fetches: self.remote_fetches.load(Ordering::Relaxed),
            remote_failures: self.remote_failures.load(Ordering::Relaxed),
            fallback_hits: self.fallback_hits.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            rebuilds_skipped: self.rebuilds_skipped.load(Ordering::Relaxed),
        }
    }
}

/// One in-process value.
struct LocalEntry<R> {
    value: Arc<R>,
    fingerprint: String,
    /// When the value was written to the shared tiers.
    cached_at: DateTime<Utc>,
    /// When the value was last compared with the consistency tier.
    checked_at: Instant,
}

impl<R> Clone for LocalEntry<R> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fingerprint: self.fingerprint.clone(),
            cached_at: self.cached_at,
            checked_at: self.checked_at,
        }
    }
}

struct Inner<S: ValueSource, C, F> {
    source: S,
    consistency: Arc<C>,
    fallback: Arc<F>,
    config: CacheConfig,
    local: RwLock<HashMap<CacheKey, LocalEntry<S::Ready>>>,
    loads: Arc<Coalescer<Arc<S::Ready>>>,
    refreshes: Arc<Coalescer<Arc<S::Ready>>>,
    /// Held by a refresh for its whole run and by a cold load.
    flights: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    counters: Counters,
}

/// Multi-tier cache.
///
/// # Type Parameters
///
/// - `S`: the remote source and expansion step
/// - `C`: the consistency tier, shared by every process in the cluster
/// - `F`: the durable fallback tier
///
/// Cloning is cheap and every clone shares the same tiers.
///
/// # Example
///
/// ```ignore
/// let cache = MultiTierCache::new(loader, consistency, fallback, CacheConfig::default());
///
/// // Cold: one remote fetch however many callers arrive at once
/// let index = cache.get(&CacheKey::keywords()).await?;
///
/// // Periodic: replaces the value only if the fetch succeeds
/// cache.refresh(&CacheKey::keywords()).await?;
/// ```
pub struct MultiTierCache<S: ValueSource, C, F> {
    inner: Arc<Inner<S, C, F>>,
}

impl<S: ValueSource, C, F> Clone for MultiTierCache<S, C, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, C, F> MultiTierCache<S, C, F>
where
    S: ValueSource,
    C: CacheBackend + 'static,
    F: CacheBackend + 'static,
{
    /// Create a cache over the given tiers.
    pub fn new(source: S, consistency: Arc<C>, fallback: Arc<F>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                consistency,
                fallback,
                config,
                local: RwLock::new(HashMap::new()),
                loads: Arc::new(Coalescer::new()),
                refreshes: Arc::new(Coalescer::new()),
                flights: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults(source: S, consistency: Arc<C>, fallback: Arc<F>) -> Self {
        Self::new(source, consistency, fallback, CacheConfig::default())
    }

    /// Get the value for `key`, loading it through the tier chain if needed.
    ///
    /// Once a value is held in process this never fails: remote failures
    /// and shared tier failures only affect cold loads.
    ///
    /// # Errors
    ///
    /// On a cold load, returns [`CacheError::FallbackUnavailable`] when the
    /// remote fetch and the fallback tier both fail.
    pub async fn get(&self, key: &CacheKey) -> GcmdResult<Arc<S::Ready>> {
        match self.inner.local_entry(key) {
            Some(entry) if !self.inner.check_due(&entry) => {
                Counters::incr(&self.inner.counters.local_hits);
                return Ok(entry.value);
            }
            Some(_) => {}
            None => Counters::incr(&self.inner.counters.local_misses),
        }

        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        self.inner
            .loads
            .run(key, move || async move { inner.load(&owned).await })
            .await
    }

    /// Fetch a fresh value for `key` from the remote source and install it in
    /// every tier.
    ///
    /// Concurrent refreshes of one key share a single fetch. The work runs
    /// detached, so abandoning the returned future does not stop it.
    ///
    /// # Errors
    ///
    /// Returns the remote error, or the consistency tier error if the new
    /// value could not be shared. In both cases every tier keeps its
    /// previous value.
    pub async fn refresh(&self, key: &CacheKey) -> GcmdResult<Arc<S::Ready>> {
        let inner = Arc::clone(&self.inner);
        let owned = key.clone();
        self.inner
            .refreshes
            .run(key, move || async move { inner.refresh_now(&owned).await })
            .await
    }

    /// The in-process value for `key`, without loading or checking.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<S::Ready>> {
        self.inner.local_entry(key).map(|entry| entry.value)
    }

    /// Drop the in-process value for `key`. The shared tiers are untouched,
    /// so the next `get` reloads from them. Returns whether a value was held.
    pub fn invalidate_local(&self, key: &CacheKey) -> bool {
        let removed = self
            .inner
            .local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            tracing::info!(key = %key, "Dropped in-process value");
        }
        removed
    }

    /// Current counters.
    pub fn stats(&self) -> MultiTierStats {
        self.inner.counters.snapshot()
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The value source.
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    /// The consistency tier.
    pub fn consistency(&self) -> &C {
        &self.inner.consistency
    }

    /// The fallback tier.
    pub fn fallback(&self) -> &F {
        &self.inner.fallback
    }
}

impl<S, C, F> Inner<S, C, F>
where
    S: ValueSource,
    C: CacheBackend,
    F: CacheBackend,
{
    // Entries are only ever replaced whole, so a poisoned lock still guards
    // a consistent map.
    fn local_entry(&self, key: &CacheKey) -> Option<LocalEntry<S::Ready>> {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn flight(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(flights.entry(key.clone()).or_default())
    }

    fn check_due(&self, entry: &LocalEntry<S::Ready>) -> bool {
        self.config
            .consistency_check_interval
            .is_some_and(|interval| entry.checked_at.elapsed() >= interval)
    }

    /// Body of a coalesced `get`.
    async fn load(&self, key: &CacheKey) -> GcmdResult<Arc<S::Ready>> {
        // Another load may have finished between the caller's check and
        // this run starting.
        match self.local_entry(key) {
            Some(entry) if !self.check_due(&entry) => Ok(entry.value),
            Some(entry) => Ok(self.sync_with_consistency(key, entry).await),
            None => {
                let flight = self.flight(key);
                let _flight = flight.lock().await;
                // A refresh may have installed a value while this waited.
                match self.local_entry(key) {
                    Some(entry) => Ok(entry.value),
                    None => self.cold_load(key).await,
                }
            }
        }
    }

    async fn cold_load(&self, key: &CacheKey) -> GcmdResult<Arc<S::Ready>> {
        match self.read_consistency(key).await {
            Ok(Some((stored, cached_at))) => {
                Counters::incr(&self.counters.consistency_hits);
                tracing::debug!(key = %key, %cached_at, "Loaded value from consistency tier");
                return Ok(self.install(key, stored, cached_at));
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Consistency tier read failed");
            }
        }

        let remote_err = match self.fetch_remote(key).await {
            Ok(stored) => {
                let cached_at = Utc::now();
                if let Err(e) = self.write_consistency(key, &stored, cached_at).await {
                    tracing::warn!(key = %key, error = %e, "Failed to share loaded value");
                }
                self.write_fallback(key, &stored, cached_at).await;
                return Ok(self.install(key, stored, cached_at));
            }
            Err(e) => e,
        };

        tracing::warn!(key = %key, error = %remote_err, "Remote fetch failed, reading fallback tier");
        let reason = match self.read_fallback(key).await {
            Ok(Some((stored, cached_at))) => {
                Counters::incr(&self.counters.fallback_hits);
                tracing::warn!(key = %key, %cached_at, "Serving value from fallback tier");
                return Ok(self.install(key, stored, cached_at));
            }
            Ok(None) => format!("remote fetch failed ({remote_err}) and fallback tier is empty"),
            Err(e) => format!("remote fetch failed ({remote_err}) and fallback read failed ({e})"),
        };

        Err(CacheError::FallbackUnavailable {
            key: key.to_string(),
            reason,
        }
        .into())
    }

    /// Compare a warm value with the consistency tier and adopt a newer one.
    /// Failures keep the current value.
    async fn sync_with_consistency(
        &self,
        key: &CacheKey,
        current: LocalEntry<S::Ready>,
    ) -> Arc<S::Ready> {
        match self.consistency_cached_at(key).await {
            Ok(Some(shared_at)) if shared_at > current.cached_at => {
                match self.read_consistency(key).await {
                    Ok(Some((stored, cached_at))) => {
                        Counters::incr(&self.counters.consistency_syncs);
                        tracing::debug!(
                            key = %key,
                            local_cached_at = %current.cached_at,
                            %cached_at,
                            "Adopting newer value from consistency tier"
                        );
                        return self.install(key, stored, cached_at);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Consistency sync read failed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Consistency check failed");
            }
        }

        if let Some(entry) = self
            .local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            entry.checked_at = Instant::now();
        }
        current.value
    }

    async fn refresh_now(&self, key: &CacheKey) -> GcmdResult<Arc<S::Ready>> {
        let flight = self.flight(key);
        let _flight = flight.lock().await;

        Counters::incr(&self.counters.refreshes);
        let started = Instant::now();

        let stored = match self.fetch_remote(key).await {
            Ok(stored) => stored,
            Err(e) => {
                Counters::incr(&self.counters.refresh_failures);
                return Err(e);
            }
        };

        let cached_at = Utc::now();
        if let Err(e) = self.write_consistency(key, &stored, cached_at).await {
            Counters::incr(&self.counters.refresh_failures);
            return Err(e);
        }
        self.write_fallback(key, &stored, cached_at).await;

        let value = self.install(key, stored, cached_at);
        tracing::debug!(
            key = %key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refreshed value"
        );
        Ok(value)
    }

    /// Put a stored value in process. Reuses the current expanded value when
    /// the content is unchanged, and never replaces a value with an older one.
    fn install(&self, key: &CacheKey, stored: S::Stored, cached_at: DateTime<Utc>) -> Arc<S::Ready> {
        let fingerprint = stored.fingerprint();

        let reusable = match self.local_entry(key) {
            Some(current) if current.cached_at > cached_at => {
                tracing::debug!(key = %key, "Kept newer in-process value");
                return current.value;
            }
            Some(current) if current.fingerprint == fingerprint => Some(current.value),
            _ => None,
        };
        let value = match reusable {
            Some(value) => {
                Counters::incr(&self.counters.rebuilds_skipped);
                value
            }
            None => Arc::new(self.source.expand(stored)),
        };

        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.clone(),
                LocalEntry {
                    value: Arc::clone(&value),
                    fingerprint,
                    cached_at,
                    checked_at: Instant::now(),
                },
            );
        value
    }

    async fn fetch_remote(&self, key: &CacheKey) -> GcmdResult<S::Stored> {
        Counters::incr(&self.counters.remote_fetches);
        let result = bounded("remote", self.config.fetch_timeout, self.source.fetch(key)).await;
        if result.is_err() {
            Counters::incr(&self.counters.remote_failures);
        }
        result
    }

    async fn read_consistency(
        &self,
        key: &CacheKey,
    ) -> GcmdResult<Option<(S::Stored, DateTime<Utc>)>> {
        bounded(
            self.consistency.tier_name(),
            self.config.consistency_timeout,
            self.consistency.get(key),
        )
        .await
    }

    async fn consistency_cached_at(&self, key: &CacheKey) -> GcmdResult<Option<DateTime<Utc>>> {
        bounded(
            self.consistency.tier_name(),
            self.config.consistency_timeout,
            self.consistency.cached_at(key),
        )
        .await
    }

    async fn write_consistency(
        &self,
        key: &CacheKey,
        stored: &S::Stored,
        cached_at: DateTime<Utc>,
    ) -> GcmdResult<()> {
        bounded(
            self.consistency.tier_name(),
            self.config.consistency_timeout,
            self.consistency.put(key, stored, cached_at),
        )
        .await
    }

    async fn read_fallback(&self, key: &CacheKey) -> GcmdResult<Option<(S::Stored, DateTime<Utc>)>> {
        bounded(
            self.fallback.tier_name(),
            self.config.fallback_timeout,
            self.fallback.get(key),
        )
        .await
    }

    /// Fallback writes are best effort.
    async fn write_fallback(&self, key: &CacheKey, stored: &S::Stored, cached_at: DateTime<Utc>) {
        let result = bounded(
            self.fallback.tier_name(),
            self.config.fallback_timeout,
            self.fallback.put(key, stored, cached_at),
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Failed to write fallback tier");
        }
    }
}

async fn bounded<T>(
    tier: &str,
    after: Duration,
    fut: impl Future<Output = GcmdResult<T>>,
) -> GcmdResult<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(GcmdError::from(CacheError::Timeout {
            tier: tier.to_string(),
            after,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        version: u32,
    }

    impl CacheableValue for Doc {
        fn fingerprint(&self) -> String {
            self.version.to_string()
        }
    }

    /// Serves `next` (or fails when it is `None`) and counts calls.
    #[derive(Default)]
    struct ScriptedSource {
        next: Mutex<Option<u32>>,
        fetches: AtomicUsize,
        expansions: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedSource {
        fn serving(version: u32) -> Self {
            Self {
                next: Mutex::new(Some(version)),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self::default()
        }

        fn set(&self, next: Option<u32>) {
            *self.next.lock().unwrap() = next;
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ValueSource for ScriptedSource {
        type Stored = Doc;
        type Ready = String;

        async fn fetch(&self, _key: &CacheKey) -> GcmdResult<Doc> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = *self.next.lock().unwrap();
            next.map(|version| Doc { version }).ok_or_else(|| {
                gcmd_core::RemoteError::Unavailable {
                    scheme: gcmd_core::Scheme::Providers,
                    reason: "scripted outage".to_string(),
                }
                .into()
            })
        }

        fn expand(&self, stored: Doc) -> String {
            self.expansions.fetch_add(1, Ordering::SeqCst);
            format!("v{}", stored.version)
        }
    }

    type TestCache = MultiTierCache<ScriptedSource, InMemoryCacheBackend, InMemoryCacheBackend>;

    fn cache_with(source: ScriptedSource, config: CacheConfig) -> TestCache {
        MultiTierCache::new(
            source,
            Arc::new(InMemoryCacheBackend::new("consistency")),
            Arc::new(InMemoryCacheBackend::new("fallback")),
            config,
        )
    }

    fn key() -> CacheKey {
        CacheKey::keywords()
    }

    #[tokio::test]
    async fn test_cold_get_fetches_and_writes_through() {
        let cache = cache_with(ScriptedSource::serving(1), CacheConfig::default());

        assert_eq!(*cache.get(&key()).await.unwrap(), "v1");
        assert_eq!(cache.source().fetches(), 1);

        let shared: Option<(Doc, _)> = cache.consistency().get(&key()).await.unwrap();
        let durable: Option<(Doc, _)> = cache.fallback().get(&key()).await.unwrap();
        assert_eq!(shared.unwrap().0, Doc { version: 1 });
        assert_eq!(durable.unwrap().0, Doc { version: 1 });
    }

    #[tokio::test]
    async fn test_warm_get_makes_no_remote_call() {
        let cache = cache_with(ScriptedSource::serving(1), CacheConfig::default());
        cache.get(&key()).await.unwrap();
        cache.source().set(None);

        for _ in 0..5 {
            assert_eq!(*cache.get(&key()).await.unwrap(), "v1");
        }
        assert_eq!(cache.source().fetches(), 1);
        assert_eq!(cache.stats().local_hits, 5);
    }

    #[tokio::test]
    async fn test_cold_get_prefers_consistency_tier() {
        let cache = cache_with(ScriptedSource::serving(2), CacheConfig::default());
        cache
            .consistency()
            .put(&key(), &Doc { version: 1 }, Utc::now())
            .await
            .unwrap();

        assert_eq!(*cache.get(&key()).await.unwrap(), "v1");
        assert_eq!(cache.source().fetches(), 0);
        assert_eq!(cache.stats().consistency_hits, 1);
    }

    #[tokio::test]
    async fn test_outage_serves_fallback_without_sharing_it() {
        let cache = cache_with(ScriptedSource::failing(), CacheConfig::default());
        cache
            .fallback()
            .put(&key(), &Doc { version: 3 }, Utc::now())
            .await
            .unwrap();

        assert_eq!(*cache.get(&key()).await.unwrap(), "v3");
        assert_eq!(cache.stats().fallback_hits, 1);

        let shared: Option<(Doc, _)> = cache.consistency().get(&key()).await.unwrap();
        assert!(shared.is_none());
    }

    #[tokio::test]
    async fn test_outage_with_empty_fallback_is_fallback_unavailable() {
        let cache = cache_with(ScriptedSource::failing(), CacheConfig::default());

        let err = cache.get(&key()).await.unwrap_err();
        match err {
            GcmdError::Cache(CacheError::FallbackUnavailable { key, reason }) => {
                assert_eq!(key, "kms:keywords");
                assert!(reason.contains("scripted outage"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(cache.peek(&key()).is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_every_tier_untouched() {
        let cache = cache_with(ScriptedSource::serving(1), CacheConfig::default());
        let before = cache.get(&key()).await.unwrap();
        let shared_before = cache.consistency().cached_at(&key()).await.unwrap();

        cache.source().set(None);
        assert!(cache.refresh(&key()).await.is_err());

        let after = cache.get(&key()).await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(
            cache.consistency().cached_at(&key()).await.unwrap(),
            shared_before
        );
        let stats = cache.stats();
        assert_eq!(stats.refreshes, 1);
        assert_eq!(stats.refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_value() {
        let cache = cache_with(ScriptedSource::serving(1), CacheConfig::default());
        cache.get(&key()).await.unwrap();

        cache.source().set(Some(2));
        assert_eq!(*cache.refresh(&key()).await.unwrap(), "v2");
        assert_eq!(*cache.get(&key()).await.unwrap(), "v2");

        let durable: Option<(Doc, _)> = cache.fallback().get(&key()).await.unwrap();
        assert_eq!(durable.unwrap().0, Doc { version: 2 });
    }

    #[tokio::test]
    async fn test_unchanged_refresh_reuses_expanded_value() {
        let cache = cache_with(ScriptedSource::serving(1), CacheConfig::default());
        let first = cache.get(&key()).await.unwrap();
        let refreshed = cache.refresh(&key()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &refreshed));
        assert_eq!(cache.source().expansions.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().rebuilds_skipped, 1);
    }

    #[tokio::test]
    async fn test_warm_process_adopts_newer_shared_value() {
        let consistency = Arc::new(InMemoryCacheBackend::new("consistency"));
        let config = CacheConfig::default().with_consistency_check_interval(Some(Duration::ZERO));
        let writer = MultiTierCache::new(
            ScriptedSource::serving(1),
            Arc::clone(&consistency),
            Arc::new(InMemoryCacheBackend::new("fallback-a")),
            config.clone(),
        );
        let reader = MultiTierCache::new(
            ScriptedSource::failing(),
            Arc::clone(&consistency),
            Arc::new(InMemoryCacheBackend::new("fallback-b")),
            config,
        );

        writer.get(&key()).await.unwrap();
        assert_eq!(*reader.get(&key()).await.unwrap(), "v1");

        // Distinct millisecond timestamps
        tokio::time::sleep(Duration::from_millis(5)).await;
        writer.source().set(Some(2));
        writer.refresh(&key()).await.unwrap();

        assert_eq!(*reader.get(&key()).await.unwrap(), "v2");
        assert_eq!(reader.source().fetches(), 0);
        assert_eq!(reader.stats().consistency_syncs, 1);
    }

    #[tokio::test]
    async fn test_disabled_check_keeps_local_value() {
        let consistency = Arc::new(InMemoryCacheBackend::new("consistency"));
        let config = CacheConfig::default().with_consistency_check_interval(None);
        let cache = MultiTierCache::new(
            ScriptedSource::serving(1),
            Arc::clone(&consistency),
            Arc::new(InMemoryCacheBackend::new("fallback")),
            config,
        );
        cache.get(&key()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        consistency
            .put(&key(), &Doc { version: 9 }, Utc::now())
            .await
            .unwrap();

        assert_eq!(*cache.get(&key()).await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_invalidate_local_rereads_shared_tiers() {
        let cache = cache_with(ScriptedSource::serving(1), CacheConfig::default());
        cache.get(&key()).await.unwrap();

        assert!(cache.invalidate_local(&key()));
        assert!(!cache.invalidate_local(&key()));
        assert!(cache.peek(&key()).is_none());

        assert_eq!(*cache.get(&key()).await.unwrap(), "v1");
        assert_eq!(cache.source().fetches(), 1);
        assert_eq!(cache.stats().consistency_hits, 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout_counts_as_remote_failure() {
        let source = ScriptedSource {
            delay: Duration::from_millis(200),
            ..ScriptedSource::serving(1)
        };
        let config = CacheConfig::default().with_fetch_timeout(Duration::from_millis(20));
        let cache = cache_with(source, config);

        let err = cache.get(&key()).await.unwrap_err();
        assert!(matches!(
            err,
            GcmdError::Cache(CacheError::FallbackUnavailable { .. })
        ));
        assert_eq!(cache.stats().remote_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_gets_fetch_once() {
        let source = ScriptedSource {
            delay: Duration::from_millis(100),
            ..ScriptedSource::serving(1)
        };
        let cache = cache_with(source, CacheConfig::default());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(&key()).await }));
        }
        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), "v1");
        }
        assert_eq!(cache.source().fetches(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cold_get_during_refresh_takes_refreshed_value() {
        let source = ScriptedSource {
            delay: Duration::from_millis(200),
            ..ScriptedSource::serving(1)
        };
        let cache = cache_with(source, CacheConfig::default());

        let refresher = cache.clone();
        let refresh = tokio::spawn(async move { refresher.refresh(&key()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let got = cache.get(&key()).await.unwrap();
        let refreshed = refresh.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&got, &refreshed));
        assert_eq!(cache.source().fetches(), 1);
        assert_eq!(cache.stats().consistency_hits, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cold_get_after_failed_refresh_loads_itself() {
        let source = ScriptedSource {
            delay: Duration::from_millis(100),
            ..ScriptedSource::failing()
        };
        let cache = cache_with(source, CacheConfig::default());
        cache
            .fallback()
            .put(&key(), &Doc { version: 4 }, Utc::now())
            .await
            .unwrap();

        let refresher = cache.clone();
        let refresh = tokio::spawn(async move { refresher.refresh(&key()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*cache.get(&key()).await.unwrap(), "v4");
        assert!(refresh.await.unwrap().is_err());
        assert_eq!(cache.source().fetches(), 2);
        assert_eq!(cache.stats().fallback_hits, 1);
    }
}
