//! Keyword vocabulary cache.
//!
//! Glues the dictionary service client, the index builder, and the
//! multi-tier cache together: a fetch downloads every configured scheme into
//! one [`VocabularySnapshot`], the shared tiers store that snapshot, and
//! readers get the [`KeywordIndex`] built from it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gcmd_core::{CacheError, GcmdResult, KeywordEntry, RemoteError, Scheme, VocabularySnapshot};
use gcmd_index::{IndexBuilder, KeywordIndex};
use tokio::task::JoinSet;

use crate::cache::{CacheBackend, CacheConfig, CacheKey, MultiTierCache, MultiTierStats, ValueSource};

/// Default bound on fetching one scheme.
pub const DEFAULT_SCHEME_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the remote keyword dictionary service.
#[async_trait]
pub trait DictionaryClient: Send + Sync + 'static {
    /// Fetch every entry of `scheme`, in the service's order.
    async fn fetch_keywords(&self, scheme: Scheme) -> GcmdResult<Vec<KeywordEntry>>;
}

/// [`ValueSource`] that downloads a full vocabulary and builds its index.
pub struct KeywordLoader<D> {
    client: Arc<D>,
    schemes: Vec<Scheme>,
    builder: IndexBuilder,
    scheme_timeout: Duration,
}

impl<D: DictionaryClient> KeywordLoader<D> {
    /// Loader for every known scheme with the built-in index configuration.
    pub fn new(client: Arc<D>) -> Self {
        Self {
            client,
            schemes: Scheme::ALL.to_vec(),
            builder: IndexBuilder::default(),
            scheme_timeout: DEFAULT_SCHEME_TIMEOUT,
        }
    }

    /// Restrict the schemes fetched on each load.
    pub fn with_schemes(mut self, schemes: impl IntoIterator<Item = Scheme>) -> Self {
        let mut schemes: Vec<Scheme> = schemes.into_iter().collect();
        schemes.sort();
        schemes.dedup();
        self.schemes = schemes;
        self
    }

    /// Use a specific index builder.
    pub fn with_builder(mut self, builder: IndexBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Set the per-scheme fetch timeout.
    pub fn with_scheme_timeout(mut self, timeout: Duration) -> Self {
        self.scheme_timeout = timeout;
        self
    }

    pub fn schemes(&self) -> &[Scheme] {
        &self.schemes
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    pub fn client(&self) -> &Arc<D> {
        &self.client
    }

    /// Fetch every configured scheme concurrently. Fails as soon as any one
    /// scheme fails; the remaining fetches are aborted.
    pub async fn fetch_snapshot(&self) -> GcmdResult<VocabularySnapshot> {
        let mut fetches = JoinSet::new();
        for &scheme in &self.schemes {
            let client = Arc::clone(&self.client);
            fetches.spawn(fetch_scheme(client, scheme, self.scheme_timeout));
        }

        let mut schemes = Vec::with_capacity(self.schemes.len());
        while let Some(joined) = fetches.join_next().await {
            let fetched = joined.map_err(|e| CacheError::TaskFailed {
                reason: e.to_string(),
            })?;
            match fetched {
                Ok(pair) => schemes.push(pair),
                Err(e) => {
                    tracing::warn!(error = %e, "Keyword fetch failed");
                    return Err(e);
                }
            }
        }

        let snapshot = VocabularySnapshot::new(Utc::now(), schemes);
        tracing::info!(
            schemes = snapshot.scheme_count(),
            entries = snapshot.entry_count(),
            "Fetched keyword vocabulary"
        );
        Ok(snapshot)
    }
}

async fn fetch_scheme<D: DictionaryClient>(
    client: Arc<D>,
    scheme: Scheme,
    after: Duration,
) -> GcmdResult<(Scheme, Vec<KeywordEntry>)> {
    let entries = tokio::time::timeout(after, client.fetch_keywords(scheme))
        .await
        .map_err(|_| RemoteError::Timeout { scheme, after })??;
    if entries.is_empty() {
        return Err(RemoteError::EmptyResponse { scheme }.into());
    }
    Ok((scheme, entries))
}

#[async_trait]
impl<D: DictionaryClient> ValueSource for KeywordLoader<D> {
    type Stored = VocabularySnapshot;
    type Ready = KeywordIndex;

    async fn fetch(&self, _key: &CacheKey) -> GcmdResult<VocabularySnapshot> {
        self.fetch_snapshot().await
    }

    fn expand(&self, stored: VocabularySnapshot) -> KeywordIndex {
        self.builder.build(stored)
    }
}

/// The keyword index cache a process shares between all of its readers.
///
/// Construct one per process and pass it to whatever needs lookups.
pub struct KeywordCache<D: DictionaryClient, C, F> {
    cache: MultiTierCache<KeywordLoader<D>, C, F>,
    key: CacheKey,
}

impl<D, C, F> Clone for KeywordCache<D, C, F>
where
    D: DictionaryClient,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            key: self.key.clone(),
        }
    }
}

impl<D, C, F> KeywordCache<D, C, F>
where
    D: DictionaryClient,
    C: CacheBackend + 'static,
    F: CacheBackend + 'static,
{
    pub fn new(
        loader: KeywordLoader<D>,
        consistency: Arc<C>,
        fallback: Arc<F>,
        config: CacheConfig,
    ) -> Self {
        Self {
            cache: MultiTierCache::new(loader, consistency, fallback, config),
            key: CacheKey::keywords(),
        }
    }

    /// Store under a different key, e.g. to keep two vocabularies apart in
    /// one set of shared tiers.
    pub fn with_key(mut self, key: CacheKey) -> Self {
        self.key = key;
        self
    }

    /// The current keyword index, loading it on first use.
    ///
    /// # Errors
    ///
    /// Only a cold load can fail, with [`CacheError::FallbackUnavailable`].
    pub async fn get(&self) -> GcmdResult<Arc<KeywordIndex>> {
        self.cache.get(&self.key).await
    }

    /// Download the vocabulary again and replace the index everywhere.
    ///
    /// On failure the previous index stays in place.
    pub async fn refresh(&self) -> GcmdResult<Arc<KeywordIndex>> {
        self.cache.refresh(&self.key).await
    }

    /// The index held in process, if any.
    pub fn peek(&self) -> Option<Arc<KeywordIndex>> {
        self.cache.peek(&self.key)
    }

    /// Drop the in-process index.
    pub fn invalidate_local(&self) -> bool {
        self.cache.invalidate_local(&self.key)
    }

    pub fn stats(&self) -> MultiTierStats {
        self.cache.stats()
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The underlying multi-tier cache.
    pub fn tiers(&self) -> &MultiTierCache<KeywordLoader<D>, C, F> {
        &self.cache
    }
}
