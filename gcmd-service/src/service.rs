//! Process-level assembly of the keyword cache.

use std::sync::Arc;

use gcmd_core::{CacheError, GcmdResult};
use gcmd_index::{IndexBuilder, KeywordIndex};
use gcmd_storage::{CacheBackend, DictionaryClient, KeywordCache, KeywordLoader, LmdbCacheBackend};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::jobs::{run_keyword_refresh, RefreshMetrics, RefreshSnapshot};

/// Keyword cache whose fallback tier is an LMDB environment.
pub type ServiceKeywordCache<D, C> = KeywordCache<D, C, LmdbCacheBackend>;

/// Build the keyword cache described by `config`, opening the LMDB fallback
/// tier at `config.fallback_path`.
pub fn open_keyword_cache<D, C>(
    client: Arc<D>,
    consistency: Arc<C>,
    config: &ServiceConfig,
) -> GcmdResult<ServiceKeywordCache<D, C>>
where
    D: DictionaryClient,
    C: CacheBackend + 'static,
{
    let fallback = LmdbCacheBackend::new(&config.fallback_path, config.fallback_max_size_mb)?;
    let loader = KeywordLoader::new(client)
        .with_schemes(config.schemes.iter().copied())
        .with_builder(IndexBuilder::new(config.index.clone()))
        .with_scheme_timeout(config.scheme_timeout);

    Ok(KeywordCache::new(
        loader,
        consistency,
        Arc::new(fallback),
        config.cache.clone(),
    ))
}

/// A running keyword cache plus its refresh job.
///
/// Construct once per process (inside a tokio runtime) and hand
/// [`cache`](Self::cache) clones to whatever needs lookups.
pub struct KeywordService<D: DictionaryClient, C: CacheBackend + 'static> {
    cache: ServiceKeywordCache<D, C>,
    metrics: Arc<RefreshMetrics>,
    shutdown_tx: watch::Sender<bool>,
    refresh_job: JoinHandle<()>,
}

impl<D, C> KeywordService<D, C>
where
    D: DictionaryClient,
    C: CacheBackend + 'static,
{
    /// Open the cache and spawn the refresh job.
    ///
    /// # Errors
    ///
    /// Fails if the fallback tier cannot be opened.
    pub fn start(client: Arc<D>, consistency: Arc<C>, config: &ServiceConfig) -> GcmdResult<Self> {
        let cache = open_keyword_cache(client, consistency, config)?;
        let metrics = Arc::new(RefreshMetrics::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let refresh_job = tokio::spawn(run_keyword_refresh(
            cache.clone(),
            config.refresh.clone(),
            Arc::clone(&metrics),
            shutdown_rx,
        ));

        tracing::info!(
            fallback_path = %config.fallback_path.display(),
            schemes = config.schemes.len(),
            "Keyword service started"
        );

        Ok(Self {
            cache,
            metrics,
            shutdown_tx,
            refresh_job,
        })
    }

    /// The shared keyword cache.
    pub fn cache(&self) -> &ServiceKeywordCache<D, C> {
        &self.cache
    }

    /// Shortcut for `self.cache().get()`.
    pub async fn index(&self) -> GcmdResult<Arc<KeywordIndex>> {
        self.cache.get().await
    }

    /// Refresh job metrics so far.
    pub fn refresh_metrics(&self) -> RefreshSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the refresh job and wait for it to finish.
    pub async fn shutdown(self) -> GcmdResult<RefreshSnapshot> {
        let _ = self.shutdown_tx.send(true);
        self.refresh_job.await.map_err(|e| CacheError::TaskFailed {
            reason: e.to_string(),
        })?;
        tracing::info!("Keyword service stopped");
        Ok(self.metrics.snapshot())
    }
}
