//! Keyword Refresh Background Task
//!
//! Periodically downloads the keyword vocabulary again so that every tier
//! of the cache converges on the dictionary service's current content.
//!
//! A failed refresh is logged and counted, never raised: readers keep the
//! index they already have until a later cycle succeeds. Running this task
//! in more than one process is harmless, since each success simply writes an
//! equivalent snapshot to the shared tiers.
//!
//! # Configuration
//!
//! ```rust
//! use gcmd_service::jobs::KeywordRefreshConfig;
//! use std::time::Duration;
//!
//! let config = KeywordRefreshConfig {
//!     interval: Duration::from_secs(4 * 60 * 60), // Every 4 hours
//!     refresh_on_start: true,                     // Refresh immediately
//! };
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcmd_core::GcmdResult;
use gcmd_storage::{CacheBackend, DictionaryClient, KeywordCache};
use tokio::sync::watch;
use tokio::time::{interval_at, MissedTickBehavior};

use crate::constants::{DEFAULT_REFRESH_INTERVAL_SECS, DEFAULT_REFRESH_ON_START};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the keyword refresh background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRefreshConfig {
    /// Time between refreshes (default: 4 hours)
    pub interval: Duration,

    /// Whether to refresh once as soon as the task starts (default: true)
    pub refresh_on_start: bool,
}

impl Default for KeywordRefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            refresh_on_start: DEFAULT_REFRESH_ON_START,
        }
    }
}

// ============================================================================
// TARGET
// ============================================================================

/// What one successful refresh produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub schemes: usize,
    pub entries: usize,
    /// Entries left out of at least one derived index.
    pub skipped: usize,
}

/// Something the refresh task can refresh.
#[async_trait]
pub trait RefreshTarget: Send + Sync + 'static {
    async fn refresh(&self) -> GcmdResult<RefreshSummary>;
}

#[async_trait]
impl<D, C, F> RefreshTarget for KeywordCache<D, C, F>
where
    D: DictionaryClient,
    C: CacheBackend + 'static,
    F: CacheBackend + 'static,
{
    async fn refresh(&self) -> GcmdResult<RefreshSummary> {
        let index = KeywordCache::refresh(self).await?;
        Ok(RefreshSummary {
            schemes: index.snapshot().scheme_count(),
            entries: index.snapshot().entry_count(),
            skipped: index.report().skipped(),
        })
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Metrics for keyword refresh operations.
#[derive(Debug)]
pub struct RefreshMetrics {
    /// Total refresh cycles run
    pub cycles: AtomicU64,

    /// Cycles that replaced the vocabulary
    pub successes: AtomicU64,

    /// Cycles that failed and left the vocabulary as it was
    pub failures: AtomicU64,

    /// Failures since the last success
    pub consecutive_failures: AtomicU64,

    /// Unix millis of the last success, `i64::MIN` if none
    last_success_millis: AtomicI64,
}

impl Default for RefreshMetrics {
    fn default() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success_millis: AtomicI64::new(i64::MIN),
        }
    }
}

impl RefreshMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, at: DateTime<Utc>) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success_millis
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> RefreshSnapshot {
        let millis = self.last_success_millis.load(Ordering::Relaxed);
        RefreshSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_success_at: (millis != i64::MIN)
                .then(|| DateTime::from_timestamp_millis(millis))
                .flatten(),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that periodically refreshes `target`.
///
/// Runs until the shutdown signal is received (or its sender is dropped) and
/// returns the metrics collected during the task's lifetime.
///
/// # Example
///
/// ```ignore
/// use tokio::sync::watch;
///
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(keyword_refresh_task(
///     cache.clone(),
///     KeywordRefreshConfig::default(),
///     shutdown_rx,
/// ));
///
/// // Later, trigger shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn keyword_refresh_task<T: RefreshTarget>(
    target: T,
    config: KeywordRefreshConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshMetrics> {
    let metrics = Arc::new(RefreshMetrics::new());
    run_keyword_refresh(target, config, Arc::clone(&metrics), shutdown_rx).await;
    metrics
}

/// Like [`keyword_refresh_task`], recording into caller-owned metrics so
/// they can be read while the task runs.
pub async fn run_keyword_refresh<T: RefreshTarget>(
    target: T,
    config: KeywordRefreshConfig,
    metrics: Arc<RefreshMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let period = if config.interval.is_zero() {
        tracing::warn!("Refresh interval of zero replaced with the default");
        Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS)
    } else {
        config.interval
    };
    let start = if config.refresh_on_start {
        tokio::time::Instant::now()
    } else {
        tokio::time::Instant::now() + period
    };
    let mut refresh_interval = interval_at(start, period);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = period.as_secs(),
        refresh_on_start = config.refresh_on_start,
        "Keyword refresh task started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Keyword refresh task shutting down");
                    break;
                }
            }

            _ = refresh_interval.tick() => {
                refresh_once(&target, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        successes = snapshot.successes,
        failures = snapshot.failures,
        "Keyword refresh task completed"
    );
}

/// Perform one refresh cycle.
async fn refresh_once<T: RefreshTarget>(target: &T, metrics: &RefreshMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();

    match target.refresh().await {
        Ok(summary) => {
            metrics.record_success(Utc::now());
            if summary.skipped > 0 {
                tracing::warn!(
                    skipped = summary.skipped,
                    "Some keyword entries were left out of derived indices"
                );
            }
            tracing::info!(
                schemes = summary.schemes,
                entries = summary.entries,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Keyword vocabulary refreshed"
            );
        }
        Err(e) => {
            let consecutive_failures = metrics.record_failure();
            tracing::error!(
                error = %e,
                consecutive_failures,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Keyword refresh failed, keeping previous vocabulary"
            );
        }
    }
}
