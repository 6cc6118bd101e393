//! Per-key single-flight execution.
//!
//! The first caller for a key spawns the work as a detached tokio task and
//! publishes its result through a `watch` channel. Callers that arrive while
//! the work is running subscribe to the same channel instead of starting
//! their own. Dropping a waiting caller never cancels the work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use gcmd_core::{CacheError, GcmdResult};
use tokio::sync::watch;

use super::key::CacheKey;

type Slot<T> = watch::Receiver<Option<GcmdResult<T>>>;

/// Coalesces concurrent computations of the same key.
pub struct Coalescer<T> {
    inflight: Mutex<HashMap<CacheKey, Slot<T>>>,
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `key` unless a run for `key` is already in flight,
    /// in which case wait for that run's result instead.
    ///
    /// `make` is only called by the caller that starts the run, and never
    /// while the registry lock is held.
    pub async fn run<F, Fut>(self: &Arc<Self>, key: &CacheKey, make: F) -> GcmdResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GcmdResult<T>> + Send + 'static,
    {
        let (mut rx, leader) = {
            let mut inflight = self.inflight.lock().map_err(|_| CacheError::LockPoisoned)?;
            // A closed channel means the leader never started its work.
            let joinable = inflight
                .get(key)
                .filter(|rx| rx.has_changed().is_ok())
                .cloned();
            match joinable {
                Some(rx) => {
                    tracing::debug!(key = %key, "Joining in-flight computation");
                    (rx, None)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        if let Some(tx) = leader {
            self.spawn_leader(key.clone(), tx, make());
        }

        let published = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CacheError::TaskFailed {
                reason: format!("computation for {key} ended without a result"),
            })?;
        published.clone().unwrap_or_else(|| {
            Err(CacheError::TaskFailed {
                reason: format!("computation for {key} ended without a result"),
            }
            .into())
        })
    }

    fn spawn_leader<Fut>(
        self: &Arc<Self>,
        key: CacheKey,
        tx: watch::Sender<Option<GcmdResult<T>>>,
        work: Fut,
    ) where
        Fut: Future<Output = GcmdResult<T>> + Send + 'static,
    {
        let this = Arc::clone(self);
        let handle = tokio::spawn(work);
        tokio::spawn(async move {
            let result = handle.await.unwrap_or_else(|e| {
                Err(CacheError::TaskFailed {
                    reason: e.to_string(),
                }
                .into())
            });

            // Unregister and publish under the lock, so a caller either joins
            // this run and sees its result or starts a new run.
            let mut inflight = match this.inflight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            inflight.remove(&key);
            tx.send_replace(Some(result));
        });
    }

    /// Whether a computation for `key` is currently running.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inflight
            .lock()
            .map(|inflight| inflight.contains_key(key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_run() {
        let coalescer = Arc::new(Coalescer::<u64>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::keywords();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let coalescer = Arc::clone(&coalescer);
            let runs = Arc::clone(&runs);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run(&key, move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!coalescer.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_errors_reach_every_waiter() {
        let coalescer = Arc::new(Coalescer::<u64>::new());
        let key = CacheKey::keywords();

        let (a, b) = tokio::join!(
            coalescer.run(&key, || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(CacheError::LockPoisoned.into())
            }),
            coalescer.run(&key, || async { Ok(7) }),
        );

        assert!(a.is_err());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_sequential_runs_are_not_coalesced() {
        let coalescer = Arc::new(Coalescer::<usize>::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::keywords();

        for expected in 1..=3 {
            let runs = Arc::clone(&runs);
            let got = coalescer
                .run(&key, move || async move { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) })
                .await
                .unwrap();
            assert_eq!(got, expected);
        }
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_work() {
        let coalescer = Arc::new(Coalescer::<u64>::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::keywords();

        let flag = Arc::clone(&finished);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            coalescer.run(&key, move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!coalescer.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_make_runs_outside_the_registry_lock() {
        let coalescer = Arc::new(Coalescer::<bool>::new());
        let key = CacheKey::keywords();

        let registry = Arc::clone(&coalescer);
        let lookup = key.clone();
        let registered = coalescer
            .run(&key, move || {
                let registered = registry.is_in_flight(&lookup);
                async move { Ok(registered) }
            })
            .await
            .unwrap();

        assert!(registered);
        assert!(!coalescer.is_in_flight(&key));
    }

    #[tokio::test]
    async fn test_panicking_make_does_not_wedge_the_key() {
        let coalescer = Arc::new(Coalescer::<u64>::new());
        let key = CacheKey::keywords();

        let runner = Arc::clone(&coalescer);
        let first = key.clone();
        let panicked = tokio::spawn(async move {
            runner
                .run(&first, || -> std::future::Ready<GcmdResult<u64>> { panic!("boom") })
                .await
        })
        .await;
        assert!(panicked.is_err());

        let got = coalescer.run(&key, || async { Ok(5) }).await.unwrap();
        assert_eq!(got, 5);
    }

    #[tokio::test]
    async fn test_panicking_work_is_a_task_failure() {
        let coalescer = Arc::new(Coalescer::<u64>::new());
        let result = coalescer
            .run(&CacheKey::keywords(), || async {
                if true {
                    panic!("boom");
                }
                Ok(0)
            })
            .await;
        assert!(matches!(
            result,
            Err(gcmd_core::GcmdError::Cache(CacheError::TaskFailed { .. }))
        ));
    }
}
