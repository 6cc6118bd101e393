//! LMDB-backed cache tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a durable,
//! memory-mapped key-value store. This is the fallback tier: it survives
//! restarts and serves the last good vocabulary while the dictionary
//! service is down.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `cached_at`
//! - Write transactions for `put`, `delete`, and `invalidate_namespace`
//! - Statistics are kept behind a lock and never fail an operation
//!
//! Transactions run under `spawn_blocking`, never on a runtime worker.

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcmd_core::{CacheError, GcmdResult};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::key::CacheKey;
use super::traits::{
    decode_envelope, encode_envelope, envelope_cached_at, CacheBackend, CacheStats,
    CacheableValue,
};

/// Tier name reported in logs and errors.
const TIER_NAME: &str = "lmdb";

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for gcmd_core::GcmdError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            tier: TIER_NAME.to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// Durable cache tier stored in an LMDB environment.
///
/// LMDB calls block on disk I/O, so every transaction runs on tokio's
/// blocking pool. A caller that times out stops waiting; the transaction
/// itself still completes.
///
/// # Example
///
/// ```ignore
/// use gcmd_storage::cache::{CacheBackend, CacheKey, LmdbCacheBackend};
///
/// let backend = LmdbCacheBackend::new("/var/lib/gcmd/cache", 64)?;
/// backend.put(&CacheKey::keywords(), &snapshot, Utc::now()).await?;
/// let cached = backend.get::<VocabularySnapshot>(&CacheKey::keywords()).await?;
/// ```
pub struct LmdbCacheBackend {
    store: Arc<LmdbStore>,
    /// Global statistics.
    stats: RwLock<CacheStats>,
}

/// The environment and its single unnamed database.
struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let bytes = self.db.get(&rtxn, key).map_err(txn_err)?;
        Ok(bytes.map(<[u8]>::to_vec))
    }

    /// Store `bytes` under `key`, returning the size of the replaced value.
    fn write(&self, key: &[u8], bytes: &[u8]) -> Result<Option<usize>, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let previous = self.db.get(&wtxn, key).map_err(txn_err)?.map(<[u8]>::len);
        self.db.put(&mut wtxn, key, bytes).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(previous)
    }

    fn delete(&self, key: &[u8]) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    /// Delete every key starting with `prefix` in one write transaction.
    fn delete_prefix(&self, prefix: &[u8]) -> Result<u64, LmdbCacheError> {
        let keys = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let mut keys = Vec::new();
            for result in self.db.iter(&rtxn).map_err(txn_err)? {
                let (key, _) = result.map_err(txn_err)?;
                if key.starts_with(prefix) {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &keys {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }
}

impl LmdbCacheBackend {
    /// Open (or create) an LMDB cache in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process and
        // the memory map is never modified outside of LMDB transactions.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        let entry_count = db.len(&wtxn).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            store: Arc::new(LmdbStore { env, db }),
            stats: RwLock::new(CacheStats {
                entry_count,
                ..CacheStats::default()
            }),
        })
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    /// Run `op` against the store on the blocking pool.
    async fn blocking<R, F>(&self, op: F) -> GcmdResult<R>
    where
        F: FnOnce(&LmdbStore) -> GcmdResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| CacheError::TaskFailed {
                reason: e.to_string(),
            })?
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    fn tier_name(&self) -> &str {
        TIER_NAME
    }

    async fn get<T: CacheableValue>(
        &self,
        key: &CacheKey,
    ) -> GcmdResult<Option<(T, DateTime<Utc>)>> {
        let encoded = key.encode();
        let found = self
            .blocking(move |store| match store.read(&encoded)? {
                Some(bytes) => decode_envelope::<T>(&bytes).map(Some),
                None => Ok(None),
            })
            .await?;

        match found {
            Some(_) => self.bump(|s| s.hits += 1),
            None => self.bump(|s| s.misses += 1),
        }
        Ok(found)
    }

    async fn put<T: CacheableValue>(
        &self,
        key: &CacheKey,
        value: &T,
        cached_at: DateTime<Utc>,
    ) -> GcmdResult<()> {
        let encoded = key.encode();
        let value = value.clone();
        let (previous, written) = self
            .blocking(move |store| {
                let bytes = encode_envelope(&value, cached_at)?;
                let previous = store.write(&encoded, &bytes)?;
                Ok((previous, bytes.len()))
            })
            .await?;

        self.bump(|s| {
            s.writes += 1;
            match previous {
                Some(old) => {
                    s.memory_bytes = s.memory_bytes.saturating_sub(old as u64) + written as u64;
                }
                None => {
                    s.entry_count += 1;
                    s.memory_bytes += written as u64;
                }
            }
        });
        Ok(())
    }

    async fn cached_at(&self, key: &CacheKey) -> GcmdResult<Option<DateTime<Utc>>> {
        let encoded = key.encode();
        self.blocking(move |store| {
            store
                .read(&encoded)?
                .map(|bytes| envelope_cached_at(&bytes))
                .transpose()
        })
        .await
    }

    async fn delete(&self, key: &CacheKey) -> GcmdResult<bool> {
        let encoded = key.encode();
        let deleted = self
            .blocking(move |store| Ok(store.delete(&encoded)?))
            .await?;

        if deleted {
            self.bump(|s| s.entry_count = s.entry_count.saturating_sub(1));
        }
        Ok(deleted)
    }

    async fn invalidate_namespace(&self, namespace: &str) -> GcmdResult<u64> {
        let prefix = CacheKey::namespace_prefix(namespace);
        let deleted = self
            .blocking(move |store| Ok(store.delete_prefix(&prefix)?))
            .await?;

        self.bump(|s| s.entry_count = s.entry_count.saturating_sub(deleted));
        Ok(deleted)
    }

    async fn stats(&self) -> GcmdResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
