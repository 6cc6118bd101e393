//! In-memory cache tier.
//!
//! Holds encoded envelopes rather than live objects, so a single instance
//! shared behind an `Arc` behaves like an external shared store: every
//! reader decodes its own copy and sees the same write timestamps.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcmd_core::{CacheError, GcmdResult};

use super::key::CacheKey;
use super::traits::{
    decode_envelope, encode_envelope, envelope_cached_at, CacheBackend, CacheStats,
    CacheableValue,
};

/// Cache tier backed by a process-local map.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    name: String,
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            f(&mut stats);
        }
    }

    fn raw(&self, key: &CacheKey) -> GcmdResult<Option<Vec<u8>>> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(entries.get(&key.encode()).cloned())
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    fn tier_name(&self) -> &str {
        &self.name
    }

    async fn get<T: CacheableValue>(
        &self,
        key: &CacheKey,
    ) -> GcmdResult<Option<(T, DateTime<Utc>)>> {
        match self.raw(key)? {
            Some(bytes) => {
                self.bump(|s| s.hits += 1);
                decode_envelope(&bytes).map(Some)
            }
            None => {
                self.bump(|s| s.misses += 1);
                Ok(None)
            }
        }
    }

    async fn put<T: CacheableValue>(
        &self,
        key: &CacheKey,
        value: &T,
        cached_at: DateTime<Utc>,
    ) -> GcmdResult<()> {
        let bytes = encode_envelope(value, cached_at)?;
        let size = bytes.len() as u64;

        let previous = {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            entries.insert(key.encode(), bytes)
        };

        self.bump(|s| {
            s.writes += 1;
            match &previous {
                Some(old) => {
                    s.memory_bytes = s.memory_bytes.saturating_sub(old.len() as u64) + size;
                }
                None => {
                    s.entry_count += 1;
                    s.memory_bytes += size;
                }
            }
        });
        Ok(())
    }

    async fn cached_at(&self, key: &CacheKey) -> GcmdResult<Option<DateTime<Utc>>> {
        self.raw(key)?
            .map(|bytes| envelope_cached_at(&bytes))
            .transpose()
    }

    async fn delete(&self, key: &CacheKey) -> GcmdResult<bool> {
        let removed = {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            entries.remove(&key.encode())
        };

        if let Some(old) = &removed {
            self.bump(|s| {
                s.entry_count = s.entry_count.saturating_sub(1);
                s.memory_bytes = s.memory_bytes.saturating_sub(old.len() as u64);
            });
        }
        Ok(removed.is_some())
    }

    async fn invalidate_namespace(&self, namespace: &str) -> GcmdResult<u64> {
        let prefix = CacheKey::namespace_prefix(namespace);
        let (deleted, freed) = {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            let before = entries.len();
            let mut freed = 0u64;
            entries.retain(|k, v| {
                let keep = !k.starts_with(&prefix);
                if !keep {
                    freed += v.len() as u64;
                }
                keep
            });
            ((before - entries.len()) as u64, freed)
        };

        self.bump(|s| {
            s.entry_count = s.entry_count.saturating_sub(deleted);
            s.memory_bytes = s.memory_bytes.saturating_sub(freed);
        });
        Ok(deleted)
    }

    async fn stats(&self) -> GcmdResult<CacheStats> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
