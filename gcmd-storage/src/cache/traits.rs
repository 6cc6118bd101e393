//! Cache backend traits and cacheable value marker.
//!
//! This module defines the traits that must be implemented by cache
//! backends and by values that can be stored in them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcmd_core::{CacheError, GcmdResult, VocabularySnapshot};
use serde::{de::DeserializeOwned, Serialize};

use super::key::CacheKey;

/// Marker trait for types that can be stored in a shared cache tier.
///
/// # Implementation Requirements
///
/// - `fingerprint()` must be equal for values that are interchangeable and
///   should differ otherwise; the cache uses it to skip redundant rebuilds
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned`
///   since shared tiers hold bytes, not objects
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait CacheableValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Content fingerprint of this value.
    fn fingerprint(&self) -> String;
}

impl CacheableValue for VocabularySnapshot {
    fn fingerprint(&self) -> String {
        VocabularySnapshot::fingerprint(self)
    }
}

/// Cache backend trait for pluggable tier implementations.
///
/// This trait abstracts over the consistency tier (a store every process in
/// the cluster sees) and the durable fallback tier. Implementations must be
/// thread-safe and support concurrent access.
///
/// # Serialization
///
/// Values are stored as an [envelope](encode_envelope): the write timestamp
/// followed by the JSON form of the value, so `cached_at` can be read
/// without decoding the value.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short tier name for logs and errors.
    fn tier_name(&self) -> &str;

    /// Get a value and when it was written, or `None` if absent.
    async fn get<T: CacheableValue>(
        &self,
        key: &CacheKey,
    ) -> GcmdResult<Option<(T, DateTime<Utc>)>>;

    /// Store a value, replacing any previous one.
    async fn put<T: CacheableValue>(
        &self,
        key: &CacheKey,
        value: &T,
        cached_at: DateTime<Utc>,
    ) -> GcmdResult<()>;

    /// When the value under `key` was written, without decoding it.
    async fn cached_at(&self, key: &CacheKey) -> GcmdResult<Option<DateTime<Utc>>>;

    /// Delete a value. Returns whether one was present.
    async fn delete(&self, key: &CacheKey) -> GcmdResult<bool>;

    /// Delete every value in a namespace. Returns how many were removed.
    async fn invalidate_namespace(&self, namespace: &str) -> GcmdResult<u64>;

    /// Get cache statistics.
    async fn stats(&self) -> GcmdResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate size of stored values in bytes.
    pub memory_bytes: u64,
    /// Number of writes.
    pub writes: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// Length of the timestamp header.
const TIMESTAMP_LEN: usize = 8;

/// Encode `[timestamp millis: 8 bytes LE][json value]`.
pub fn encode_envelope<T: Serialize>(value: &T, cached_at: DateTime<Utc>) -> GcmdResult<Vec<u8>> {
    let value_bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + value_bytes.len());
    bytes.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&value_bytes);
    Ok(bytes)
}

/// Read only the timestamp header of an envelope.
pub fn envelope_cached_at(bytes: &[u8]) -> GcmdResult<DateTime<Utc>> {
    let header: [u8; TIMESTAMP_LEN] = bytes
        .get(..TIMESTAMP_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| CacheError::Serialization {
            reason: "envelope shorter than timestamp header".to_string(),
        })?;
    DateTime::from_timestamp_millis(i64::from_le_bytes(header)).ok_or_else(|| {
        CacheError::Serialization {
            reason: "envelope timestamp out of range".to_string(),
        }
        .into()
    })
}

/// Decode a full envelope.
pub fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> GcmdResult<(T, DateTime<Utc>)> {
    let cached_at = envelope_cached_at(bytes)?;
    let value = serde_json::from_slice(&bytes[TIMESTAMP_LEN..]).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;
    Ok((value, cached_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcmd_core::{KeywordEntry, Scheme};

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_envelope_preserves_value_and_millis() {
        let snapshot = VocabularySnapshot::new(
            Utc::now(),
            [(
                Scheme::Providers,
                vec![KeywordEntry::new("1", [("short-name", "NASA")])],
            )],
        );
        let cached_at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let bytes = encode_envelope(&snapshot, cached_at).unwrap();

        assert_eq!(envelope_cached_at(&bytes).unwrap(), cached_at);
        let (decoded, at): (VocabularySnapshot, _) = decode_envelope(&bytes).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(at, cached_at);
    }

    #[test]
    fn test_short_envelope_is_a_serialization_error() {
        let err = envelope_cached_at(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            gcmd_core::GcmdError::Cache(CacheError::Serialization { .. })
        ));
    }

    #[test]
    fn test_snapshot_fingerprint_is_the_cacheable_fingerprint() {
        let snapshot = VocabularySnapshot::new(Utc::now(), []);
        assert_eq!(
            CacheableValue::fingerprint(&snapshot),
            snapshot.fingerprint()
        );
    }
}
