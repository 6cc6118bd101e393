//! Cache layer: one in-process tier over two shared tiers.
//!
//! # Tiers
//!
//! - **In process**: the expanded value every reader shares. Concurrent
//!   misses for one key are coalesced into a single load.
//! - **Consistency**: a store every process in the cluster reads and
//!   writes, so one process's fetch serves the whole fleet.
//! - **Fallback**: a durable store read only when the remote source fails,
//!   so an outage never empties the cache.
//!
//! # Example
//!
//! ```ignore
//! let cache = MultiTierCache::new(
//!     loader,
//!     Arc::new(InMemoryCacheBackend::new("consistency")),
//!     Arc::new(LmdbCacheBackend::new("/var/lib/gcmd", 64)?),
//!     CacheConfig::default(),
//! );
//!
//! let value = cache.get(&CacheKey::keywords()).await?;
//! ```

pub mod coalesce;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod multi_tier;
pub mod traits;

pub use coalesce::Coalescer;
pub use key::CacheKey;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use multi_tier::{CacheConfig, MultiTierCache, MultiTierStats, ValueSource};
pub use traits::{
    decode_envelope, encode_envelope, envelope_cached_at, CacheBackend, CacheStats,
    CacheableValue,
};
