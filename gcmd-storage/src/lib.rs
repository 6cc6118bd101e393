//! GCMD Storage - Keyword Cache Tiers
//!
//! The cache that keeps a ready [`KeywordIndex`](gcmd_index::KeywordIndex)
//! in every process while fetching from the dictionary service as rarely as
//! possible and surviving its outages.

pub mod cache;
pub mod keywords;

pub use cache::{
    CacheBackend, CacheConfig, CacheKey, CacheStats, CacheableValue, Coalescer,
    InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError, MultiTierCache, MultiTierStats,
    ValueSource,
};
pub use keywords::{DictionaryClient, KeywordCache, KeywordLoader, DEFAULT_SCHEME_TIMEOUT};
