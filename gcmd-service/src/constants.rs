//! Constants for the GCMD keyword service
//!
//! Defaults for everything [`ServiceConfig`](crate::ServiceConfig) reads from
//! the environment. Cache tier timeouts default to the values in
//! `gcmd_storage::cache::multi_tier`.

// ============================================================================
// REFRESH
// ============================================================================

/// Default interval between vocabulary refreshes in seconds (4 hours)
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 4 * 60 * 60;

/// Whether the refresh job refreshes once as soon as it starts
pub const DEFAULT_REFRESH_ON_START: bool = true;

// ============================================================================
// FALLBACK TIER
// ============================================================================

/// Default directory of the LMDB fallback tier
pub const DEFAULT_FALLBACK_PATH: &str = "./data/gcmd-keyword-cache";

/// Default LMDB map size in megabytes
pub const DEFAULT_FALLBACK_MAX_SIZE_MB: usize = 256;

// ============================================================================
// LOGGING
// ============================================================================

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "gcmd_service=info,gcmd_storage=info,warn";
