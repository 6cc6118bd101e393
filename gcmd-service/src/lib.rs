//! GCMD Service - Keyword Cache Process Wiring
//!
//! Reads configuration from the environment, initialises tracing, opens the
//! cache tiers and runs the periodic refresh job.
//!
//! ```ignore
//! let config = ServiceConfig::try_from_env()?;
//! gcmd_service::telemetry::init_tracing(config.log_json)?;
//!
//! let service = KeywordService::start(client, consistency, &config)?;
//! let index = service.index().await?;
//! let nasa = index.lookup_by_short_name(Scheme::Providers, "nasa");
//!
//! service.shutdown().await?;
//! ```

pub mod config;
pub mod constants;
pub mod jobs;
pub mod service;
pub mod telemetry;

pub use config::ServiceConfig;
pub use jobs::{
    keyword_refresh_task, run_keyword_refresh, KeywordRefreshConfig, RefreshMetrics,
    RefreshSnapshot, RefreshSummary, RefreshTarget,
};
pub use service::{open_keyword_cache, KeywordService, ServiceKeywordCache};
pub use telemetry::init_tracing;
