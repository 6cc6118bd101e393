//! Background Jobs for the keyword service
//!
//! - `keyword_refresh`: Periodically refreshes the keyword vocabulary
//!
//! # Usage
//!
//! ```ignore
//! use gcmd_service::jobs::{keyword_refresh_task, KeywordRefreshConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(keyword_refresh_task(cache.clone(), KeywordRefreshConfig::default(), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

pub mod keyword_refresh;

pub use keyword_refresh::{
    keyword_refresh_task, run_keyword_refresh, KeywordRefreshConfig, RefreshMetrics,
    RefreshSnapshot, RefreshSummary, RefreshTarget,
};
