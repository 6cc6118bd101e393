//! Error types for GCMD keyword operations

use crate::Scheme;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the remote dictionary service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Dictionary service unavailable for {scheme}: {reason}")]
    Unavailable { scheme: Scheme, reason: String },

    #[error("Dictionary fetch for {scheme} timed out after {after:?}")]
    Timeout { scheme: Scheme, after: Duration },

    #[error("Dictionary service returned no entries for {scheme}")]
    EmptyResponse { scheme: Scheme },
}

/// An upstream entry that cannot take part in one of the derived indices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("Keyword entry has no uuid")]
    MissingUuid,

    #[error("Keyword entry {uuid} in {scheme} is missing required field {field}")]
    MissingField {
        scheme: Scheme,
        uuid: String,
        field: String,
    },
}

/// Cache tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("No value for {key}: remote fetch failed and fallback tier is unavailable: {reason}")]
    FallbackUnavailable { key: String, reason: String },

    #[error("{tier} tier failed: {reason}")]
    Backend { tier: String, reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("{tier} tier timed out after {after:?}")]
    Timeout { tier: String, after: Duration },

    #[error("Cache load task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown keyword scheme: {name}")]
    UnknownScheme { name: String },

    #[error("Cannot load location overrides from {path}: {reason}")]
    OverrideFile { path: String, reason: String },
}

/// Master error type for all GCMD keyword errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GcmdError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Entry error: {0}")]
    Entry(#[from] EntryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl GcmdError {
    /// True when the dictionary service itself could not be reached.
    pub fn is_remote(&self) -> bool {
        matches!(self, GcmdError::Remote(_))
    }
}

/// Result type alias for GCMD keyword operations.
pub type GcmdResult<T> = Result<T, GcmdError>;

// =============================================================================
// TESTS
// =============================================================================
