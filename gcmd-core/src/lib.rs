//! GCMD Core - Vocabulary Types
//!
//! Pure data structures with no behavior. All other crates depend on this.
//! The static per-scheme indexing configuration and the location override
//! table live here too, since both are read-only process-wide data.

pub mod entry;
pub mod error;
pub mod overrides;
pub mod scheme;
pub mod snapshot;

pub use entry::KeywordEntry;
pub use error::{CacheError, ConfigError, EntryError, GcmdError, GcmdResult, RemoteError};
pub use overrides::LocationOverrides;
pub use scheme::{resolve_field_alias, Scheme, FIELD_ALIASES, SHORT_NAME_FIELD, UUID_FIELD};
pub use snapshot::VocabularySnapshot;
