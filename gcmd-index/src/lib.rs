//! GCMD Index - Derived Keyword Lookups
//!
//! Builds three lookup structures from a [`VocabularySnapshot`]:
//!
//! - a short-name index for schemes with globally unique short names
//! - an external-match index for resolving metadata records by field subset
//! - a location index for free-text location strings
//!
//! Construction is pure and deterministic. [`KeywordIndex::compact`] hands
//! back the snapshot, which is all that needs to be stored; building it
//! again reproduces the same indices.
//!
//! [`VocabularySnapshot`]: gcmd_core::VocabularySnapshot

pub mod builder;
pub mod keyword_index;
pub mod normalize;

pub use builder::{
    build_external_match_index, build_location_index, build_short_name_index, BuildReport,
    ExternalMatchIndex, IndexBuilder, IndexConfig, LocationIndex, ShortNameIndex,
};
pub use keyword_index::KeywordIndex;
pub use normalize::{canonical_field_name, MatchKey};
