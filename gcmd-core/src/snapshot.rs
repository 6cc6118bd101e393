//! Immutable per-scheme vocabulary as last fetched.

use crate::entry::KeywordEntry;
use crate::scheme::Scheme;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The ordered keyword entries of every fetched scheme.
///
/// Produced whole by one refresh and never patched afterwards. This is the
/// only form of the vocabulary that is persisted; everything derived from it
/// is rebuilt on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularySnapshot {
    fetched_at: DateTime<Utc>,
    schemes: BTreeMap<Scheme, Vec<KeywordEntry>>,
}

impl VocabularySnapshot {
    /// Create a snapshot from fully fetched schemes.
    pub fn new<I>(fetched_at: DateTime<Utc>, schemes: I) -> Self
    where
        I: IntoIterator<Item = (Scheme, Vec<KeywordEntry>)>,
    {
        Self {
            fetched_at,
            schemes: schemes.into_iter().collect(),
        }
    }

    /// When the underlying fetch completed.
    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Entries of one scheme, in delivery order.
    pub fn entries(&self, scheme: Scheme) -> Option<&[KeywordEntry]> {
        self.schemes.get(&scheme).map(Vec::as_slice)
    }

    /// Every scheme present in the snapshot with its entries.
    pub fn schemes(&self) -> impl Iterator<Item = (Scheme, &[KeywordEntry])> {
        self.schemes.iter().map(|(s, e)| (*s, e.as_slice()))
    }

    /// Whether a scheme was fetched.
    pub fn contains(&self, scheme: Scheme) -> bool {
        self.schemes.contains_key(&scheme)
    }

    pub fn scheme_count(&self) -> usize {
        self.schemes.len()
    }

    pub fn entry_count(&self) -> usize {
        self.schemes.values().map(Vec::len).sum()
    }

    /// SHA-256 over the vocabulary content, hex encoded.
    ///
    /// Independent of `fetched_at`: two fetches of unchanged upstream data
    /// have the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (scheme, entries) in &self.schemes {
            hasher.update(scheme.as_str().as_bytes());
            hasher.update([0x1E]);
            for entry in entries {
                hasher.update(entry.uuid().as_bytes());
                hasher.update([0x1F]);
                for (field, value) in entry.fields() {
                    hasher.update(field.as_bytes());
                    hasher.update([0x1F]);
                    hasher.update(value.as_bytes());
                    hasher.update([0x1F]);
                }
                hasher.update([0x1D]);
            }
        }
        hex::encode(hasher.finalize())
    }
}
