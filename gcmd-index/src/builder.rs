//! Derived index construction.
//!
//! Every function here is pure: the same snapshot and configuration always
//! produce the same indices. Entries that cannot take part in an index are
//! skipped with a warning instead of failing the build.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use gcmd_core::{EntryError, KeywordEntry, LocationOverrides, Scheme, VocabularySnapshot, SHORT_NAME_FIELD};

use crate::keyword_index::KeywordIndex;
use crate::normalize::MatchKey;

/// `scheme → (lower-cased short name → entry)`.
pub type ShortNameIndex = HashMap<Scheme, HashMap<String, KeywordEntry>>;

/// `scheme → (normalised field subset → entry)`.
pub type ExternalMatchIndex = HashMap<Scheme, HashMap<MatchKey, KeywordEntry>>;

/// `upper-cased location string → entry`.
pub type LocationIndex = HashMap<String, KeywordEntry>;

/// Read-only inputs to index construction besides the snapshot itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Pinned location names; applied after auto-derived entries.
    pub location_overrides: LocationOverrides,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            location_overrides: LocationOverrides::builtin(),
        }
    }
}

impl IndexConfig {
    /// Replace the location override table.
    pub fn with_location_overrides(mut self, overrides: LocationOverrides) -> Self {
        self.location_overrides = overrides;
        self
    }
}

/// What happened while deriving indices from one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Entries left out of the short-name index (no `short-name`).
    pub skipped_short_name: usize,
    /// Entries left out of the external-match index (no configured field).
    pub skipped_external_match: usize,
    /// Short names claimed by more than one entry; the later entry won.
    pub short_name_collisions: usize,
    /// Match keys claimed by more than one entry; the later entry won.
    pub external_match_collisions: usize,
    /// Override rows applied to the location index.
    pub overrides_applied: usize,
}

impl BuildReport {
    /// Total entries skipped across all indices.
    pub fn skipped(&self) -> usize {
        self.skipped_short_name + self.skipped_external_match
    }
}

/// Builds [`KeywordIndex`] values from snapshots.
///
/// Holds the process-wide [`IndexConfig`]; cloning shares it.
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    config: Arc<IndexConfig>,
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Derive all indices from `snapshot`.
    pub fn build(&self, snapshot: impl Into<Arc<VocabularySnapshot>>) -> KeywordIndex {
        let snapshot = snapshot.into();
        let mut report = BuildReport::default();

        let short_names = build_short_name_index(&snapshot, &mut report);
        let external = build_external_match_index(&snapshot, &mut report);
        let locations =
            build_location_index(&snapshot, &self.config.location_overrides, &mut report);

        if report.skipped() > 0 {
            tracing::warn!(
                skipped_short_name = report.skipped_short_name,
                skipped_external_match = report.skipped_external_match,
                "Keyword index built with skipped entries"
            );
        }
        tracing::debug!(
            schemes = snapshot.scheme_count(),
            entries = snapshot.entry_count(),
            locations = locations.len(),
            "Keyword index built"
        );

        KeywordIndex::from_parts(snapshot, short_names, external, locations, report)
    }
}

/// Short-name index for every scheme with case-insensitively unique short
/// names. Later entries win collisions.
pub fn build_short_name_index(
    snapshot: &VocabularySnapshot,
    report: &mut BuildReport,
) -> ShortNameIndex {
    let mut index = ShortNameIndex::new();

    for (scheme, entries) in snapshot.schemes() {
        if !scheme.has_short_name_index() {
            continue;
        }
        let by_name = index.entry(scheme).or_default();

        for entry in entries {
            let Some(short_name) = entry.short_name() else {
                let err = EntryError::MissingField {
                    scheme,
                    uuid: entry.uuid().to_string(),
                    field: SHORT_NAME_FIELD.to_string(),
                };
                tracing::warn!(error = %err, "Skipping entry without short name");
                report.skipped_short_name += 1;
                continue;
            };

            if let Some(previous) = by_name.insert(short_name.to_lowercase(), entry.clone()) {
                tracing::debug!(
                    %scheme,
                    short_name,
                    replaced = %previous.uuid(),
                    winner = %entry.uuid(),
                    "Short name collision"
                );
                report.short_name_collisions += 1;
            }
        }
    }

    index
}

/// External-match index over each scheme's configured field subset. Later
/// entries win collisions.
pub fn build_external_match_index(
    snapshot: &VocabularySnapshot,
    report: &mut BuildReport,
) -> ExternalMatchIndex {
    let mut index = ExternalMatchIndex::new();

    for (scheme, entries) in snapshot.schemes() {
        let fields = scheme.external_match_fields();
        let by_key = index.entry(scheme).or_default();

        for entry in entries {
            let key = MatchKey::from_lookup(fields, |field| entry.get(field));
            if key.is_empty() {
                tracing::warn!(
                    %scheme,
                    uuid = %entry.uuid(),
                    "Skipping entry with none of the external match fields"
                );
                report.skipped_external_match += 1;
                continue;
            }

            if by_key.insert(key, entry.clone()).is_some() {
                report.external_match_collisions += 1;
            }
        }
    }

    index
}

/// Location-string index over the location scheme.
///
/// Every field value names its entry. Entries are visited from most to
/// fewest populated fields so the broadest claim on a string is inserted
/// last and wins. The override table is applied on top unconditionally.
pub fn build_location_index(
    snapshot: &VocabularySnapshot,
    overrides: &LocationOverrides,
    report: &mut BuildReport,
) -> LocationIndex {
    let mut index = LocationIndex::new();

    let mut entries: Vec<&KeywordEntry> = snapshot
        .entries(Scheme::LOCATION)
        .unwrap_or_default()
        .iter()
        .collect();
    // Stable: equal field counts keep delivery order.
    entries.sort_by_key(|entry| Reverse(entry.field_count()));

    for entry in entries {
        for (_, value) in entry.fields() {
            index.insert(value.to_uppercase(), entry.clone());
        }
    }

    for (name, entry) in overrides.iter() {
        index.insert(name.to_string(), entry.clone());
        report.overrides_applied += 1;
    }

    index
}
