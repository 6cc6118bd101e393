//! The read API over a vocabulary snapshot and its derived indices.

use std::collections::HashMap;
use std::sync::Arc;

use gcmd_core::{KeywordEntry, Scheme, VocabularySnapshot};
use serde_json::Value;

use crate::builder::{BuildReport, ExternalMatchIndex, LocationIndex, ShortNameIndex};
use crate::normalize::{canonical_field_name, MatchKey};

/// A vocabulary snapshot plus the three lookup structures derived from it.
///
/// Never mutated after construction; a refresh produces a new value. All
/// lookups take `&self` and are safe to run from any number of tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordIndex {
    snapshot: Arc<VocabularySnapshot>,
    short_names: ShortNameIndex,
    external: ExternalMatchIndex,
    locations: LocationIndex,
    report: BuildReport,
}

impl KeywordIndex {
    pub(crate) fn from_parts(
        snapshot: Arc<VocabularySnapshot>,
        short_names: ShortNameIndex,
        external: ExternalMatchIndex,
        locations: LocationIndex,
        report: BuildReport,
    ) -> Self {
        Self {
            snapshot,
            short_names,
            external,
            locations,
            report,
        }
    }

    /// Case-insensitive exact short-name lookup.
    ///
    /// `None` when the scheme has no short-name index or the name is unknown.
    pub fn lookup_by_short_name(&self, scheme: Scheme, name: &str) -> Option<&KeywordEntry> {
        self.short_names.get(&scheme)?.get(&name.to_lowercase())
    }

    /// Resolve a free-text location string.
    pub fn lookup_by_location(&self, text: &str) -> Option<&KeywordEntry> {
        self.locations.get(&text.to_uppercase())
    }

    /// Match an externally supplied record against a scheme.
    ///
    /// Record field names are canonicalised first (`VariableLevel1` and
    /// `variable_level_1` both become `variable-level-1`), then the record
    /// is reduced to the scheme's configured fields exactly as entries were
    /// at build time. Only structural equality of the reduced forms counts.
    pub fn lookup_by_external_record<I, K, V>(
        &self,
        scheme: Scheme,
        record: I,
    ) -> Option<&KeywordEntry>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let canonical: HashMap<String, V> = record
            .into_iter()
            .map(|(k, v)| (canonical_field_name(k.as_ref()), v))
            .collect();

        let key = MatchKey::from_lookup(scheme.external_match_fields(), |field| {
            canonical.get(field).map(|v| v.as_ref())
        });
        if key.is_empty() {
            return None;
        }
        self.external.get(&scheme)?.get(&key)
    }

    /// [`lookup_by_external_record`](Self::lookup_by_external_record) for a
    /// JSON object. Members whose values are not strings are ignored.
    pub fn lookup_by_json_record(&self, scheme: Scheme, record: &Value) -> Option<&KeywordEntry> {
        let object = record.as_object()?;
        self.lookup_by_external_record(
            scheme,
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s))),
        )
    }

    /// Drop the derived indices and keep only what is needed to rebuild them.
    pub fn compact(&self) -> Arc<VocabularySnapshot> {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> &VocabularySnapshot {
        &self.snapshot
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    pub fn short_name_index(&self) -> &ShortNameIndex {
        &self.short_names
    }

    pub fn external_match_index(&self) -> &ExternalMatchIndex {
        &self.external
    }

    pub fn location_index(&self) -> &LocationIndex {
        &self.locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{IndexBuilder, IndexConfig};
    use chrono::Utc;
    use gcmd_core::LocationOverrides;
    use proptest::prelude::*;

    fn entry(n: u128, fields: &[(&str, &str)]) -> KeywordEntry {
        KeywordEntry::new(n.to_string(), fields.iter().copied())
    }

    fn builder() -> IndexBuilder {
        IndexBuilder::new(IndexConfig::default().with_location_overrides(LocationOverrides::empty()))
    }

    fn sample_snapshot() -> VocabularySnapshot {
        VocabularySnapshot::new(
            Utc::now(),
            vec![
                (
                    Scheme::Providers,
                    vec![entry(
                        1,
                        &[
                            ("short-name", "NASA"),
                            ("long-name", "National Aeronautics and Space Administration"),
                        ],
                    )],
                ),
                (
                    Scheme::ScienceKeywords,
                    vec![
                        entry(
                            10,
                            &[
                                ("category", "EARTH SCIENCE"),
                                ("topic", "ATMOSPHERE"),
                                ("term", "AEROSOLS"),
                            ],
                        ),
                        entry(
                            11,
                            &[
                                ("category", "EARTH SCIENCE"),
                                ("topic", "ATMOSPHERE"),
                                ("term", "AEROSOLS"),
                                ("variable-level-1", "AEROSOL OPTICAL DEPTH"),
                                ("detailed-variable", "AOD 550"),
                            ],
                        ),
                    ],
                ),
                (
                    Scheme::SpatialKeywords,
                    vec![
                        entry(
                            123,
                            &[("category", "CONTINENT"), ("subregion-1", "WESTERN AFRICA")],
                        ),
                        entry(
                            456,
                            &[
                                ("category", "CONTINENT"),
                                ("subregion-1", "WESTERN AFRICA"),
                                ("subregion-2", "CHAD"),
                            ],
                        ),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_short_name_lookup_any_casing() {
        let index = builder().build(sample_snapshot());
        for name in ["nasa", "NASA", "NaSa"] {
            let found = index.lookup_by_short_name(Scheme::Providers, name).unwrap();
            assert_eq!(found.uuid(), "1");
        }
    }

    #[test]
    fn test_short_name_lookup_not_found() {
        let index = builder().build(sample_snapshot());
        assert!(index.lookup_by_short_name(Scheme::Providers, "ESA").is_none());
        assert!(index
            .lookup_by_short_name(Scheme::ScienceKeywords, "EARTH SCIENCE")
            .is_none());
        assert!(index.lookup_by_short_name(Scheme::Platforms, "TERRA").is_none());
    }

    #[test]
    fn test_location_lookup_chad_scenario() {
        let index = builder().build(sample_snapshot());
        assert_eq!(
            index.lookup_by_location("CHAD").unwrap().uuid(),
            "456"
        );
        assert_eq!(
            index.lookup_by_location("western africa").unwrap().uuid(),
            "123"
        );
        assert!(index.lookup_by_location("ATLANTIS").is_none());
    }

    #[test]
    fn test_location_override_beats_narrower_entry() {
        let pinned = entry(999, &[("category", "CONTINENT"), ("subregion-2", "CHAD")]);
        let mut overrides = LocationOverrides::empty();
        overrides.insert("chad", pinned.clone());
        let builder =
            IndexBuilder::new(IndexConfig::default().with_location_overrides(overrides));

        let index = builder.build(sample_snapshot());
        assert_eq!(index.lookup_by_location("Chad"), Some(&pinned));
        assert_eq!(
            index.lookup_by_location("WESTERN AFRICA").unwrap().uuid(),
            "123"
        );
    }

    #[test]
    fn test_external_record_matches_umm_style_names() {
        let index = builder().build(sample_snapshot());
        let record = [
            ("Category", "Earth Science"),
            ("Topic", "Atmosphere"),
            ("Term", "Aerosols"),
            ("VariableLevel1", "Aerosol Optical Depth"),
            ("DetailedVariable", "anything at all"),
        ];
        let found = index
            .lookup_by_external_record(Scheme::ScienceKeywords, record)
            .unwrap();
        assert_eq!(found.uuid(), "11");
    }

    #[test]
    fn test_external_record_absent_fields_select_broader_entry() {
        let index = builder().build(sample_snapshot());
        let record = [
            ("category", "EARTH SCIENCE"),
            ("topic", "ATMOSPHERE"),
            ("term", "AEROSOLS"),
        ];
        let found = index
            .lookup_by_external_record(Scheme::ScienceKeywords, record)
            .unwrap();
        assert_eq!(found.uuid(), "10");
    }

    #[test]
    fn test_external_record_partial_match_misses() {
        let index = builder().build(sample_snapshot());
        let record = [("category", "EARTH SCIENCE"), ("topic", "ATMOSPHERE")];
        assert!(index
            .lookup_by_external_record(Scheme::ScienceKeywords, record)
            .is_none());

        let empty: [(&str, &str); 0] = [];
        assert!(index
            .lookup_by_external_record(Scheme::ScienceKeywords, empty)
            .is_none());
    }

    #[test]
    fn test_json_record_lookup() {
        let index = builder().build(sample_snapshot());
        let record = serde_json::json!({
            "ShortName": "nasa",
            "LongName": "NATIONAL AERONAUTICS AND SPACE ADMINISTRATION",
            "Roles": ["ARCHIVER"],
        });
        // Providers match on short-name only; LongName and Roles are ignored.
        let found = index.lookup_by_json_record(Scheme::Providers, &record).unwrap();
        assert_eq!(found.uuid(), "1");

        assert!(index
            .lookup_by_json_record(Scheme::Providers, &serde_json::json!("NASA"))
            .is_none());
    }

    #[test]
    fn test_compact_then_rebuild_is_identical() {
        let builder = builder();
        let original = builder.build(sample_snapshot());
        let rebuilt = builder.build(original.compact());

        assert_eq!(rebuilt.short_name_index(), original.short_name_index());
        assert_eq!(rebuilt.external_match_index(), original.external_match_index());
        assert_eq!(rebuilt.location_index(), original.location_index());
        assert_eq!(rebuilt, original);
    }

    fn arb_location_entries() -> impl Strategy<Value = Vec<KeywordEntry>> {
        let names = prop::sample::select(vec![
            "CONTINENT", "AFRICA", "ASIA", "OCEAN", "ARCTIC OCEAN", "CHAD", "GEORGIA",
        ]);
        prop::collection::vec(prop::collection::vec(names, 1..4), 0..12).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, values)| {
                    let fields = ["category", "type", "subregion-1"]
                        .into_iter()
                        .zip(values);
                    KeywordEntry::new((i + 1).to_string(), fields)
                })
                .collect()
        })
    }

    proptest! {
        /// Rebuilding from the compacted snapshot reproduces every index.
        #[test]
        fn prop_compact_round_trip(entries in arb_location_entries()) {
            let builder = IndexBuilder::default();
            let snapshot = VocabularySnapshot::new(Utc::now(), vec![
                (Scheme::SpatialKeywords, entries.clone()),
                (Scheme::Platforms, entries),
            ]);
            let original = builder.build(snapshot);
            let rebuilt = builder.build(original.compact());
            prop_assert_eq!(rebuilt, original);
        }

        /// Pinned names always resolve to the pinned entry.
        #[test]
        fn prop_override_always_wins(entries in arb_location_entries()) {
            let builder = IndexBuilder::default();
            let snapshot = VocabularySnapshot::new(Utc::now(), vec![(Scheme::SpatialKeywords, entries)]);
            let index = builder.build(snapshot);
            for (name, pinned) in builder.config().location_overrides.iter() {
                prop_assert_eq!(index.lookup_by_location(name), Some(pinned));
            }
        }

        /// Every location string resolves to an entry with the fewest
        /// populated fields among the entries that name it.
        #[test]
        fn prop_fewest_fields_win(entries in arb_location_entries()) {
            let index = builder().build(VocabularySnapshot::new(
                Utc::now(),
                vec![(Scheme::SpatialKeywords, entries.clone())],
            ));
            for (name, winner) in index.location_index() {
                let fewest = entries
                    .iter()
                    .filter(|e| e.fields().any(|(_, v)| v == name.as_str()))
                    .map(KeywordEntry::field_count)
                    .min();
                prop_assert_eq!(Some(winner.field_count()), fewest);
            }
        }
    }
}
