//! GCMD Test Utilities
//!
//! Shared test infrastructure for the keyword cache workspace:
//! - Fixture vocabularies with known lookup answers
//! - A scripted dictionary client that can be taken down mid-test
//! - A cache tier that always fails
//! - Proptest generators for keyword entries

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proptest::prelude::*;
use uuid::Uuid;

pub use gcmd_core::{
    CacheError, GcmdError, GcmdResult, KeywordEntry, LocationOverrides, RemoteError, Scheme,
    VocabularySnapshot,
};
pub use gcmd_index::{IndexBuilder, IndexConfig, KeywordIndex};
pub use gcmd_storage::{
    CacheBackend, CacheConfig, CacheKey, CacheStats, CacheableValue, DictionaryClient,
    InMemoryCacheBackend, KeywordCache, KeywordLoader,
};

// ============================================================================
// FIXTURES
// ============================================================================

pub const NASA_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-00000000a5a0";
pub const TERRA_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-00000000a7e2";
pub const MODIS_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-000000000d15";
pub const AEROSOLS_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-00000000ae05";

pub const CONTINENT_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0001";
pub const AFRICA_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0002";
pub const WESTERN_AFRICA_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0003";
pub const CHAD_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0004";
pub const OCEAN_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0005";
pub const ARCTIC_OCEAN_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0006";
/// The US state; the built-in override table pins `GEORGIA` to the country.
pub const GEORGIA_STATE_UUID: &str = "8a2f6f1e-1c2d-4c5b-9e2a-0000000c0007";

fn entry(uuid: impl Into<String>, fields: &[(&str, &str)]) -> KeywordEntry {
    KeywordEntry::new(uuid, fields.iter().copied())
}

fn numbered(n: u32) -> String {
    format!("8a2f6f1e-1c2d-4c5b-9e2a-0000f{n:07x}")
}

pub fn nasa_provider() -> KeywordEntry {
    entry(
        NASA_UUID,
        &[
            ("bucket-level-0", "GOVERNMENT AGENCIES-U.S. FEDERAL AGENCIES"),
            ("bucket-level-1", "NASA"),
            ("short-name", "NASA"),
            ("long-name", "National Aeronautics and Space Administration"),
        ],
    )
}

pub fn terra_platform() -> KeywordEntry {
    entry(
        TERRA_UUID,
        &[
            ("category", "Earth Observation Satellites"),
            ("short-name", "Terra"),
            ("long-name", "Earth Observing System, Terra (AM-1)"),
        ],
    )
}

pub fn modis_instrument() -> KeywordEntry {
    entry(
        MODIS_UUID,
        &[
            ("category", "Earth Remote Sensing Instruments"),
            ("short-name", "MODIS"),
            ("long-name", "Moderate-Resolution Imaging Spectroradiometer"),
        ],
    )
}

pub fn aerosols_science_keyword() -> KeywordEntry {
    entry(
        AEROSOLS_UUID,
        &[
            ("category", "EARTH SCIENCE"),
            ("topic", "ATMOSPHERE"),
            ("term", "AEROSOLS"),
        ],
    )
}

/// Location entries with overlapping field values.
///
/// `AFRICA` appears in three entries and resolves to [`AFRICA_UUID`], the
/// one with the fewest fields. `GEORGIA` names only the US state here.
pub fn location_entries() -> Vec<KeywordEntry> {
    vec![
        entry(
            CHAD_UUID,
            &[
                ("category", "CONTINENT"),
                ("type", "AFRICA"),
                ("subregion-1", "CENTRAL AFRICA"),
                ("subregion-2", "CHAD"),
            ],
        ),
        entry(
            WESTERN_AFRICA_UUID,
            &[
                ("category", "CONTINENT"),
                ("type", "AFRICA"),
                ("subregion-1", "WESTERN AFRICA"),
            ],
        ),
        entry(AFRICA_UUID, &[("category", "CONTINENT"), ("type", "AFRICA")]),
        entry(CONTINENT_UUID, &[("category", "CONTINENT")]),
        entry(ARCTIC_OCEAN_UUID, &[("category", "OCEAN"), ("type", "ARCTIC OCEAN")]),
        entry(OCEAN_UUID, &[("category", "OCEAN")]),
        entry(
            GEORGIA_STATE_UUID,
            &[
                ("category", "CONTINENT"),
                ("type", "NORTH AMERICA"),
                ("subregion-1", "UNITED STATES OF AMERICA"),
                ("subregion-2", "GEORGIA"),
            ],
        ),
    ]
}

/// One or more entries for every scheme, so a loader configured for
/// [`Scheme::ALL`] succeeds against it.
pub fn fixture_vocabulary() -> Vec<(Scheme, Vec<KeywordEntry>)> {
    vec![
        (
            Scheme::Providers,
            vec![
                nasa_provider(),
                entry(numbered(1), &[("short-name", "ESA"), ("long-name", "European Space Agency")]),
            ],
        ),
        (Scheme::Platforms, vec![terra_platform()]),
        (Scheme::Instruments, vec![modis_instrument()]),
        (
            Scheme::Projects,
            vec![entry(
                numbered(2),
                &[("short-name", "ABoVE"), ("long-name", "Arctic-Boreal Vulnerability Experiment")],
            )],
        ),
        (Scheme::ScienceKeywords, vec![aerosols_science_keyword()]),
        (Scheme::SpatialKeywords, location_entries()),
        (
            Scheme::TemporalKeywords,
            vec![entry(numbered(3), &[("temporal-resolution-range", "1 minute - < 1 hour")])],
        ),
        (
            Scheme::IsoTopicCategories,
            vec![entry(numbered(4), &[("iso-topic-category", "climatologyMeteorologyAtmosphere")])],
        ),
        (
            Scheme::RelatedUrls,
            vec![entry(
                numbered(5),
                &[("url-content-type", "DistributionURL"), ("type", "GET DATA")],
            )],
        ),
        (
            Scheme::GranuleDataFormat,
            vec![entry(numbered(6), &[("short-name", "NetCDF-4")])],
        ),
        (
            Scheme::MeasurementName,
            vec![entry(
                numbered(7),
                &[("context-medium", "atmosphere"), ("object", "aerosol"), ("quantity", "optical depth")],
            )],
        ),
    ]
}

/// [`fixture_vocabulary`] as a snapshot fetched at `fetched_at`.
pub fn fixture_snapshot_at(fetched_at: DateTime<Utc>) -> VocabularySnapshot {
    VocabularySnapshot::new(fetched_at, fixture_vocabulary())
}

pub fn fixture_snapshot() -> VocabularySnapshot {
    fixture_snapshot_at(Utc::now())
}

/// Assert that a lookup found the entry with `expected` as its uuid.
#[track_caller]
pub fn assert_found(found: Option<&KeywordEntry>, expected: &str) {
    match found {
        Some(entry) => assert_eq!(entry.uuid(), expected, "lookup found the wrong entry"),
        None => panic!("lookup found nothing, expected {expected}"),
    }
}

// ============================================================================
// MOCK DICTIONARY CLIENT
// ============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dictionary client serving an in-memory vocabulary.
///
/// Counts every fetch, can be taken down and brought back, and can be slowed
/// down to widen race windows. Schemes it has no data for come back empty.
#[derive(Debug, Default)]
pub struct ScriptedDictionaryClient {
    vocabulary: Mutex<HashMap<Scheme, Vec<KeywordEntry>>>,
    down: AtomicBool,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
    fetches_by_scheme: Mutex<HashMap<Scheme, usize>>,
}

impl ScriptedDictionaryClient {
    pub fn new(vocabulary: impl IntoIterator<Item = (Scheme, Vec<KeywordEntry>)>) -> Self {
        Self {
            vocabulary: Mutex::new(vocabulary.into_iter().collect()),
            ..Self::default()
        }
    }

    /// A client serving [`fixture_vocabulary`].
    pub fn with_fixtures() -> Self {
        Self::new(fixture_vocabulary())
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.set_delay(delay);
        self
    }

    /// Make every later fetch fail (`true`) or succeed again (`false`).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    /// Replace what the client serves for one scheme.
    pub fn set_scheme(&self, scheme: Scheme, entries: Vec<KeywordEntry>) {
        lock(&self.vocabulary).insert(scheme, entries);
    }

    /// Total fetch calls across all schemes, failed ones included.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn fetches_for(&self, scheme: Scheme) -> usize {
        lock(&self.fetches_by_scheme).get(&scheme).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DictionaryClient for ScriptedDictionaryClient {
    async fn fetch_keywords(&self, scheme: Scheme) -> GcmdResult<Vec<KeywordEntry>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *lock(&self.fetches_by_scheme).entry(scheme).or_insert(0) += 1;

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.down.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable {
                scheme,
                reason: "scripted outage".to_string(),
            }
            .into());
        }
        Ok(lock(&self.vocabulary).get(&scheme).cloned().unwrap_or_default())
    }
}

// ============================================================================
// FAILING CACHE TIER
// ============================================================================

/// A cache tier whose every operation fails.
#[derive(Debug)]
pub struct FailingBackend {
    name: String,
    attempts: AtomicUsize,
}

impl FailingBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Operations attempted against this tier.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> GcmdResult<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend {
            tier: self.name.clone(),
            reason: "scripted failure".to_string(),
        }
        .into())
    }
}

#[async_trait]
impl CacheBackend for FailingBackend {
    fn tier_name(&self) -> &str {
        &self.name
    }

    async fn get<T: CacheableValue>(
        &self,
        _key: &CacheKey,
    ) -> GcmdResult<Option<(T, DateTime<Utc>)>> {
        self.fail()
    }

    async fn put<T: CacheableValue>(
        &self,
        _key: &CacheKey,
        _value: &T,
        _cached_at: DateTime<Utc>,
    ) -> GcmdResult<()> {
        self.fail()
    }

    async fn cached_at(&self, _key: &CacheKey) -> GcmdResult<Option<DateTime<Utc>>> {
        self.fail()
    }

    async fn delete(&self, _key: &CacheKey) -> GcmdResult<bool> {
        self.fail()
    }

    async fn invalidate_namespace(&self, _namespace: &str) -> GcmdResult<u64> {
        self.fail()
    }

    async fn stats(&self) -> GcmdResult<CacheStats> {
        self.fail()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub fn arb_scheme() -> impl Strategy<Value = Scheme> {
    proptest::sample::select(Scheme::ALL.to_vec())
}

/// Upper-case vocabulary-style values such as `WESTERN AFRICA`.
pub fn arb_field_value() -> impl Strategy<Value = String> {
    "[A-Z][A-Z0-9-]{0,7}( [A-Z][A-Z0-9-]{0,7}){0,2}"
}

/// An entry populating a non-empty subset of `fields`.
pub fn arb_keyword_entry(fields: &'static [&'static str]) -> impl Strategy<Value = KeywordEntry> {
    (
        any::<u128>(),
        proptest::collection::vec(arb_field_value(), fields.len()),
        proptest::sample::subsequence(fields.to_vec(), 1..=fields.len().max(1)),
    )
        .prop_map(move |(id, values, chosen)| {
            let populated = fields
                .iter()
                .zip(values)
                .filter(|(field, _)| chosen.contains(*field))
                .map(|(field, value)| (*field, value));
            KeywordEntry::new(Uuid::from_u128(id).to_string(), populated)
        })
}

/// Entries for `scheme` built from its external match fields.
pub fn arb_scheme_entries(
    scheme: Scheme,
    max_len: usize,
) -> impl Strategy<Value = Vec<KeywordEntry>> {
    proptest::collection::vec(arb_keyword_entry(scheme.external_match_fields()), 1..=max_len.max(1))
}
