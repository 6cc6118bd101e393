//! Keyword schemes and their static indexing configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Field holding the short name in schemes that have one.
pub const SHORT_NAME_FIELD: &str = "short-name";

/// Field holding the globally unique concept identifier.
pub const UUID_FIELD: &str = "uuid";

/// A named category of controlled-vocabulary keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    Providers,
    Platforms,
    Instruments,
    Projects,
    ScienceKeywords,
    #[serde(alias = "locations")]
    SpatialKeywords,
    TemporalKeywords,
    IsoTopicCategories,
    RelatedUrls,
    GranuleDataFormat,
    MeasurementName,
}

impl Scheme {
    /// Every scheme, in fetch order.
    pub const ALL: [Scheme; 11] = [
        Scheme::Providers,
        Scheme::Platforms,
        Scheme::Instruments,
        Scheme::Projects,
        Scheme::ScienceKeywords,
        Scheme::SpatialKeywords,
        Scheme::TemporalKeywords,
        Scheme::IsoTopicCategories,
        Scheme::RelatedUrls,
        Scheme::GranuleDataFormat,
        Scheme::MeasurementName,
    ];

    /// Scheme whose entries feed the location-string index.
    pub const LOCATION: Scheme = Scheme::SpatialKeywords;

    /// Canonical kebab-case name, as used by the dictionary service.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Providers => "providers",
            Scheme::Platforms => "platforms",
            Scheme::Instruments => "instruments",
            Scheme::Projects => "projects",
            Scheme::ScienceKeywords => "science-keywords",
            Scheme::SpatialKeywords => "spatial-keywords",
            Scheme::TemporalKeywords => "temporal-keywords",
            Scheme::IsoTopicCategories => "iso-topic-categories",
            Scheme::RelatedUrls => "related-urls",
            Scheme::GranuleDataFormat => "granule-data-format",
            Scheme::MeasurementName => "measurement-name",
        }
    }

    /// Whether short names in this scheme are unique under case-insensitive
    /// comparison and therefore get a short-name index.
    pub fn has_short_name_index(&self) -> bool {
        matches!(
            self,
            Scheme::Providers | Scheme::Platforms | Scheme::Instruments
        )
    }

    /// Fields compared when matching an externally supplied record against
    /// this scheme, in hierarchy order.
    pub fn external_match_fields(&self) -> &'static [&'static str] {
        match self {
            Scheme::Providers => &["short-name"],
            Scheme::Platforms => &["short-name", "long-name"],
            Scheme::Instruments => &["short-name", "long-name"],
            Scheme::Projects => &["short-name", "long-name"],
            Scheme::ScienceKeywords => &[
                "category",
                "topic",
                "term",
                "variable-level-1",
                "variable-level-2",
                "variable-level-3",
            ],
            Scheme::SpatialKeywords => &[
                "category",
                "type",
                "subregion-1",
                "subregion-2",
                "subregion-3",
            ],
            Scheme::TemporalKeywords => &["temporal-resolution-range"],
            Scheme::IsoTopicCategories => &["iso-topic-category"],
            Scheme::RelatedUrls => &["url-content-type", "type", "subtype"],
            Scheme::GranuleDataFormat => &["short-name"],
            Scheme::MeasurementName => &["context-medium", "object", "quantity"],
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('_', "-");
        if name == "locations" {
            return Ok(Scheme::SpatialKeywords);
        }
        Scheme::ALL
            .into_iter()
            .find(|scheme| scheme.as_str() == name)
            .ok_or_else(|| ConfigError::UnknownScheme {
                name: s.to_string(),
            })
    }
}

/// Record-side field names that differ from the vocabulary's own names.
///
/// Applied after a field name has been canonicalised to kebab-case.
pub const FIELD_ALIASES: &[(&str, &str)] = &[
    ("location-category", "category"),
    ("location-type", "type"),
    ("location-subregion-1", "subregion-1"),
    ("location-subregion-2", "subregion-2"),
    ("location-subregion-3", "subregion-3"),
    ("iso-topic-categories", "iso-topic-category"),
];

/// Resolve an alias to the vocabulary field name, or return the input.
pub fn resolve_field_alias(name: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, target)| *target)
        .unwrap_or(name)
}
