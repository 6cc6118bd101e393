//! Hand-resolved location names.
//!
//! A handful of geographic names appear at more than one place in the
//! location hierarchy (Georgia the country and the US state, for example).
//! The override table pins each of them to one entry, and that choice wins
//! over anything derived from the vocabulary.

use crate::entry::KeywordEntry;
use crate::error::ConfigError;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

static BUILTIN: Lazy<LocationOverrides> = Lazy::new(|| {
    let mut overrides = LocationOverrides::empty();
    overrides.insert(
        "SPACE",
        KeywordEntry::new(
            "6f2c3b1f-acae-4af0-a759-f0d57ccfc83f",
            [("category", "SPACE")],
        ),
    );
    overrides.insert(
        "ANGOLA",
        KeywordEntry::new(
            "9b0a194d-d617-4fed-9625-df176319892d",
            [
                ("category", "CONTINENT"),
                ("type", "AFRICA"),
                ("subregion-1", "CENTRAL AFRICA"),
                ("subregion-2", "ANGOLA"),
            ],
        ),
    );
    overrides.insert(
        "GEORGIA",
        KeywordEntry::new(
            "d79e134c-a4d0-44e2-9706-cbe4a6bda0e4",
            [
                ("category", "CONTINENT"),
                ("type", "ASIA"),
                ("subregion-1", "WESTERN ASIA"),
                ("subregion-2", "GEORGIA"),
            ],
        ),
    );
    overrides.insert(
        "BLACK SEA",
        KeywordEntry::new(
            "afbc0a01-742e-49da-939e-3eaa3cf431b0",
            [
                ("category", "OCEAN"),
                ("type", "ATLANTIC OCEAN"),
                ("subregion-1", "NORTH ATLANTIC OCEAN"),
                ("subregion-2", "BLACK SEA"),
            ],
        ),
    );
    overrides
});

/// Location string → pinned entry. Keys are stored upper-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationOverrides {
    entries: HashMap<String, KeywordEntry>,
}

impl LocationOverrides {
    /// An empty table.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The compiled-in table.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Parse a JSON object of `{"LOCATION NAME": {"uuid": ..., "category": ...}}`.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let raw: IndexMap<String, KeywordEntry> = serde_json::from_str(json)?;
        let mut overrides = Self::empty();
        for (name, entry) in raw {
            overrides.insert(&name, entry);
        }
        Ok(overrides)
    }

    /// Load a JSON override file (see [`LocationOverrides::from_json_str`]).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |reason: String| ConfigError::OverrideFile {
            path: path.display().to_string(),
            reason,
        };
        let json = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        Self::from_json_str(&json).map_err(|e| file_error(e.to_string()))
    }

    /// Pin `name` to `entry`, replacing any previous pin.
    pub fn insert(&mut self, name: &str, entry: KeywordEntry) {
        self.entries.insert(name.to_uppercase(), entry);
    }

    /// The pinned entry for an already upper-cased name.
    pub fn get(&self, name: &str) -> Option<&KeywordEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeywordEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pins_georgia_to_the_country() {
        let overrides = LocationOverrides::builtin();
        let georgia = overrides.get("GEORGIA").expect("GEORGIA is pinned");
        assert_eq!(georgia.get("type"), Some("ASIA"));
        assert_eq!(overrides.len(), 4);
    }

    #[test]
    fn test_insert_uppercases_keys() {
        let mut overrides = LocationOverrides::empty();
        overrides.insert(
            "Black Sea",
            KeywordEntry::new("7", [("category", "OCEAN")]),
        );
        assert!(overrides.get("BLACK SEA").is_some());
        assert!(overrides.get("Black Sea").is_none());
    }

    #[test]
    fn test_from_json_str() {
        let json = r#"{
            "amazon": {"uuid": "amazon-basin", "category": "CONTINENT", "type": "SOUTH AMERICA"}
        }"#;
        let overrides = LocationOverrides::from_json_str(json).unwrap();
        let entry = overrides.get("AMAZON").unwrap();
        assert_eq!(entry.uuid(), "amazon-basin");
        assert_eq!(entry.get("type"), Some("SOUTH AMERICA"));
    }

    #[test]
    fn test_from_json_file_reports_path() {
        let err = LocationOverrides::from_json_file("/nonexistent/overrides.json").unwrap_err();
        assert!(matches!(err, ConfigError::OverrideFile { ref path, .. } if path.contains("overrides.json")));
    }
}
