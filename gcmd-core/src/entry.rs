//! A single controlled-vocabulary record.

use crate::error::EntryError;
use crate::scheme::{SHORT_NAME_FIELD, UUID_FIELD};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One controlled-vocabulary keyword: hierarchy-level fields plus a stable
/// unique identifier.
///
/// The identifier is opaque. Upstream ids are usually UUIDs but nothing here
/// depends on that, so any non-blank string is accepted.
///
/// Fields keep the order the dictionary service delivered them in. Blank
/// values are dropped on construction, so a blank column and a missing one
/// are indistinguishable. The `uuid` is never stored as a field.
///
/// Serializes as one flat object (`{"uuid": ..., "category": ...}`), the
/// same shape the dictionary service rows have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "IndexMap<String, String>",
    try_from = "IndexMap<String, String>"
)]
pub struct KeywordEntry {
    uuid: String,
    fields: IndexMap<String, String>,
}

impl KeywordEntry {
    /// Build an entry from its identifier and field values.
    pub fn new<K, V, I>(uuid: impl Into<String>, fields: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, v)| k != UUID_FIELD && !v.trim().is_empty())
            .collect();
        Self {
            uuid: uuid.into(),
            fields,
        }
    }

    /// Build an entry from a raw row in which `uuid` is one of the columns.
    pub fn from_raw<K, V, I>(row: I) -> Result<Self, EntryError>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut uuid = None;
        let mut fields = Vec::new();
        for (k, v) in row {
            let (k, v) = (k.into(), v.into());
            if k == UUID_FIELD {
                uuid = Some(v);
            } else {
                fields.push((k, v));
            }
        }
        let uuid = uuid
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or(EntryError::MissingUuid)?;
        Ok(Self::new(uuid, fields))
    }

    /// The concept identifier.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Value of a hierarchy field, if populated.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// The `short-name` value, if populated.
    pub fn short_name(&self) -> Option<&str> {
        self.get(SHORT_NAME_FIELD)
    }

    /// Populated fields, in delivery order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of populated fields, not counting the uuid.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

impl From<KeywordEntry> for IndexMap<String, String> {
    fn from(entry: KeywordEntry) -> Self {
        let mut row = IndexMap::with_capacity(entry.fields.len() + 1);
        row.insert(UUID_FIELD.to_string(), entry.uuid);
        row.extend(entry.fields);
        row
    }
}

impl TryFrom<IndexMap<String, String>> for KeywordEntry {
    type Error = EntryError;

    fn try_from(row: IndexMap<String, String>) -> Result<Self, Self::Error> {
        Self::from_raw(row)
    }
}
