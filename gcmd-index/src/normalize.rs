//! Canonical forms shared by index construction and lookups.
//!
//! Whatever transform builds a key from a vocabulary entry must be the same
//! transform applied to a lookup input, or lookups silently miss. Both sides go
//! through [`MatchKey::from_lookup`].

use gcmd_core::resolve_field_alias;

/// Canonicalise a record field name to the vocabulary's kebab-case naming.
///
/// `VariableLevel1` → `variable-level-1`, `URLContentType` →
/// `url-content-type`, `short_name` → `short-name`. Known record-side aliases
/// (`LocationCategory` → `category`) are then resolved.
pub fn canonical_field_name(name: &str) -> String {
    let chars: Vec<char> = name.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == ' ' || c == '-' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }

        let prev = i.checked_sub(1).map(|p| chars[p]);
        let next = chars.get(i + 1).copied();
        let boundary = match prev {
            Some(p) if c.is_uppercase() => {
                p.is_lowercase()
                    || p.is_ascii_digit()
                    || (p.is_uppercase() && next.is_some_and(char::is_lowercase))
            }
            Some(p) if c.is_ascii_digit() => p.is_alphabetic(),
            _ => false,
        };
        if boundary && !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
        out.extend(c.to_lowercase());
    }

    while out.ends_with('-') {
        out.pop();
    }
    resolve_field_alias(&out).to_string()
}

/// Normalised field-subset key: the configured fields that are present,
/// in configured order, with lower-cased values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey(Vec<(&'static str, String)>);

impl MatchKey {
    /// Select `fields` through `lookup`, drop absent or blank values, and
    /// lower-case the rest.
    pub fn from_lookup<'a, F>(fields: &'static [&'static str], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        Self(
            fields
                .iter()
                .filter_map(|field| {
                    lookup(field)
                        .filter(|v| !v.trim().is_empty())
                        .map(|v| (*field, v.to_lowercase()))
                })
                .collect(),
        )
    }

    /// True when none of the configured fields were present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
