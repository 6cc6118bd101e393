//! Namespaced cache keys shared by every tier.
//!
//! A key is a namespace plus a name. Namespaces let one physical store hold
//! several caches and be invalidated one cache at a time.

use std::fmt;

/// Separator byte between namespace and name. Never valid inside UTF-8.
const SEPARATOR: u8 = 0xFF;

/// Key for one cached value.
///
/// # Binary Format
///
/// `[namespace bytes][0xFF][name bytes]`. Because `0xFF` cannot occur in
/// UTF-8, the encoding is unambiguous and all keys of a namespace share the
/// prefix returned by [`CacheKey::namespace_prefix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    name: String,
}

impl CacheKey {
    /// Namespace used for keyword vocabularies.
    pub const KEYWORD_NAMESPACE: &'static str = "kms";

    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The key the keyword vocabulary is stored under.
    pub fn keywords() -> Self {
        Self::new(Self::KEYWORD_NAMESPACE, "keywords")
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encode to the binary key format.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.namespace.len() + 1 + self.name.len());
        bytes.extend_from_slice(self.namespace.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.name.as_bytes());
        bytes
    }

    /// Decode from the binary key format.
    ///
    /// Returns `None` if there is no separator or either part is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.iter().position(|b| *b == SEPARATOR)?;
        let namespace = std::str::from_utf8(&bytes[..split]).ok()?;
        let name = std::str::from_utf8(&bytes[split + 1..]).ok()?;
        Some(Self::new(namespace, name))
    }

    /// Prefix shared by every key in `namespace`.
    pub fn namespace_prefix(namespace: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(namespace.len() + 1);
        bytes.extend_from_slice(namespace.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}
