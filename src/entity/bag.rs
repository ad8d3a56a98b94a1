//! Property bags: the store's native, untyped row representation.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use super::value::PropertyValue;

/// Column names owned by the store. Never valid as user property names.
pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";
pub const TIMESTAMP: &str = "Timestamp";
pub const ETAG: &str = "ETag";

/// Returns true when `name` collides with an identity or system column.
pub fn is_reserved_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(PARTITION_KEY)
        || name.eq_ignore_ascii_case(ROW_KEY)
        || name.eq_ignore_ascii_case(TIMESTAMP)
        || name.eq_ignore_ascii_case(ETAG)
        || name.starts_with("odata.")
        || name.contains("@odata.")
}

/// Opaque optimistic-concurrency token issued by the store on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    /// Wildcard that matches any stored version (unconditional write).
    pub fn any() -> Self {
        ETag("*".to_string())
    }

    pub fn new(value: impl Into<String>) -> Self {
        ETag(value.into())
    }

    /// Weak ETag in the Azure Table format: `W/"datetime'<rfc3339>'"`,
    /// with colons percent-encoded.
    pub fn from_timestamp(ts: DateTime<Utc>) -> Self {
        let stamp = ts
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .replace(':', "%3A");
        ETag(format!("W/\"datetime'{stamp}'\""))
    }

    pub fn is_any(&self) -> bool {
        self.0 == "*"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this token, used as a precondition, accepts `current`.
    pub fn matches(&self, current: &ETag) -> bool {
        self.is_any() || self == current
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and system fields carried by every record and every bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityIdentity {
    pub partition_key: String,
    pub row_key: String,
    /// Store-assigned last-modified time. `None` until the entity is read back.
    pub timestamp: Option<DateTime<Utc>>,
    /// Store-assigned concurrency token. `None` until the entity is read back.
    pub etag: Option<ETag>,
}

impl EntityIdentity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            etag: None,
        }
    }
}

/// Untyped row: identity plus an insertion-ordered list of named values.
///
/// Property names are unique; [`PropertyBag::insert`] replaces in place and
/// keeps the original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    pub identity: EntityIdentity,
    properties: Vec<(String, PropertyValue)>,
}

impl PropertyBag {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            identity: EntityIdentity::new(partition_key, row_key),
            properties: Vec::new(),
        }
    }

    pub fn with_identity(identity: EntityIdentity) -> Self {
        Self {
            identity,
            properties: Vec::new(),
        }
    }

    pub fn partition_key(&self) -> &str {
        &self.identity.partition_key
    }

    pub fn row_key(&self) -> &str {
        &self.identity.row_key
    }

    pub fn etag(&self) -> Option<&ETag> {
        self.identity.etag.as_ref()
    }

    /// Insert or replace a property, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: PropertyValue) -> Option<PropertyValue> {
        let name = name.into();
        if let Some(slot) = self.properties.iter_mut().find(|(n, _)| *n == name) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.properties.push((name, value));
        None
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Like [`get`](Self::get) but treats an explicit null as absent.
    pub fn get_non_null(&self, name: &str) -> Option<&PropertyValue> {
        self.get(name).filter(|v| !v.is_null())
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        let idx = self.properties.iter().position(|(n, _)| n == name)?;
        Some(self.properties.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.properties.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(n, _)| n.as_str())
    }

    /// Overlay every property of `other` onto `self` (merge-mode update).
    pub fn merge_from(&mut self, other: &PropertyBag) {
        for (name, value) in other.iter() {
            self.insert(name, value.clone());
        }
    }
}
