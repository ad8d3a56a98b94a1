//! Dynamically-typed property values.
//!
//! A [`PropertyValue`] is one cell of a [`PropertyBag`](super::bag::PropertyBag):
//! the value kinds a key-value table row can hold, with no knowledge of the
//! record type it will eventually be read into.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};
use uuid::Uuid;

/// One stored property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Explicit null. Treated exactly like an absent property on read.
    Null,
    String(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal(BigDecimal),
    Boolean(bool),
    /// Date-time carrying an explicit UTC offset.
    DateTimeOffset(DateTime<FixedOffset>),
    /// Date-time with no offset; interpreted as UTC wherever one is needed.
    DateTime(NaiveDateTime),
    Guid(Uuid),
    Binary(Vec<u8>),
}

/// Discriminant of a [`PropertyValue`], used in diagnostics and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    String,
    Int32,
    Int64,
    Double,
    Decimal,
    Boolean,
    DateTimeOffset,
    DateTime,
    Guid,
    Binary,
}

impl ValueKind {
    /// Short lowercase name for log fields and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::String => "string",
            ValueKind::Int32 => "int32",
            ValueKind::Int64 => "int64",
            ValueKind::Double => "double",
            ValueKind::Decimal => "decimal",
            ValueKind::Boolean => "boolean",
            ValueKind::DateTimeOffset => "datetime_offset",
            ValueKind::DateTime => "datetime",
            ValueKind::Guid => "guid",
            ValueKind::Binary => "binary",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PropertyValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            PropertyValue::Null => ValueKind::Null,
            PropertyValue::String(_) => ValueKind::String,
            PropertyValue::Int32(_) => ValueKind::Int32,
            PropertyValue::Int64(_) => ValueKind::Int64,
            PropertyValue::Double(_) => ValueKind::Double,
            PropertyValue::Decimal(_) => ValueKind::Decimal,
            PropertyValue::Boolean(_) => ValueKind::Boolean,
            PropertyValue::DateTimeOffset(_) => ValueKind::DateTimeOffset,
            PropertyValue::DateTime(_) => ValueKind::DateTime,
            PropertyValue::Guid(_) => ValueKind::Guid,
            PropertyValue::Binary(_) => ValueKind::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// String representation used when a text field reads a non-string value.
    ///
    /// Date-times render as RFC 3339 (a value without offset gets `Z`),
    /// binary as standard base64. Returns `None` for `Null`.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            PropertyValue::Null => return None,
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Int32(n) => n.to_string(),
            PropertyValue::Int64(n) => n.to_string(),
            PropertyValue::Double(d) => d.to_string(),
            PropertyValue::Decimal(d) => d.to_string(),
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::DateTimeOffset(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            PropertyValue::DateTime(naive) => naive
                .and_utc()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            PropertyValue::Guid(g) => g.hyphenated().to_string(),
            PropertyValue::Binary(bytes) => BASE64_STANDARD.encode(bytes),
        };
        Some(text)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int32(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int64(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}
