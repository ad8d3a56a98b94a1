//! Per-field type coercion between property values and Rust field types.
//!
//! Writes copy a field verbatim into the matching [`PropertyValue`] kind.
//! Reads go through [`FieldValue::from_property`], which accepts every
//! representation listed for the target type and returns a
//! [`CoercionError`] for anything else. Callers treat an error as "leave the
//! field at its default", never as a failed read.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::value::{PropertyValue, ValueKind};

/// Declared type of a persisted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int32,
    Int64,
    Float32,
    Float64,
    Decimal,
    Boolean,
    DateTimeOffset,
    DateTimeUtc,
    NaiveDateTime,
    Guid,
    Binary,
}

impl FieldKind {
    /// Whether `found` is a kind this field stores natively. Decimals also
    /// accept text, their wire form; both date-time kinds share one wire type.
    pub fn is_native(self, found: ValueKind) -> bool {
        match self {
            FieldKind::Text => found == ValueKind::String,
            FieldKind::Int32 => found == ValueKind::Int32,
            FieldKind::Int64 => found == ValueKind::Int64,
            FieldKind::Float32 | FieldKind::Float64 => found == ValueKind::Double,
            FieldKind::Decimal => matches!(found, ValueKind::Decimal | ValueKind::String),
            FieldKind::Boolean => found == ValueKind::Boolean,
            FieldKind::DateTimeOffset | FieldKind::DateTimeUtc | FieldKind::NaiveDateTime => {
                matches!(found, ValueKind::DateTimeOffset | ValueKind::DateTime)
            }
            FieldKind::Guid => found == ValueKind::Guid,
            FieldKind::Binary => found == ValueKind::Binary,
        }
    }
}

/// Why a stored value could not be assigned to a field.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoercionError {
    /// The stored kind is never accepted by the target type.
    #[error("cannot convert {found} into {target:?}")]
    Incompatible { found: ValueKind, target: FieldKind },

    /// The stored string does not parse as the target type.
    #[error("cannot parse {text:?} as {target:?}")]
    Unparseable { text: String, target: FieldKind },

    /// A wider integer does not fit the target width.
    #[error("value {value} out of range for {target:?}")]
    OutOfRange { value: i64, target: FieldKind },

    /// Null reached a non-nullable coercion; callers normally filter it first.
    #[error("null value")]
    Null,
}

/// A Rust type that can live in a persisted field.
///
/// `to_property` returns `None` when the value equals the type's default
/// (or is `None` for nullable fields); such fields are left out of the bag.
pub trait FieldValue: Sized {
    const KIND: FieldKind;

    fn to_property(&self) -> Option<PropertyValue>;

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError>;
}

fn incompatible(found: &PropertyValue, target: FieldKind) -> CoercionError {
    CoercionError::Incompatible {
        found: found.kind(),
        target,
    }
}

fn unparseable(text: &str, target: FieldKind) -> CoercionError {
    CoercionError::Unparseable {
        text: text.to_string(),
        target,
    }
}

/// Parse an ISO-8601 date-time. Strings without an offset are taken as UTC.
fn parse_iso8601(text: &str, target: FieldKind) -> Result<DateTime<FixedOffset>, CoercionError> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc().fixed_offset());
        }
    }
    Err(unparseable(text, target))
}

fn to_offset(value: &PropertyValue, target: FieldKind) -> Result<DateTime<FixedOffset>, CoercionError> {
    match value {
        PropertyValue::DateTimeOffset(dt) => Ok(*dt),
        PropertyValue::DateTime(naive) => Ok(naive.and_utc().fixed_offset()),
        PropertyValue::String(s) => parse_iso8601(s, target),
        PropertyValue::Null => Err(CoercionError::Null),
        other => Err(incompatible(other, target)),
    }
}

impl FieldValue for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_property(&self) -> Option<PropertyValue> {
        (!self.is_empty()).then(|| PropertyValue::String(self.clone()))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        value.to_text().ok_or(CoercionError::Null)
    }
}

impl FieldValue for i32 {
    const KIND: FieldKind = FieldKind::Int32;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != 0).then_some(PropertyValue::Int32(*self))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Int32(n) => Ok(*n),
            PropertyValue::Int64(n) => i32::try_from(*n).map_err(|_| CoercionError::OutOfRange {
                value: *n,
                target: Self::KIND,
            }),
            PropertyValue::String(s) => s.trim().parse().map_err(|_| unparseable(s, Self::KIND)),
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for i64 {
    const KIND: FieldKind = FieldKind::Int64;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != 0).then_some(PropertyValue::Int64(*self))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Int32(n) => Ok(i64::from(*n)),
            PropertyValue::Int64(n) => Ok(*n),
            PropertyValue::String(s) => s.trim().parse().map_err(|_| unparseable(s, Self::KIND)),
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for f64 {
    const KIND: FieldKind = FieldKind::Float64;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != 0.0).then_some(PropertyValue::Double(*self))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Double(d) => Ok(*d),
            PropertyValue::String(s) => s.trim().parse().map_err(|_| unparseable(s, Self::KIND)),
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for f32 {
    const KIND: FieldKind = FieldKind::Float32;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != 0.0).then_some(PropertyValue::Double(f64::from(*self)))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Double(d) => Ok(*d as f32),
            PropertyValue::String(s) => s.trim().parse().map_err(|_| unparseable(s, Self::KIND)),
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for BigDecimal {
    const KIND: FieldKind = FieldKind::Decimal;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != BigDecimal::default()).then(|| PropertyValue::Decimal(self.clone()))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Decimal(d) => Ok(d.clone()),
            // Shortest round-trip text of the double, so 19.99 stays 19.99.
            PropertyValue::Double(d) => {
                let text = d.to_string();
                BigDecimal::from_str(&text).map_err(|_| unparseable(&text, Self::KIND))
            }
            PropertyValue::String(s) => {
                BigDecimal::from_str(s.trim()).map_err(|_| unparseable(s, Self::KIND))
            }
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn to_property(&self) -> Option<PropertyValue> {
        self.then_some(PropertyValue::Boolean(true))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Boolean(b) => Ok(*b),
            PropertyValue::String(s) => {
                let trimmed = s.trim();
                if trimmed.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(unparseable(s, Self::KIND))
                }
            }
            PropertyValue::Int32(n) => Ok(*n != 0),
            PropertyValue::Int64(n) => Ok(*n != 0),
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for DateTime<FixedOffset> {
    const KIND: FieldKind = FieldKind::DateTimeOffset;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != DateTime::<Utc>::default().fixed_offset())
            .then_some(PropertyValue::DateTimeOffset(*self))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        to_offset(value, Self::KIND)
    }
}

impl FieldValue for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::DateTimeUtc;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != DateTime::<Utc>::default())
            .then(|| PropertyValue::DateTimeOffset(self.fixed_offset()))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        to_offset(value, Self::KIND).map(|dt| dt.with_timezone(&Utc))
    }
}

impl FieldValue for NaiveDateTime {
    const KIND: FieldKind = FieldKind::NaiveDateTime;

    fn to_property(&self) -> Option<PropertyValue> {
        (*self != NaiveDateTime::default()).then_some(PropertyValue::DateTime(*self))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        to_offset(value, Self::KIND).map(|dt| dt.naive_utc())
    }
}

impl FieldValue for Uuid {
    const KIND: FieldKind = FieldKind::Guid;

    fn to_property(&self) -> Option<PropertyValue> {
        (!self.is_nil()).then_some(PropertyValue::Guid(*self))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Guid(g) => Ok(*g),
            PropertyValue::String(s) => {
                Uuid::parse_str(s.trim()).map_err(|_| unparseable(s, Self::KIND))
            }
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

impl FieldValue for Vec<u8> {
    const KIND: FieldKind = FieldKind::Binary;

    fn to_property(&self) -> Option<PropertyValue> {
        (!self.is_empty()).then(|| PropertyValue::Binary(self.clone()))
    }

    fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
        match value {
            PropertyValue::Binary(bytes) => Ok(bytes.clone()),
            PropertyValue::Null => Err(CoercionError::Null),
            other => Err(incompatible(other, Self::KIND)),
        }
    }
}

/// Nullable fields: `Some(default)` is still written, only `None` is omitted.
macro_rules! impl_nullable {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldValue for Option<$ty> {
                const KIND: FieldKind = <$ty as FieldValue>::KIND;

                fn to_property(&self) -> Option<PropertyValue> {
                    self.as_ref().map(|inner| {
                        inner
                            .to_property()
                            .unwrap_or_else(|| default_property::<$ty>())
                    })
                }

                fn from_property(value: &PropertyValue) -> Result<Self, CoercionError> {
                    if value.is_null() {
                        return Ok(None);
                    }
                    <$ty as FieldValue>::from_property(value).map(Some)
                }
            }
        )*
    };
}

/// The property written for a nullable field holding its inner default.
fn default_property<T: FieldValue>() -> PropertyValue {
    match T::KIND {
        FieldKind::Text => PropertyValue::String(String::new()),
        FieldKind::Int32 => PropertyValue::Int32(0),
        FieldKind::Int64 => PropertyValue::Int64(0),
        FieldKind::Float32 | FieldKind::Float64 => PropertyValue::Double(0.0),
        FieldKind::Decimal => PropertyValue::Decimal(BigDecimal::default()),
        FieldKind::Boolean => PropertyValue::Boolean(false),
        FieldKind::DateTimeOffset | FieldKind::DateTimeUtc => {
            PropertyValue::DateTimeOffset(DateTime::<Utc>::default().fixed_offset())
        }
        FieldKind::NaiveDateTime => PropertyValue::DateTime(NaiveDateTime::default()),
        FieldKind::Guid => PropertyValue::Guid(Uuid::nil()),
        FieldKind::Binary => PropertyValue::Binary(Vec::new()),
    }
}

impl_nullable!(
    String,
    i32,
    i64,
    f32,
    f64,
    BigDecimal,
    bool,
    DateTime<FixedOffset>,
    DateTime<Utc>,
    NaiveDateTime,
    Uuid,
    Vec<u8>,
);
