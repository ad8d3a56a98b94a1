//! Azure Table OData JSON codec for property bags.
//!
//! Used on the wire by the Azure table client, as the row format of the
//! SQLite store, and by the HTTP table endpoints.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use uuid::Uuid;

use super::bag::{is_reserved_name, ETag, PropertyBag, PARTITION_KEY, ROW_KEY, TIMESTAMP};
use super::value::PropertyValue;

const ODATA_ETAG: &str = "odata.etag";
const TYPE_SUFFIX: &str = "@odata.type";

const EDM_INT64: &str = "Edm.Int64";
const EDM_DOUBLE: &str = "Edm.Double";
const EDM_DATETIME: &str = "Edm.DateTime";
const EDM_GUID: &str = "Edm.Guid";
const EDM_BINARY: &str = "Edm.Binary";

#[derive(Debug, Error)]
pub enum ODataError {
    #[error("entity document must be a JSON object")]
    NotAnObject,

    #[error("entity is missing {0}")]
    MissingKey(&'static str),

    #[error("property {name:?}: unsupported type annotation {edm_type:?}")]
    UnknownType { name: String, edm_type: String },

    #[error("property {name:?}: value does not match {edm_type}")]
    InvalidValue { name: String, edm_type: String },

    #[error("property {name:?}: nested arrays and objects are not supported")]
    Nested { name: String },
}

/// Encode a bag as one OData JSON entity.
pub fn to_odata(bag: &PropertyBag) -> Value {
    let mut object = Map::new();
    object.insert(PARTITION_KEY.into(), Value::String(bag.partition_key().into()));
    object.insert(ROW_KEY.into(), Value::String(bag.row_key().into()));
    if let Some(ts) = bag.identity.timestamp {
        object.insert(
            TIMESTAMP.into(),
            Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        );
        annotate(&mut object, TIMESTAMP, EDM_DATETIME);
    }
    if let Some(etag) = bag.etag() {
        object.insert(ODATA_ETAG.into(), Value::String(etag.to_string()));
    }

    for (name, value) in bag.iter() {
        let (json, edm_type) = match value {
            PropertyValue::Null => continue,
            PropertyValue::String(s) => (Value::String(s.clone()), None),
            PropertyValue::Int32(n) => (Value::from(*n), None),
            PropertyValue::Int64(n) => (Value::String(n.to_string()), Some(EDM_INT64)),
            PropertyValue::Double(d) => encode_double(*d),
            PropertyValue::Decimal(d) => (Value::String(d.to_string()), None),
            PropertyValue::Boolean(b) => (Value::Bool(*b), None),
            PropertyValue::DateTimeOffset(dt) => (
                Value::String(
                    dt.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                ),
                Some(EDM_DATETIME),
            ),
            PropertyValue::DateTime(naive) => (
                Value::String(naive.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                Some(EDM_DATETIME),
            ),
            PropertyValue::Guid(g) => (Value::String(g.hyphenated().to_string()), Some(EDM_GUID)),
            PropertyValue::Binary(bytes) => {
                (Value::String(BASE64_STANDARD.encode(bytes)), Some(EDM_BINARY))
            }
        };
        object.insert(name.to_string(), json);
        if let Some(edm_type) = edm_type {
            annotate(&mut object, name, edm_type);
        }
    }
    Value::Object(object)
}

fn annotate(object: &mut Map<String, Value>, name: &str, edm_type: &str) {
    object.insert(format!("{name}{TYPE_SUFFIX}"), Value::String(edm_type.into()));
}

fn encode_double(d: f64) -> (Value, Option<&'static str>) {
    if d.is_nan() {
        return (Value::String("NaN".into()), Some(EDM_DOUBLE));
    }
    if d.is_infinite() {
        let text = if d > 0.0 { "Infinity" } else { "-Infinity" };
        return (Value::String(text.into()), Some(EDM_DOUBLE));
    }
    // from_f64 only fails for non-finite values, handled above.
    let number = Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null);
    let edm_type = (d.fract() == 0.0).then_some(EDM_DOUBLE);
    (number, edm_type)
}

/// Decode one OData JSON entity into a bag.
pub fn from_odata(value: &Value) -> Result<PropertyBag, ODataError> {
    let object = value.as_object().ok_or(ODataError::NotAnObject)?;
    let partition_key = object
        .get(PARTITION_KEY)
        .and_then(Value::as_str)
        .ok_or(ODataError::MissingKey(PARTITION_KEY))?;
    let row_key = object
        .get(ROW_KEY)
        .and_then(Value::as_str)
        .ok_or(ODataError::MissingKey(ROW_KEY))?;

    let mut bag = PropertyBag::new(partition_key, row_key);
    bag.identity.timestamp = object
        .get(TIMESTAMP)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    bag.identity.etag = object.get(ODATA_ETAG).and_then(Value::as_str).map(ETag::new);

    for (name, json) in object {
        if is_reserved_name(name) || name.ends_with(TYPE_SUFFIX) {
            continue;
        }
        let edm_type = object
            .get(&format!("{name}{TYPE_SUFFIX}"))
            .and_then(Value::as_str);
        bag.insert(name.clone(), decode_property(name, json, edm_type)?);
    }
    Ok(bag)
}

fn decode_property(
    name: &str,
    json: &Value,
    edm_type: Option<&str>,
) -> Result<PropertyValue, ODataError> {
    let invalid = |edm_type: &str| ODataError::InvalidValue {
        name: name.to_string(),
        edm_type: edm_type.to_string(),
    };

    match edm_type {
        Some(EDM_INT64) => match json {
            Value::String(s) => s.parse().map(PropertyValue::Int64).map_err(|_| invalid(EDM_INT64)),
            Value::Number(n) => n.as_i64().map(PropertyValue::Int64).ok_or_else(|| invalid(EDM_INT64)),
            _ => Err(invalid(EDM_INT64)),
        },
        Some(EDM_DOUBLE) => match json {
            Value::Number(n) => n.as_f64().map(PropertyValue::Double).ok_or_else(|| invalid(EDM_DOUBLE)),
            Value::String(s) => match s.as_str() {
                "NaN" => Ok(PropertyValue::Double(f64::NAN)),
                "Infinity" => Ok(PropertyValue::Double(f64::INFINITY)),
                "-Infinity" => Ok(PropertyValue::Double(f64::NEG_INFINITY)),
                other => other.parse().map(PropertyValue::Double).map_err(|_| invalid(EDM_DOUBLE)),
            },
            _ => Err(invalid(EDM_DOUBLE)),
        },
        Some(EDM_DATETIME) => json
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(PropertyValue::DateTimeOffset)
            .ok_or_else(|| invalid(EDM_DATETIME)),
        Some(EDM_GUID) => json
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(PropertyValue::Guid)
            .ok_or_else(|| invalid(EDM_GUID)),
        Some(EDM_BINARY) => json
            .as_str()
            .and_then(|s| BASE64_STANDARD.decode(s).ok())
            .map(PropertyValue::Binary)
            .ok_or_else(|| invalid(EDM_BINARY)),
        Some("Edm.String") | Some("Edm.Boolean") | Some("Edm.Int32") | None => {
            decode_untyped(name, json)
        }
        Some(other) => Err(ODataError::UnknownType {
            name: name.to_string(),
            edm_type: other.to_string(),
        }),
    }
}

fn decode_untyped(name: &str, json: &Value) -> Result<PropertyValue, ODataError> {
    match json {
        Value::Null => Ok(PropertyValue::Null),
        Value::Bool(b) => Ok(PropertyValue::Boolean(*b)),
        Value::String(s) => Ok(PropertyValue::String(s.clone())),
        Value::Number(n) => {
            if let Some(small) = n.as_i64().and_then(|v| i32::try_from(v).ok()) {
                Ok(PropertyValue::Int32(small))
            } else {
                Ok(PropertyValue::Double(n.as_f64().unwrap_or_default()))
            }
        }
        Value::Array(_) | Value::Object(_) => Err(ODataError::Nested {
            name: name.to_string(),
        }),
    }
}

/// Turn an arbitrary JSON document into a bag for ingestion.
///
/// `PartitionKey` and `RowKey` members supply the identity when they are
/// non-empty strings; otherwise the partition defaults to
/// `default_partition` and the row key to a fresh v4 UUID. Numbers are
/// stored as doubles, and nested values as their JSON text. System columns
/// and nulls are dropped.
pub fn document_to_bag(document: &Value, default_partition: &str) -> Result<PropertyBag, ODataError> {
    let object = document.as_object().ok_or(ODataError::NotAnObject)?;
    let key = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let partition_key = key(PARTITION_KEY).unwrap_or_else(|| default_partition.to_string());
    let row_key = key(ROW_KEY).unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut bag = PropertyBag::new(partition_key, row_key);
    for (name, json) in object {
        if is_reserved_name(name) {
            continue;
        }
        let value = match json {
            Value::Null => continue,
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::Bool(b) => PropertyValue::Boolean(*b),
            Value::Number(n) => PropertyValue::Double(n.as_f64().unwrap_or_default()),
            nested => PropertyValue::String(nested.to_string()),
        };
        bag.insert(name.clone(), value);
    }
    Ok(bag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::TimeZone;
    use serde_json::json;
    use std::str::FromStr;

    #[test]
    fn test_encode_annotations() {
        let mut bag = PropertyBag::new("Product", "abc");
        bag.insert("Name", PropertyValue::from("Widget"));
        bag.insert("Qty", PropertyValue::Int32(3));
        bag.insert("Big", PropertyValue::Int64(1 << 40));
        bag.insert("Whole", PropertyValue::Double(2.0));
        bag.insert("Price", PropertyValue::Double(19.99));
        bag.insert("Gone", PropertyValue::Null);

        let json = to_odata(&bag);
        assert_eq!(json["PartitionKey"], "Product");
        assert_eq!(json["RowKey"], "abc");
        assert_eq!(json["Name"], "Widget");
        assert_eq!(json["Qty"], 3);
        assert!(json.get("Qty@odata.type").is_none());
        assert_eq!(json["Big"], "1099511627776");
        assert_eq!(json["Big@odata.type"], "Edm.Int64");
        assert_eq!(json["Whole@odata.type"], "Edm.Double");
        assert!(json.get("Price@odata.type").is_none());
        assert!(json.get("Gone").is_none());
    }

    #[test]
    fn test_decode_restores_kinds() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 1, 9, 30, 0).unwrap();
        let guid = Uuid::new_v4();
        let mut bag = PropertyBag::new("p", "r");
        bag.identity.timestamp = Some(ts);
        bag.identity.etag = Some(ETag::from_timestamp(ts));
        bag.insert("Qty", PropertyValue::Int32(3));
        bag.insert("Big", PropertyValue::Int64(-7));
        bag.insert("Whole", PropertyValue::Double(2.0));
        bag.insert("Flag", PropertyValue::Boolean(true));
        bag.insert("When", PropertyValue::DateTimeOffset(ts.fixed_offset()));
        bag.insert("Id", PropertyValue::Guid(guid));
        bag.insert("Raw", PropertyValue::Binary(vec![1, 2, 3]));

        let decoded = from_odata(&to_odata(&bag)).unwrap();
        assert_eq!(decoded.identity, bag.identity);
        assert_eq!(decoded.len(), bag.len());
        for (name, value) in bag.iter() {
            assert_eq!(decoded.get(name), Some(value), "{name}");
        }
    }

    #[test]
    fn test_naive_datetime_travels_as_utc() {
        let ts = Utc.with_ymd_and_hms(2025, 4, 1, 9, 30, 0).unwrap();
        let mut bag = PropertyBag::new("p", "r");
        bag.insert("When", PropertyValue::DateTime(ts.naive_utc()));
        let decoded = from_odata(&to_odata(&bag)).unwrap();
        assert_eq!(
            decoded.get("When"),
            Some(&PropertyValue::DateTimeOffset(ts.fixed_offset()))
        );
    }

    #[test]
    fn test_decimal_travels_as_string() {
        let mut bag = PropertyBag::new("p", "r");
        bag.insert("Price", PropertyValue::Decimal(BigDecimal::from_str("10.50").unwrap()));
        let json = to_odata(&bag);
        assert_eq!(json["Price"], "10.50");
    }

    #[test]
    fn test_decode_rejects_missing_keys_and_unknown_types() {
        assert!(matches!(
            from_odata(&json!({"RowKey": "r"})),
            Err(ODataError::MissingKey("PartitionKey"))
        ));
        assert!(matches!(
            from_odata(&json!({"PartitionKey": "p", "RowKey": "r", "X": "1", "X@odata.type": "Edm.Money"})),
            Err(ODataError::UnknownType { .. })
        ));
        assert!(matches!(
            from_odata(&json!([1, 2])),
            Err(ODataError::NotAnObject)
        ));
    }

    #[test]
    fn test_decode_large_unannotated_number_is_double() {
        let bag = from_odata(&json!({"PartitionKey": "p", "RowKey": "r", "N": 5_000_000_000i64})).unwrap();
        assert_eq!(bag.get("N"), Some(&PropertyValue::Double(5_000_000_000.0)));
    }

    #[test]
    fn test_document_to_bag_defaults_identity() {
        let doc = json!({
            "ProductName": "Widget",
            "Price": 19.99,
            "StockQuantity": 3,
            "Active": true,
            "Tags": ["a", "b"],
            "Missing": null,
            "Timestamp": "ignored"
        });
        let bag = document_to_bag(&doc, "Product").unwrap();
        assert_eq!(bag.partition_key(), "Product");
        assert!(Uuid::parse_str(bag.row_key()).is_ok());
        assert_eq!(bag.get("StockQuantity"), Some(&PropertyValue::Double(3.0)));
        assert_eq!(bag.get("Active"), Some(&PropertyValue::Boolean(true)));
        assert_eq!(bag.get("Tags"), Some(&PropertyValue::from("[\"a\",\"b\"]")));
        assert!(!bag.contains("Missing"));
        assert!(!bag.contains("Timestamp"));
    }

    #[test]
    fn test_document_to_bag_keeps_given_identity() {
        let doc = json!({"PartitionKey": "VIP", "RowKey": "c-1", "FullName": "Ada"});
        let bag = document_to_bag(&doc, "Customer").unwrap();
        assert_eq!(bag.partition_key(), "VIP");
        assert_eq!(bag.row_key(), "c-1");
        assert_eq!(bag.len(), 1);
    }
}
