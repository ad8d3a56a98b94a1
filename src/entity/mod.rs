//! Entity mapping between typed records and untyped table rows.
//!
//! A record type declares its persisted fields once in an
//! [`EntitySchema`](schema::EntitySchema). The [`EntityMapper`](mapper::EntityMapper)
//! built from it flattens records into [`PropertyBag`](bag::PropertyBag)s
//! for writing and rebuilds them on read, coercing every stored value into
//! the declared field type. [`odata`] carries bags over the wire.

pub mod bag;
pub mod coerce;
pub mod mapper;
pub mod odata;
pub mod schema;
pub mod value;

pub use bag::{ETag, EntityIdentity, PropertyBag};
pub use coerce::{CoercionError, FieldKind, FieldValue};
pub use mapper::{EntityMapper, ReadPath, Reconstructed, SkippedField, StrictMismatch};
pub use schema::{EntitySchema, SchemaError, TableEntity};
pub use value::{PropertyValue, ValueKind};
