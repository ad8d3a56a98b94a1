//! Typed record <-> property bag conversion.
//!
//! [`EntityMapper`] is built once per record type from its
//! [`EntitySchema`]. It is stateless after construction and can be shared
//! across tasks.
//!
//! Reads have two paths:
//! - strict: every stored field must already hold its declared type's
//!   native kind;
//! - reconstruct: the schema is walked field by field and every stored value
//!   is coerced, skipping the ones that do not fit.
//!
//! [`EntityMapper::decode`] and [`EntityMapper::decode_all`] try the strict
//! path first and fall back to reconstruct on a type mismatch.

use thiserror::Error;

use super::bag::PropertyBag;
use super::coerce::{CoercionError, FieldKind};
use super::schema::{EntitySchema, SchemaError, TableEntity};
use super::value::ValueKind;

/// A stored value that [`EntityMapper::reconstruct`] could not assign.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedField {
    pub name: &'static str,
    pub declared: FieldKind,
    pub found: ValueKind,
    pub reason: CoercionError,
}

/// Output of a reconstruct pass with its diagnostics.
#[derive(Debug)]
pub struct Reconstructed<T> {
    pub record: T,
    pub skipped: Vec<SkippedField>,
}

/// Which path produced a decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    Strict,
    Fallback,
}

/// First field that kept a bag off the strict read path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field {field:?} declared {declared:?} holds {found}")]
pub struct StrictMismatch {
    pub field: &'static str,
    pub declared: FieldKind,
    pub found: ValueKind,
}

pub struct EntityMapper<T> {
    schema: EntitySchema<T>,
}

impl<T: TableEntity> EntityMapper<T> {
    /// Build the mapper from `T::schema()`.
    pub fn new() -> Result<Self, SchemaError> {
        Self::from_schema(T::schema())
    }

    pub fn from_schema(schema: EntitySchema<T>) -> Result<Self, SchemaError> {
        schema.validate()?;
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &EntitySchema<T> {
        &self.schema
    }

    /// Flatten `record` into a bag addressed by the given identity.
    ///
    /// Only fields whose value differs from the field type's default are
    /// written. Identity and system fields are never part of the field set.
    pub fn flatten(
        &self,
        record: &T,
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
    ) -> PropertyBag {
        let mut bag = PropertyBag::new(partition_key, row_key);
        self.write_fields(record, &mut bag);
        bag
    }

    /// Flatten using the record's own identity, carrying its ETag along so
    /// the bag can be used for a conditional update.
    pub fn flatten_entity(&self, record: &T) -> PropertyBag {
        let mut bag = PropertyBag::with_identity(record.identity().clone());
        self.write_fields(record, &mut bag);
        bag
    }

    fn write_fields(&self, record: &T, bag: &mut PropertyBag) {
        for spec in self.schema.fields() {
            if let Some(value) = spec.read(record) {
                bag.insert(spec.name(), value);
            }
        }
    }

    /// Rebuild a record from `bag`. Never fails; see
    /// [`reconstruct_with_report`](Self::reconstruct_with_report).
    pub fn reconstruct(&self, bag: &PropertyBag) -> T {
        self.reconstruct_with_report(bag).record
    }

    /// Rebuild a record and report every stored value that was dropped.
    ///
    /// Absent and null properties leave the field at `T::default()` and are
    /// not reported. Identity, timestamp and ETag are copied from the bag's
    /// identity, bypassing coercion.
    pub fn reconstruct_with_report(&self, bag: &PropertyBag) -> Reconstructed<T> {
        let mut record = T::default();
        let mut skipped = Vec::new();

        for spec in self.schema.fields() {
            let Some(value) = bag.get_non_null(spec.name()) else {
                continue;
            };
            if let Err(reason) = spec.write(&mut record, value) {
                skipped.push(SkippedField {
                    name: spec.name(),
                    declared: spec.kind(),
                    found: value.kind(),
                    reason,
                });
            }
        }

        *record.identity_mut() = bag.identity.clone();
        Reconstructed { record, skipped }
    }
}

impl<T: TableEntity> EntityMapper<T> {
    /// Decode `bag` requiring every present field to hold its native kind.
    ///
    /// The record is built through the same setters as
    /// [`reconstruct`](Self::reconstruct), so a bag that decodes strictly
    /// yields the same record either way. Properties outside the schema are
    /// ignored.
    pub fn decode_strict(&self, bag: &PropertyBag) -> Result<T, StrictMismatch> {
        let mut record = T::default();
        for spec in self.schema.fields() {
            let Some(value) = bag.get_non_null(spec.name()) else {
                continue;
            };
            let mismatch = || StrictMismatch {
                field: spec.name(),
                declared: spec.kind(),
                found: value.kind(),
            };
            if !spec.kind().is_native(value.kind()) {
                return Err(mismatch());
            }
            spec.write(&mut record, value).map_err(|_| mismatch())?;
        }
        *record.identity_mut() = bag.identity.clone();
        Ok(record)
    }

    /// Decode one bag, falling back to [`reconstruct`](Self::reconstruct)
    /// when the strict decode hits a type mismatch.
    pub fn decode(&self, bag: &PropertyBag) -> (T, ReadPath) {
        match self.decode_strict(bag) {
            Ok(record) => (record, ReadPath::Strict),
            Err(_) => (self.reconstruct(bag), ReadPath::Fallback),
        }
    }

    /// Decode a scan. A single type mismatch anywhere switches the whole scan
    /// to the reconstruct path.
    pub fn decode_all(&self, bags: &[PropertyBag]) -> (Vec<T>, ReadPath) {
        let strict: Result<Vec<T>, StrictMismatch> =
            bags.iter().map(|bag| self.decode_strict(bag)).collect();
        match strict {
            Ok(records) => (records, ReadPath::Strict),
            Err(_) => (
                bags.iter().map(|bag| self.reconstruct(bag)).collect(),
                ReadPath::Fallback,
            ),
        }
    }
}
