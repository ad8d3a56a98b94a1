//! Explicit per-type field schemas.
//!
//! Each record type lists its persisted fields once, as name plus accessor
//! pair. The schema owns the read/write closures the mapper walks, so the
//! coercion rule for every field is fixed by its Rust type at compile time.

use thiserror::Error;

use super::bag::{is_reserved_name, EntityIdentity};
use super::coerce::{CoercionError, FieldKind, FieldValue};
use super::value::PropertyValue;

/// A malformed record schema. Always a programming error, never a runtime one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("{type_name}: field name must not be empty")]
    EmptyName { type_name: &'static str },

    #[error("{type_name}: field {field:?} collides with an identity or system column")]
    ReservedField {
        type_name: &'static str,
        field: &'static str,
    },

    #[error("{type_name}: field {field:?} declared twice")]
    DuplicateField {
        type_name: &'static str,
        field: &'static str,
    },
}

type ReadFn<T> = Box<dyn Fn(&T) -> Option<PropertyValue> + Send + Sync>;
type WriteFn<T> = Box<dyn Fn(&mut T, &PropertyValue) -> Result<(), CoercionError> + Send + Sync>;

/// One persisted field: its property name, declared kind and accessors.
pub struct FieldSpec<T> {
    name: &'static str,
    kind: FieldKind,
    read: ReadFn<T>,
    write: WriteFn<T>,
}

impl<T> FieldSpec<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Current value as a property, or `None` when it is the type default.
    pub fn read(&self, record: &T) -> Option<PropertyValue> {
        (self.read)(record)
    }

    /// Coerce `value` and assign it. On error the record is untouched.
    pub fn write(&self, record: &mut T, value: &PropertyValue) -> Result<(), CoercionError> {
        (self.write)(record, value)
    }
}

impl<T> std::fmt::Debug for FieldSpec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Ordered list of persisted fields for one record type.
///
/// Built with [`EntitySchema::new`] and chained [`field`](EntitySchema::field)
/// calls; validated by [`EntitySchema::validate`] when a mapper is created.
pub struct EntitySchema<T> {
    type_name: &'static str,
    fields: Vec<FieldSpec<T>>,
}

impl<T: 'static> EntitySchema<T> {
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            fields: Vec::new(),
        }
    }

    /// Declare a persisted field backed by `get`/`get_mut` accessors.
    pub fn field<F>(mut self, name: &'static str, get: fn(&T) -> &F, get_mut: fn(&mut T) -> &mut F) -> Self
    where
        F: FieldValue + 'static,
    {
        self.fields.push(FieldSpec {
            name,
            kind: F::KIND,
            read: Box::new(move |record: &T| get(record).to_property()),
            write: Box::new(move |record: &mut T, value: &PropertyValue| {
                let coerced = F::from_property(value)?;
                *get_mut(record) = coerced;
                Ok(())
            }),
        });
        self
    }
}

impl<T> EntitySchema<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[FieldSpec<T>] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }

    /// Reject empty, duplicate, and reserved field names.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let type_name = self.type_name;
        for (idx, spec) in self.fields.iter().enumerate() {
            if spec.name.is_empty() {
                return Err(SchemaError::EmptyName { type_name });
            }
            if is_reserved_name(spec.name) {
                return Err(SchemaError::ReservedField {
                    type_name,
                    field: spec.name,
                });
            }
            if self.fields[..idx].iter().any(|f| f.name == spec.name) {
                return Err(SchemaError::DuplicateField {
                    type_name,
                    field: spec.name,
                });
            }
        }
        Ok(())
    }
}

/// A record type that can be stored in a table.
///
/// Identity lives in an [`EntityIdentity`] the record exposes by reference;
/// every other persisted field is declared in [`TableEntity::schema`].
pub trait TableEntity: Default + Send + Sync + 'static {
    fn identity(&self) -> &EntityIdentity;

    fn identity_mut(&mut self) -> &mut EntityIdentity;

    fn schema() -> EntitySchema<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        name: String,
        qty: i32,
    }

    #[test]
    fn test_field_accessors_read_and_write() {
        let schema = EntitySchema::<Probe>::new("Probe")
            .field("Name", |p| &p.name, |p| &mut p.name)
            .field("Qty", |p| &p.qty, |p| &mut p.qty);
        assert!(schema.validate().is_ok());
        assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["Name", "Qty"]);

        let mut probe = Probe::default();
        let qty = &schema.fields()[1];
        assert_eq!(qty.kind(), FieldKind::Int32);
        assert!(qty.read(&probe).is_none());
        qty.write(&mut probe, &PropertyValue::from("12")).unwrap();
        assert_eq!(probe.qty, 12);
        assert_eq!(qty.read(&probe), Some(PropertyValue::Int32(12)));
    }

    #[test]
    fn test_failed_write_leaves_field_untouched() {
        let schema = EntitySchema::<Probe>::new("Probe").field("Qty", |p| &p.qty, |p| &mut p.qty);
        let mut probe = Probe { qty: 7, ..Default::default() };
        assert!(schema.fields()[0]
            .write(&mut probe, &PropertyValue::from("abc"))
            .is_err());
        assert_eq!(probe.qty, 7);
    }

    #[test]
    fn test_validate_rejects_reserved() {
        let schema =
            EntitySchema::<Probe>::new("Probe").field("RowKey", |p| &p.name, |p| &mut p.name);
        assert_eq!(
            schema.validate(),
            Err(SchemaError::ReservedField {
                type_name: "Probe",
                field: "RowKey"
            })
        );
    }

    #[test]
    fn test_validate_rejects_duplicates_and_empty() {
        let dup = EntitySchema::<Probe>::new("Probe")
            .field("Name", |p| &p.name, |p| &mut p.name)
            .field("Name", |p| &p.name, |p| &mut p.name);
        assert!(matches!(
            dup.validate(),
            Err(SchemaError::DuplicateField { field: "Name", .. })
        ));

        let empty = EntitySchema::<Probe>::new("Probe").field("", |p| &p.name, |p| &mut p.name);
        assert!(matches!(empty.validate(), Err(SchemaError::EmptyName { .. })));
    }
}
