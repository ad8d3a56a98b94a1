//! Abstract table store trait.
//!
//! Any table backend must implement [`TableStore`]. Like the rest of the
//! crate's storage seams, the trait uses manually desugared async methods
//! (pinned boxed futures) so it stays object-safe behind `Arc<dyn _>`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::entity::odata::ODataError;
use crate::entity::{ETag, PropertyBag, SchemaError};

/// Errors surfaced by table stores and the typed service on top of them.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    #[error("entity {partition_key}/{row_key} already exists in {table}")]
    EntityAlreadyExists {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("entity {partition_key}/{row_key} not found in {table}")]
    EntityNotFound {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error("entity {partition_key}/{row_key} in {table} was modified concurrently")]
    PreconditionFailed {
        table: String,
        partition_key: String,
        row_key: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Wire(#[from] ODataError),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl TableError {
    pub(crate) fn already_exists(table: &str, bag: &PropertyBag) -> Self {
        TableError::EntityAlreadyExists {
            table: table.to_string(),
            partition_key: bag.partition_key().to_string(),
            row_key: bag.row_key().to_string(),
        }
    }

    pub(crate) fn not_found(table: &str, partition_key: &str, row_key: &str) -> Self {
        TableError::EntityNotFound {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }

    pub(crate) fn precondition_failed(table: &str, partition_key: &str, row_key: &str) -> Self {
        TableError::PreconditionFailed {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
        }
    }
}

pub type TableResult<T> = Result<T, TableError>;

/// How an update combines the new bag with the stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// The new bag replaces every user property.
    #[default]
    Replace,
    /// New properties overlay the stored ones; absent ones are kept.
    Merge,
}

/// Table names: 3-63 ASCII alphanumerics, starting with a letter.
pub fn validate_table_name(table: &str) -> TableResult<()> {
    let valid = (3..=63).contains(&table.len())
        && table.starts_with(|c: char| c.is_ascii_alphabetic())
        && table.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(TableError::InvalidTableName(table.to_string()))
    }
}

/// Keys may not contain `/`, `\`, `#`, `?` or control characters.
pub fn validate_keys(bag: &PropertyBag) -> TableResult<()> {
    for key in [bag.partition_key(), bag.row_key()] {
        if key.len() > 1024
            || key
                .chars()
                .any(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control())
        {
            return Err(TableError::InvalidKey(key.to_string()));
        }
    }
    Ok(())
}

/// Issues strictly increasing write timestamps, so consecutive writes to the
/// same entity always get distinct ETags.
#[derive(Debug, Default)]
pub(crate) struct WriteClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl WriteClock {
    pub(crate) fn tick(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().expect("mutex poisoned");
        let mut now = Utc::now();
        if let Some(prev) = *last {
            if now <= prev {
                now = prev + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}

/// Assign the write timestamp and the ETag derived from it.
pub(crate) fn stamp(bag: &mut PropertyBag, ts: DateTime<Utc>) -> ETag {
    let etag = ETag::from_timestamp(ts);
    bag.identity.timestamp = Some(ts);
    bag.identity.etag = Some(etag.clone());
    etag
}

/// Async key-value table contract, keyed by (table, partition key, row key).
///
/// Every write assigns a fresh timestamp and ETag and returns the ETag.
/// Operations on a table that was never created fail with
/// [`TableError::TableNotFound`].
pub trait TableStore: Send + Sync + 'static {
    /// Create a table if it does not exist. Returns true when newly created.
    fn create_table(
        &self,
        table: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<bool>> + Send + '_>>;

    /// All table names, sorted.
    fn list_tables(&self) -> Pin<Box<dyn Future<Output = TableResult<Vec<String>>> + Send + '_>>;

    /// Insert a new entity; fails if the key is taken.
    fn add_entity(
        &self,
        table: &str,
        bag: PropertyBag,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>>;

    /// Point lookup. A missing entity is `Ok(None)`.
    fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<Option<PropertyBag>>> + Send + '_>>;

    /// Conditional update of an existing entity.
    ///
    /// `etag` must match the stored ETag unless it is [`ETag::any`].
    fn update_entity(
        &self,
        table: &str,
        bag: PropertyBag,
        etag: &ETag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>>;

    /// Insert, or update unconditionally.
    fn upsert_entity(
        &self,
        table: &str,
        bag: PropertyBag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>>;

    /// Delete an entity. Deleting a missing entity is a no-op.
    fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        etag: &ETag,
    ) -> Pin<Box<dyn Future<Output = TableResult<()>> + Send + '_>>;

    /// Scan a table, optionally limited to one partition, ordered by
    /// (partition key, row key).
    fn query(
        &self,
        table: &str,
        partition_key: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = TableResult<Vec<PropertyBag>>> + Send + '_>>;
}
