//! Typed CRUD over one table.
//!
//! [`TableService`] pairs a [`TableStore`] with the [`EntityMapper`] of one
//! record type. Writes flatten the record; reads decode strictly and fall back
//! to reconstruction when the stored values do not match the record's types.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use super::store::{TableResult, TableStore, UpdateMode};
use crate::entity::{ETag, EntityMapper, PropertyBag, ReadPath, TableEntity};
use crate::metrics::{
    ENTITY_FALLBACK_READS_TOTAL, ENTITY_SKIPPED_FIELDS_TOTAL, TABLE_OPERATIONS_TOTAL,
};

pub struct TableService<T> {
    store: Arc<dyn TableStore>,
    table: String,
    mapper: EntityMapper<T>,
}

impl<T: TableEntity> TableService<T> {
    /// Build the service and make sure its table exists.
    pub async fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> TableResult<Self> {
        let table = table.into();
        let mapper = EntityMapper::<T>::new()?;
        if store.create_table(&table).await? {
            debug!("Created table {}", table);
        }
        Ok(Self {
            store,
            table,
            mapper,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn mapper(&self) -> &EntityMapper<T> {
        &self.mapper
    }

    fn record_op<R>(&self, operation: &'static str, result: &TableResult<R>) {
        let status = if result.is_ok() { "ok" } else { "error" };
        counter!(
            TABLE_OPERATIONS_TOTAL,
            "table" => self.table.clone(),
            "operation" => operation,
            "status" => status
        )
        .increment(1);
    }

    /// Insert `record` under its own identity. Returns the new ETag.
    pub async fn add_entity(&self, record: &T) -> TableResult<ETag> {
        let bag = self.mapper.flatten_entity(record);
        let result = self.store.add_entity(&self.table, bag).await;
        self.record_op("add", &result);
        result
    }

    pub async fn get_entity(&self, partition_key: &str, row_key: &str) -> TableResult<Option<T>> {
        let result = self.get_inner(partition_key, row_key).await;
        self.record_op("get", &result);
        result
    }

    async fn get_inner(&self, partition_key: &str, row_key: &str) -> TableResult<Option<T>> {
        let Some(bag) = self
            .store
            .get_entity(&self.table, partition_key, row_key)
            .await?
        else {
            return Ok(None);
        };
        let (record, path) = self.mapper.decode(&bag);
        if path == ReadPath::Fallback {
            self.note_fallback(std::slice::from_ref(&bag));
        }
        Ok(Some(record))
    }

    /// Every entity in the table, ordered by (partition key, row key).
    pub async fn get_all_entities(&self) -> TableResult<Vec<T>> {
        let result = self.scan(None).await;
        self.record_op("get_all", &result);
        result
    }

    pub async fn query_partition(&self, partition_key: &str) -> TableResult<Vec<T>> {
        let result = self.scan(Some(partition_key)).await;
        self.record_op("query", &result);
        result
    }

    async fn scan(&self, partition_key: Option<&str>) -> TableResult<Vec<T>> {
        let bags = self.store.query(&self.table, partition_key).await?;
        let (records, path) = self.mapper.decode_all(&bags);
        if path == ReadPath::Fallback {
            self.note_fallback(&bags);
        }
        Ok(records)
    }

    /// Replace the stored entity, conditional on the record's ETag (or any
    /// version when the record carries none).
    pub async fn update_entity(&self, record: &T) -> TableResult<ETag> {
        let bag = self.mapper.flatten_entity(record);
        let etag = bag.etag().cloned().unwrap_or_else(ETag::any);
        let result = self
            .store
            .update_entity(&self.table, bag, &etag, UpdateMode::Replace)
            .await;
        self.record_op("update", &result);
        result
    }

    /// Insert or replace `record` unconditionally.
    pub async fn upsert_entity(&self, record: &T) -> TableResult<ETag> {
        let bag = self.mapper.flatten_entity(record);
        let result = self
            .store
            .upsert_entity(&self.table, bag, UpdateMode::Replace)
            .await;
        self.record_op("upsert", &result);
        result
    }

    /// Delete unconditionally. Missing entities are ignored.
    pub async fn delete_entity(&self, partition_key: &str, row_key: &str) -> TableResult<()> {
        let result = self
            .store
            .delete_entity(&self.table, partition_key, row_key, &ETag::any())
            .await;
        self.record_op("delete", &result);
        result
    }

    fn note_fallback(&self, bags: &[PropertyBag]) {
        let entity = self.mapper.schema().type_name();
        warn!(
            "Strict decode of {} failed in table {}; reconstructing {} entities field by field",
            entity,
            self.table,
            bags.len()
        );
        counter!(ENTITY_FALLBACK_READS_TOTAL, "entity" => entity).increment(1);

        for bag in bags {
            for skipped in self.mapper.reconstruct_with_report(bag).skipped {
                debug!(
                    entity,
                    partition_key = bag.partition_key(),
                    row_key = bag.row_key(),
                    field = skipped.name,
                    found = %skipped.found,
                    reason = %skipped.reason,
                    "Dropped stored value"
                );
                counter!(ENTITY_SKIPPED_FIELDS_TOTAL, "entity" => entity, "field" => skipped.name)
                    .increment(1);
            }
        }
    }
}
