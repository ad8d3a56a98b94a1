//! In-memory table store.
//!
//! Stores all entities in memory with no persistence. Useful for testing
//! and ephemeral deployments. Uses `RwLock<HashMap>` for thread-safe access.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{
    stamp, validate_keys, validate_table_name, TableError, TableResult, TableStore, UpdateMode,
    WriteClock,
};
use crate::entity::{ETag, PropertyBag};

type EntityKey = (String, String);
type Table = BTreeMap<EntityKey, PropertyBag>;

pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, Table>>,
    clock: WriteClock,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            clock: WriteClock::default(),
        }
    }
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of(bag: &PropertyBag) -> EntityKey {
    (bag.partition_key().to_string(), bag.row_key().to_string())
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, Table>,
    table: &str,
) -> TableResult<&'a mut Table> {
    tables
        .get_mut(table)
        .ok_or_else(|| TableError::TableNotFound(table.to_string()))
}

impl TableStore for MemoryTableStore {
    fn create_table(
        &self,
        table: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<bool>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_table_name(&table)?;
            let mut tables = self.tables.write().expect("rwlock poisoned");
            if tables.contains_key(&table) {
                return Ok(false);
            }
            tables.insert(table, Table::new());
            Ok(true)
        })
    }

    fn list_tables(&self) -> Pin<Box<dyn Future<Output = TableResult<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let tables = self.tables.read().expect("rwlock poisoned");
            let mut names: Vec<String> = tables.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn add_entity(
        &self,
        table: &str,
        mut bag: PropertyBag,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_keys(&bag)?;
            let mut tables = self.tables.write().expect("rwlock poisoned");
            let rows = table_mut(&mut tables, &table)?;
            let key = key_of(&bag);
            if rows.contains_key(&key) {
                return Err(TableError::already_exists(&table, &bag));
            }
            let etag = stamp(&mut bag, self.clock.tick());
            rows.insert(key, bag);
            Ok(etag)
        })
    }

    fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<Option<PropertyBag>>> + Send + '_>> {
        let table = table.to_string();
        let key = (partition_key.to_string(), row_key.to_string());
        Box::pin(async move {
            let tables = self.tables.read().expect("rwlock poisoned");
            let rows = tables
                .get(&table)
                .ok_or_else(|| TableError::TableNotFound(table.clone()))?;
            Ok(rows.get(&key).cloned())
        })
    }

    fn update_entity(
        &self,
        table: &str,
        bag: PropertyBag,
        etag: &ETag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        let etag = etag.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().expect("rwlock poisoned");
            let rows = table_mut(&mut tables, &table)?;
            let key = key_of(&bag);
            let Some(stored) = rows.get_mut(&key) else {
                return Err(TableError::not_found(&table, &key.0, &key.1));
            };
            let current = stored.etag().cloned().unwrap_or_else(ETag::any);
            if !etag.matches(&current) {
                return Err(TableError::precondition_failed(&table, &key.0, &key.1));
            }
            let ts = self.clock.tick();
            Ok(apply_write(stored, bag, mode, ts))
        })
    }

    fn upsert_entity(
        &self,
        table: &str,
        mut bag: PropertyBag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_keys(&bag)?;
            let mut tables = self.tables.write().expect("rwlock poisoned");
            let rows = table_mut(&mut tables, &table)?;
            let key = key_of(&bag);
            let ts = self.clock.tick();
            match rows.get_mut(&key) {
                Some(stored) => Ok(apply_write(stored, bag, mode, ts)),
                None => {
                    let etag = stamp(&mut bag, ts);
                    rows.insert(key, bag);
                    Ok(etag)
                }
            }
        })
    }

    fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        etag: &ETag,
    ) -> Pin<Box<dyn Future<Output = TableResult<()>> + Send + '_>> {
        let table = table.to_string();
        let key = (partition_key.to_string(), row_key.to_string());
        let etag = etag.clone();
        Box::pin(async move {
            let mut tables = self.tables.write().expect("rwlock poisoned");
            let rows = table_mut(&mut tables, &table)?;
            if let Some(stored) = rows.get(&key) {
                let current = stored.etag().cloned().unwrap_or_else(ETag::any);
                if !etag.matches(&current) {
                    return Err(TableError::precondition_failed(&table, &key.0, &key.1));
                }
                rows.remove(&key);
            }
            Ok(())
        })
    }

    fn query(
        &self,
        table: &str,
        partition_key: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = TableResult<Vec<PropertyBag>>> + Send + '_>> {
        let table = table.to_string();
        let partition_key = partition_key.map(str::to_string);
        Box::pin(async move {
            let tables = self.tables.read().expect("rwlock poisoned");
            let rows = tables
                .get(&table)
                .ok_or_else(|| TableError::TableNotFound(table.clone()))?;
            let bags = rows
                .iter()
                .filter(|((pk, _), _)| partition_key.as_deref().map_or(true, |want| pk == want))
                .map(|(_, bag)| bag.clone())
                .collect();
            Ok(bags)
        })
    }
}

/// Replace or merge `incoming` into `stored` and restamp it.
fn apply_write(
    stored: &mut PropertyBag,
    incoming: PropertyBag,
    mode: UpdateMode,
    ts: chrono::DateTime<chrono::Utc>,
) -> ETag {
    match mode {
        UpdateMode::Replace => *stored = incoming,
        UpdateMode::Merge => stored.merge_from(&incoming),
    }
    stamp(stored, ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PropertyValue;

    async fn test_store() -> MemoryTableStore {
        let store = MemoryTableStore::new();
        store.create_table("Product").await.unwrap();
        store
    }

    fn make_bag(pk: &str, rk: &str, name: &str) -> PropertyBag {
        let mut bag = PropertyBag::new(pk, rk);
        bag.insert("ProductName", PropertyValue::from(name));
        bag
    }

    #[tokio::test]
    async fn test_create_table_idempotent() {
        let store = MemoryTableStore::new();
        assert!(store.create_table("Product").await.unwrap());
        assert!(!store.create_table("Product").await.unwrap());
        assert_eq!(store.list_tables().await.unwrap(), vec!["Product".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = MemoryTableStore::new();
        let err = store.get_entity("Missing", "p", "r").await.unwrap_err();
        assert!(matches!(err, TableError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_add_and_get_entity() {
        let store = test_store().await;
        let etag = store
            .add_entity("Product", make_bag("Product", "a", "Widget"))
            .await
            .unwrap();

        let fetched = store.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert_eq!(fetched.get("ProductName"), Some(&PropertyValue::from("Widget")));
        assert_eq!(fetched.etag(), Some(&etag));
        assert!(fetched.identity.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_add_conflict() {
        let store = test_store().await;
        store.add_entity("Product", make_bag("Product", "a", "one")).await.unwrap();
        let err = store
            .add_entity("Product", make_bag("Product", "a", "two"))
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::EntityAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = test_store().await;
        assert!(store.get_entity("Product", "Product", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_checks_etag() {
        let store = test_store().await;
        let first = store.add_entity("Product", make_bag("Product", "a", "v1")).await.unwrap();
        let second = store
            .update_entity("Product", make_bag("Product", "a", "v2"), &first, UpdateMode::Replace)
            .await
            .unwrap();
        assert_ne!(first, second);

        let err = store
            .update_entity("Product", make_bag("Product", "a", "v3"), &first, UpdateMode::Replace)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::PreconditionFailed { .. }));

        store
            .update_entity("Product", make_bag("Product", "a", "v4"), &ETag::any(), UpdateMode::Replace)
            .await
            .unwrap();
        let fetched = store.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert_eq!(fetched.get("ProductName"), Some(&PropertyValue::from("v4")));
    }

    #[tokio::test]
    async fn test_update_missing_entity() {
        let store = test_store().await;
        let err = store
            .update_entity("Product", make_bag("Product", "x", "v"), &ETag::any(), UpdateMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn test_merge_keeps_unlisted_properties() {
        let store = test_store().await;
        let mut bag = make_bag("Product", "a", "Widget");
        bag.insert("Category", PropertyValue::from("Tools"));
        store.add_entity("Product", bag).await.unwrap();

        let mut patch = PropertyBag::new("Product", "a");
        patch.insert("Category", PropertyValue::from("Garden"));
        store
            .upsert_entity("Product", patch.clone(), UpdateMode::Merge)
            .await
            .unwrap();
        let merged = store.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert_eq!(merged.get("ProductName"), Some(&PropertyValue::from("Widget")));
        assert_eq!(merged.get("Category"), Some(&PropertyValue::from("Garden")));

        store.upsert_entity("Product", patch, UpdateMode::Replace).await.unwrap();
        let replaced = store.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert!(!replaced.contains("ProductName"));
    }

    #[tokio::test]
    async fn test_delete_is_noop_when_missing() {
        let store = test_store().await;
        store.delete_entity("Product", "Product", "gone", &ETag::any()).await.unwrap();

        let etag = store.add_entity("Product", make_bag("Product", "a", "v")).await.unwrap();
        let err = store
            .delete_entity("Product", "Product", "a", &ETag::new("W/\"stale\""))
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::PreconditionFailed { .. }));
        store.delete_entity("Product", "Product", "a", &etag).await.unwrap();
        assert!(store.get_entity("Product", "Product", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_orders_and_filters() {
        let store = test_store().await;
        for (pk, rk) in [("b", "2"), ("a", "9"), ("b", "1"), ("a", "0")] {
            store.add_entity("Product", make_bag(pk, rk, "x")).await.unwrap();
        }
        let all = store.query("Product", None).await.unwrap();
        let keys: Vec<(&str, &str)> = all.iter().map(|b| (b.partition_key(), b.row_key())).collect();
        assert_eq!(keys, vec![("a", "0"), ("a", "9"), ("b", "1"), ("b", "2")]);

        let only_b = store.query("Product", Some("b")).await.unwrap();
        assert_eq!(only_b.len(), 2);
        assert!(only_b.iter().all(|b| b.partition_key() == "b"));
    }

    #[tokio::test]
    async fn test_rejects_bad_keys() {
        let store = test_store().await;
        let err = store
            .add_entity("Product", make_bag("Pro/duct", "a", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::InvalidKey(_)));
    }
}
