//! SQLite-backed table store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required. All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Each entity is one row in `entities`, holding its OData JSON encoding.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{
    stamp, validate_keys, validate_table_name, TableError, TableResult, TableStore, UpdateMode,
    WriteClock,
};
use crate::entity::odata::{from_odata, to_odata};
use crate::entity::{ETag, PropertyBag};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Table store backed by a single SQLite database file.
pub struct SqliteTableStore {
    conn: Mutex<Connection>,
    clock: WriteClock,
}

fn backend(err: rusqlite::Error) -> TableError {
    TableError::Backend(err.into())
}

impl SqliteTableStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            clock: WriteClock::default(),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the schema if it does not already exist. Idempotent.
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tables (
                name       TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entities (
                table_name    TEXT NOT NULL,
                partition_key TEXT NOT NULL,
                row_key       TEXT NOT NULL,
                etag          TEXT NOT NULL,
                body          TEXT NOT NULL,

                PRIMARY KEY (table_name, partition_key, row_key),
                FOREIGN KEY (table_name) REFERENCES tables(name) ON DELETE CASCADE
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |v| v < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_rfc3339()],
            )?;
        }
        Ok(())
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn require_table(conn: &Connection, table: &str) -> TableResult<()> {
    let exists = conn
        .query_row("SELECT 1 FROM tables WHERE name = ?1", params![table], |_| Ok(()))
        .optional()
        .map_err(backend)?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(TableError::TableNotFound(table.to_string()))
    }
}

fn load(
    conn: &Connection,
    table: &str,
    partition_key: &str,
    row_key: &str,
) -> TableResult<Option<PropertyBag>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM entities
             WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
            params![table, partition_key, row_key],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    body.map(|b| decode_body(&b)).transpose()
}

fn decode_body(body: &str) -> TableResult<PropertyBag> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| TableError::Backend(e.into()))?;
    Ok(from_odata(&json)?)
}

fn save(conn: &Connection, table: &str, bag: &PropertyBag, etag: &ETag) -> TableResult<()> {
    let body = to_odata(bag).to_string();
    conn.execute(
        "INSERT OR REPLACE INTO entities (table_name, partition_key, row_key, etag, body)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![table, bag.partition_key(), bag.row_key(), etag.as_str(), body],
    )
    .map_err(backend)?;
    Ok(())
}

impl TableStore for SqliteTableStore {
    fn create_table(
        &self,
        table: &str,
    ) -> Pin<Box<dyn Future<Output = TableResult<bool>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_table_name(&table)?;
            let conn = self.conn.lock().expect("mutex poisoned");
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO tables (name, created_at) VALUES (?1, ?2)",
                    params![table, now_rfc3339()],
                )
                .map_err(backend)?;
            Ok(inserted == 1)
        })
    }

    fn list_tables(&self) -> Pin<Box<dyn Future<Output = TableResult<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let mut stmt = conn
                .prepare("SELECT name FROM tables ORDER BY name")
                .map_err(backend)?;
            let names = stmt
                .query_map([], |row| row.get(0))
                .map_err(backend)?
                .collect::<Result<Vec<String>, _>>()
                .map_err(backend)?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            require_table(&conn, &table)?;
            if load(&conn, &table, bag.partition_key(), bag.row_key())?.is_some() {
                return Err(TableError::already_exists(&table, &bag));
            }
            let etag = stamp(&mut bag, self.clock.tick());
            save(&conn, &table, &bag, &etag)?;
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
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            require_table(&conn, &table)?;
            load(&conn, &table, &partition_key, &row_key)
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
            let conn = self.conn.lock().expect("mutex poisoned");
            require_table(&conn, &table)?;
            let (pk, rk) = (bag.partition_key().to_string(), bag.row_key().to_string());
            let Some(stored) = load(&conn, &table, &pk, &rk)? else {
                return Err(TableError::not_found(&table, &pk, &rk));
            };
            let current = stored.etag().cloned().unwrap_or_else(ETag::any);
            if !etag.matches(&current) {
                return Err(TableError::precondition_failed(&table, &pk, &rk));
            }
            let mut next = combine(stored, bag, mode);
            let new_etag = stamp(&mut next, self.clock.tick());
            save(&conn, &table, &next, &new_etag)?;
            Ok(new_etag)
        })
    }

    fn upsert_entity(
        &self,
        table: &str,
        bag: PropertyBag,
        mode: UpdateMode,
    ) -> Pin<Box<dyn Future<Output = TableResult<ETag>> + Send + '_>> {
        let table = table.to_string();
        Box::pin(async move {
            validate_keys(&bag)?;
            let conn = self.conn.lock().expect("mutex poisoned");
            require_table(&conn, &table)?;
            let mut next = match load(&conn, &table, bag.partition_key(), bag.row_key())? {
                Some(stored) => combine(stored, bag, mode),
                None => bag,
            };
            let etag = stamp(&mut next, self.clock.tick());
            save(&conn, &table, &next, &etag)?;
            Ok(etag)
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
        let partition_key = partition_key.to_string();
        let row_key = row_key.to_string();
        let etag = etag.clone();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            require_table(&conn, &table)?;
            let current: Option<String> = conn
                .query_row(
                    "SELECT etag FROM entities
                     WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
                    params![table, partition_key, row_key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            let Some(current) = current else {
                return Ok(());
            };
            if !etag.matches(&ETag::new(current)) {
                return Err(TableError::precondition_failed(&table, &partition_key, &row_key));
            }
            conn.execute(
                "DELETE FROM entities
                 WHERE table_name = ?1 AND partition_key = ?2 AND row_key = ?3",
                params![table, partition_key, row_key],
            )
            .map_err(backend)?;
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
            let conn = self.conn.lock().expect("mutex poisoned");
            require_table(&conn, &table)?;
            let mut stmt = conn
                .prepare(
                    "SELECT body FROM entities
                     WHERE table_name = ?1 AND (?2 IS NULL OR partition_key = ?2)
                     ORDER BY partition_key, row_key",
                )
                .map_err(backend)?;
            let bodies = stmt
                .query_map(params![table, partition_key], |row| row.get::<_, String>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            bodies.iter().map(|b| decode_body(b)).collect()
        })
    }
}

fn combine(mut stored: PropertyBag, incoming: PropertyBag, mode: UpdateMode) -> PropertyBag {
    match mode {
        UpdateMode::Replace => incoming,
        UpdateMode::Merge => {
            stored.merge_from(&incoming);
            stored
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PropertyValue;

    fn test_store() -> SqliteTableStore {
        SqliteTableStore::new(":memory:").expect("failed to create in-memory store")
    }

    fn make_bag(pk: &str, rk: &str, qty: i32) -> PropertyBag {
        let mut bag = PropertyBag::new(pk, rk);
        bag.insert("ProductName", PropertyValue::from("Widget"));
        bag.insert("StockQuantity", PropertyValue::Int32(qty));
        bag
    }

    #[tokio::test]
    async fn test_schema_idempotent() {
        let store = test_store();
        store.init_db().expect("second init_db failed");
        store.init_db().expect("third init_db failed");
    }

    #[tokio::test]
    async fn test_create_and_list_tables() {
        let store = test_store();
        assert!(store.create_table("Product").await.unwrap());
        assert!(!store.create_table("Product").await.unwrap());
        store.create_table("Cart").await.unwrap();
        assert_eq!(store.list_tables().await.unwrap(), vec!["Cart", "Product"]);
    }

    #[tokio::test]
    async fn test_add_get_round_trip() {
        let store = test_store();
        store.create_table("Product").await.unwrap();
        let etag = store.add_entity("Product", make_bag("Product", "a", 3)).await.unwrap();

        let bag = store.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert_eq!(bag.get("StockQuantity"), Some(&PropertyValue::Int32(3)));
        assert_eq!(bag.etag(), Some(&etag));

        let err = store.add_entity("Product", make_bag("Product", "a", 1)).await.unwrap_err();
        assert!(matches!(err, TableError::EntityAlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = test_store();
        let err = store.query("Nope", None).await.unwrap_err();
        assert!(matches!(err, TableError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_conditional_update_and_merge() {
        let store = test_store();
        store.create_table("Product").await.unwrap();
        let first = store.add_entity("Product", make_bag("Product", "a", 3)).await.unwrap();

        let mut patch = PropertyBag::new("Product", "a");
        patch.insert("StockQuantity", PropertyValue::Int32(4));
        let second = store
            .update_entity("Product", patch.clone(), &first, UpdateMode::Merge)
            .await
            .unwrap();
        let bag = store.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert_eq!(bag.get("ProductName"), Some(&PropertyValue::from("Widget")));
        assert_eq!(bag.get("StockQuantity"), Some(&PropertyValue::Int32(4)));

        let err = store
            .update_entity("Product", patch, &first, UpdateMode::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::PreconditionFailed { .. }));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_delete_and_query_partition() {
        let store = test_store();
        store.create_table("Cart").await.unwrap();
        store.add_entity("Cart", make_bag("user-2", "p1", 1)).await.unwrap();
        store.add_entity("Cart", make_bag("user-1", "p2", 1)).await.unwrap();
        store.add_entity("Cart", make_bag("user-1", "p1", 1)).await.unwrap();

        let user1 = store.query("Cart", Some("user-1")).await.unwrap();
        let rows: Vec<&str> = user1.iter().map(|b| b.row_key()).collect();
        assert_eq!(rows, vec!["p1", "p2"]);

        store.delete_entity("Cart", "user-1", "p1", &ETag::any()).await.unwrap();
        store.delete_entity("Cart", "user-1", "p1", &ETag::any()).await.unwrap();
        assert_eq!(store.query("Cart", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteTableStore::new(path).unwrap();
            store.create_table("Order").await.unwrap();
            store.add_entity("Order", make_bag("Order", "o1", 2)).await.unwrap();
        }
        let store = SqliteTableStore::new(path).unwrap();
        let bag = store.get_entity("Order", "Order", "o1").await.unwrap();
        assert!(bag.is_some());
    }
}
