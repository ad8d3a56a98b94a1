//! Table export/import as a JSON document of OData rows.
//!
//! Works against any [`TableStore`], so a dump taken from SQLite can be
//! loaded into Azure and back.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::entity::odata::{from_odata, to_odata};
use crate::entity::ETag;
use crate::table::{TableError, TableStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const EXPORT_VERSION: i64 = 1;

const ENVELOPE: &str = "storefront_export";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Tables to export. Empty means every table in the store.
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Empty each imported table first. Otherwise rows whose key already
    /// exists are skipped.
    pub replace: bool,
}

#[derive(Debug, Default)]
pub struct ImportResult {
    pub counts: BTreeMap<String, usize>,
    pub skipped: BTreeMap<String, usize>,
    pub warnings: Vec<String>,
}

pub async fn export_tables(store: &dyn TableStore, opts: &ExportOptions) -> anyhow::Result<String> {
    let tables = if opts.tables.is_empty() {
        store.list_tables().await?
    } else {
        opts.tables.clone()
    };

    let mut rows_by_table = Map::new();
    for table in &tables {
        let rows: Vec<Value> = store.query(table, None).await?.iter().map(to_odata).collect();
        rows_by_table.insert(table.clone(), Value::Array(rows));
    }

    let document = json!({
        ENVELOPE: {
            "exported_at": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "source": format!("rust/{}", VERSION),
            "version": EXPORT_VERSION,
        },
        "tables": rows_by_table,
    });
    Ok(serde_json::to_string_pretty(&document)?)
}

pub async fn import_tables(
    store: &dyn TableStore,
    json_str: &str,
    opts: &ImportOptions,
) -> anyhow::Result<ImportResult> {
    let data: Value = serde_json::from_str(json_str)?;

    let version = data
        .get(ENVELOPE)
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("missing {} envelope", ENVELOPE))?
        .get("version")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if !(1..=EXPORT_VERSION).contains(&version) {
        anyhow::bail!("unsupported export version: {}", version);
    }

    let tables = data
        .get("tables")
        .and_then(|v| v.as_object())
        .ok_or_else(|| anyhow::anyhow!("missing tables object"))?;

    let mut result = ImportResult::default();
    for (table, rows) in tables {
        let Some(rows) = rows.as_array() else {
            result.warnings.push(format!("Skipped {}: rows are not an array", table));
            continue;
        };
        store.create_table(table).await?;

        if opts.replace {
            for existing in store.query(table, None).await? {
                store
                    .delete_entity(table, existing.partition_key(), existing.row_key(), &ETag::any())
                    .await?;
            }
        }

        let mut inserted = 0usize;
        let mut skipped = 0usize;
        for row in rows {
            let bag = match from_odata(row) {
                Ok(bag) => bag,
                Err(e) => {
                    skipped += 1;
                    result.warnings.push(format!("Skipped {} row: {}", table, e));
                    continue;
                }
            };
            match store.add_entity(table, bag).await {
                Ok(_) => inserted += 1,
                Err(TableError::EntityAlreadyExists { .. }) => skipped += 1,
                Err(e @ (TableError::InvalidKey(_) | TableError::Wire(_))) => {
                    skipped += 1;
                    result.warnings.push(format!("Skipped {} row: {}", table, e));
                }
                Err(e) => return Err(e.into()),
            }
        }
        result.counts.insert(table.clone(), inserted);
        result.skipped.insert(table.clone(), skipped);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{PropertyBag, PropertyValue};
    use crate::table::memory::MemoryTableStore;

    async fn seeded() -> MemoryTableStore {
        let store = MemoryTableStore::new();
        store.create_table("Product").await.unwrap();
        store.create_table("Cart").await.unwrap();
        for (rk, name, qty) in [("a", "Lamp", 3), ("b", "Desk", 1)] {
            let mut bag = PropertyBag::new("Product", rk);
            bag.insert("ProductName", PropertyValue::from(name));
            bag.insert("StockQuantity", PropertyValue::Int32(qty));
            bag.insert("Big", PropertyValue::Int64(1 << 40));
            store.add_entity("Product", bag).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_export_all_tables() {
        let store = seeded().await;
        let out = export_tables(&store, &ExportOptions::default()).await.unwrap();
        let doc: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(doc[ENVELOPE]["version"], EXPORT_VERSION);
        assert_eq!(doc["tables"]["Product"].as_array().unwrap().len(), 2);
        assert_eq!(doc["tables"]["Cart"].as_array().unwrap().len(), 0);
        assert_eq!(doc["tables"]["Product"][0]["Big@odata.type"], "Edm.Int64");
    }

    #[tokio::test]
    async fn test_export_selected_table() {
        let store = seeded().await;
        let opts = ExportOptions {
            tables: vec!["Cart".into()],
        };
        let out = export_tables(&store, &opts).await.unwrap();
        let doc: Value = serde_json::from_str(&out).unwrap();
        assert!(doc["tables"].get("Product").is_none());
    }

    #[tokio::test]
    async fn test_round_trip_into_empty_store() {
        let source = seeded().await;
        let out = export_tables(&source, &ExportOptions::default()).await.unwrap();

        let target = MemoryTableStore::new();
        let result = import_tables(&target, &out, &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(result.counts["Product"], 2);
        assert_eq!(result.skipped["Product"], 0);

        let bag = target.get_entity("Product", "Product", "a").await.unwrap().unwrap();
        assert_eq!(bag.get("ProductName"), Some(&PropertyValue::from("Lamp")));
        assert_eq!(bag.get("Big"), Some(&PropertyValue::Int64(1 << 40)));
    }

    #[tokio::test]
    async fn test_import_merge_skips_existing() {
        let store = seeded().await;
        let out = export_tables(&store, &ExportOptions::default()).await.unwrap();
        let result = import_tables(&store, &out, &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(result.counts["Product"], 0);
        assert_eq!(result.skipped["Product"], 2);
    }

    #[tokio::test]
    async fn test_import_replace_drops_extra_rows() {
        let store = seeded().await;
        let out = export_tables(&store, &ExportOptions::default()).await.unwrap();
        store
            .add_entity("Product", PropertyBag::new("Product", "extra"))
            .await
            .unwrap();

        let result = import_tables(&store, &out, &ImportOptions { replace: true })
            .await
            .unwrap();
        assert_eq!(result.counts["Product"], 2);
        assert_eq!(store.query("Product", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_import_bad_rows_warn() {
        let store = MemoryTableStore::new();
        let doc = json!({
            ENVELOPE: {"version": 1},
            "tables": {"Product": [{"RowKey": "no-partition"}, {"PartitionKey": "Product", "RowKey": "ok"}]}
        });
        let result = import_tables(&store, &doc.to_string(), &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(result.counts["Product"], 1);
        assert_eq!(result.skipped["Product"], 1);
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_import_invalid_version() {
        let store = MemoryTableStore::new();
        let doc = json!({ENVELOPE: {"version": 99}, "tables": {}});
        let err = import_tables(&store, &doc.to_string(), &ImportOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported export version"));
    }
}
