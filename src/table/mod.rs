//! Table storage layer.
//!
//! The [`store::TableStore`] trait abstracts over where entities live.
//! Implementations include an in-memory map, a SQLite file and Azure Table
//! Storage. [`service::TableService`] adds typed access on top.

pub mod azure;
pub mod memory;
pub mod service;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use tracing::info;

use crate::config::TablesConfig;

pub use service::TableService;
pub use store::{TableError, TableResult, TableStore, UpdateMode};

/// Open the backend named by `config.backend`.
pub fn open_table_store(config: &TablesConfig) -> anyhow::Result<Arc<dyn TableStore>> {
    match config.backend.as_str() {
        "memory" => {
            info!("In-memory table store initialized");
            Ok(Arc::new(memory::MemoryTableStore::new()))
        }
        "sqlite" => {
            let path = &config.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = sqlite::SqliteTableStore::new(path)?;
            info!("SQLite table store initialized at {}", path);
            Ok(Arc::new(store))
        }
        "azure" => {
            let azure = config.azure.as_ref().ok_or_else(|| {
                anyhow::anyhow!("tables.backend is 'azure' but tables.azure config section is missing")
            })?;
            let store = azure::AzureTableStore::new(azure.account.clone(), azure.endpoint.clone())?;
            info!("Azure table store initialized: account={}", azure.account);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown tables.backend {:?}", other),
    }
}
