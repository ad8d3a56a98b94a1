//! Blob containers.
//!
//! The [`backend::BlobStore`] trait abstracts over where blob bytes
//! physically live. Implementations include an in-memory map and the local
//! filesystem.

pub mod backend;
pub mod local;
pub mod memory;

use std::sync::Arc;

use tracing::info;

use crate::config::BlobsConfig;

pub use backend::{BlobError, BlobInfo, BlobStore, StoredBlob};

/// Open `container` on the backend named by `config.backend`.
pub fn open_blob_store(config: &BlobsConfig, container: &str) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "memory" => {
            info!("In-memory blob container {} initialized", container);
            Ok(Arc::new(memory::MemoryBlobStore::new(
                container,
                config.max_size_bytes,
            )))
        }
        "local" => {
            let store = local::LocalBlobStore::new(&config.root_dir, container)?;
            info!("Local blob container {} initialized under {}", container, config.root_dir);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("unknown blobs.backend {:?}", other),
    }
}
